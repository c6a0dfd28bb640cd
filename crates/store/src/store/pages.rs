// Page rows: save, lookup by id or slug, search and listings.
//
// The relational row and its `page_fts` row are written in one transaction.
// Page text lives in `page_fts`; `pages.history` holds the version chain.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use folio_common::slug::{normalize_domain, normalize_slug};
use folio_common::{Page, PageDraft, PageId, VersionedText};
use rusqlite::{params, Connection, OptionalExtension, Params};
use tracing::{debug, warn};

use super::domains::domain_id;
use super::{optional_ts, ts_column, Store};
use crate::clock::encode_ts;
use crate::error::{StoreError, StoreResult};
use crate::search::PageIndex;

const PAGE_SELECT: &str = "SELECT pages.id, pages.slug, domains.name, pages.created, \
                                  pages.modified, pages.history, pages.views, \
                                  COALESCE(page_fts.content, '') \
                           FROM pages \
                           JOIN domains ON domains.id = pages.domain_id \
                           LEFT JOIN page_fts ON page_fts.rowid = pages.seq";

/// Outcome of [`Store::resolve_exists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLookup {
    Missing,
    Found(PageId),
    /// Several pages share the slug, newest-modified first.
    Ambiguous(Vec<PageId>),
}

/// A [`Store::find`] match with its highlighted excerpt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub page: Page,
    pub snippet: String,
}

struct StoredPage {
    domain_name: String,
    domain_id: i64,
    created: DateTime<Utc>,
    history: VersionedText,
    views: i64,
}

impl Store {
    /// Upsert a page by id, appending to its history and mirroring the text
    /// into the search index. Fails with `DomainNotFound` before any write
    /// when the domain does not exist.
    pub fn save(&self, draft: &PageDraft) -> StoreResult<Page> {
        let domain = normalize_domain(&draft.domain)?;
        let slug = normalize_slug(&draft.slug)?;

        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to start page save")?;

        let domain_id =
            domain_id(&tx, &domain)?.ok_or_else(|| StoreError::DomainNotFound(domain.clone()))?;
        let mut now = self.now();

        let (created, history, views) = match load_stored(&tx, &draft.id)? {
            Some(stored) => {
                if stored.domain_id != domain_id {
                    return Err(StoreError::DomainMismatch {
                        id: draft.id.clone(),
                        existing: stored.domain_name,
                    });
                }
                // History written before a restart may be ahead of the wall clock.
                if let Some(latest) = stored.history.latest_at().filter(|latest| *latest >= now) {
                    now = latest + Duration::microseconds(1);
                    self.clock.observe(now);
                }
                let mut history = stored.history;
                history.update(&draft.data, now)?;
                (stored.created, history, stored.views)
            }
            None => (now, VersionedText::new(&draft.data, now), 0),
        };
        let history_json =
            serde_json::to_string(&history).context("failed to encode page history")?;

        tx.execute(
            "INSERT OR IGNORE INTO pages (id, domain_id, slug, created, modified, history)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            params![draft.id.as_str(), domain_id, slug, encode_ts(now), history_json],
        )
        .context("failed to insert page row")?;
        tx.execute(
            "UPDATE pages SET slug = ?1, modified = ?2, history = ?3 WHERE id = ?4",
            params![slug, encode_ts(now), history_json, draft.id.as_str()],
        )
        .context("failed to update page row")?;

        let seq: i64 = tx
            .query_row("SELECT seq FROM pages WHERE id = ?1", params![draft.id.as_str()], |row| {
                row.get(0)
            })
            .context("failed to read saved page row")?;
        PageIndex::new(&tx).upsert(seq, draft.id.as_str(), &draft.data)?;

        tx.commit().context("failed to commit page save")?;

        debug!(page_id = %draft.id, domain = %domain, versions = history.len(), "saved page");
        Ok(Page {
            id: draft.id.clone(),
            slug,
            domain,
            created,
            modified: now,
            data: draft.data.clone(),
            history,
            views,
        })
    }

    /// Save empty content under a fresh id so a later edit has a page to
    /// attach to.
    pub fn create_page(&self, domain: &str, slug: &str) -> StoreResult<Page> {
        self.save(&PageDraft::new(PageId::generate(), slug, domain, ""))
    }

    /// A page id returns at most that page, whatever its content. Anything
    /// else, including an id-shaped input that names no page, is a slug and
    /// returns every non-empty page with it, newest-modified first. No match
    /// is `NotFound`.
    pub fn get(&self, id_or_slug: &str, domain: &str) -> StoreResult<Vec<Page>> {
        let domain = normalize_domain(domain)?;
        let conn = self.lock();
        let Some(domain_id) = domain_id(&conn, &domain)? else {
            return Err(StoreError::NotFound);
        };

        let mut pages = match PageId::parse(id_or_slug) {
            Ok(id) => query_pages(
                &conn,
                "WHERE pages.id = ?1 AND pages.domain_id = ?2",
                params![id.as_str(), domain_id],
            )?,
            Err(_) => Vec::new(),
        };
        if pages.is_empty() {
            pages = query_pages(
                &conn,
                "WHERE pages.domain_id = ?1 AND pages.slug = ?2 AND page_fts.content != '' \
                 ORDER BY pages.modified DESC",
                params![domain_id, normalize_slug(id_or_slug)?],
            )?;
        }

        if pages.is_empty() {
            Err(StoreError::NotFound)
        } else {
            Ok(pages)
        }
    }

    /// Look up a page by id in any domain.
    pub fn get_by_id(&self, id: &PageId) -> StoreResult<Page> {
        let conn = self.lock();
        query_pages(&conn, "WHERE pages.id = ?1", params![id.as_str()])?
            .pop()
            .ok_or(StoreError::NotFound)
    }

    /// Content of page `id` as it stood at `at`.
    pub fn page_as_of(&self, id: &PageId, at: DateTime<Utc>) -> StoreResult<String> {
        Ok(self.get_by_id(id)?.history.get_as_of(at)?)
    }

    /// Cheap existence check used on every page view. Placeholder pages
    /// with empty content count. An id-shaped input that names no page is
    /// retried as a slug.
    pub fn resolve_exists(&self, id_or_slug: &str, domain: &str) -> StoreResult<PageLookup> {
        let domain = normalize_domain(domain)?;
        let conn = self.lock();
        let Some(domain_id) = domain_id(&conn, &domain)? else {
            return Ok(PageLookup::Missing);
        };

        if let Ok(id) = PageId::parse(id_or_slug) {
            let found: Option<String> = conn
                .query_row(
                    "SELECT id FROM pages WHERE id = ?1 AND domain_id = ?2",
                    params![id.as_str(), domain_id],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to look up page id")?;
            if found.is_some() {
                return Ok(PageLookup::Found(id));
            }
        }

        let slug = normalize_slug(id_or_slug)?;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM pages WHERE domain_id = ?1 AND slug = ?2 ORDER BY modified DESC",
            )
            .context("failed to prepare slug lookup")?;
        let mut ids = stmt
            .query_map(params![domain_id, slug], |row| row.get::<_, String>(0))
            .context("failed to query slug lookup")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect slug lookup")?
            .into_iter()
            .map(|raw| PageId::parse(&raw).with_context(|| format!("invalid stored page id `{raw}`")))
            .collect::<Result<Vec<_>>>()?;

        Ok(match ids.len() {
            0 => PageLookup::Missing,
            1 => PageLookup::Found(ids.remove(0)),
            _ => PageLookup::Ambiguous(ids),
        })
    }

    /// Full-text search within one domain, newest-modified first.
    pub fn find(&self, text: &str, domain: &str) -> StoreResult<Vec<SearchResult>> {
        let domain = normalize_domain(domain)?;
        let conn = self.lock();
        let Some(domain_id) = domain_id(&conn, &domain)? else {
            return Ok(vec![]);
        };

        let hits = PageIndex::new(&conn).search(text, domain_id)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(page) =
                query_pages(&conn, "WHERE pages.seq = ?1", params![hit.seq])?.pop()
            {
                results.push(SearchResult { page, snippet: hit.snippet });
            }
        }
        Ok(results)
    }

    /// Every page in the domain, including empty placeholders.
    pub fn get_all(&self, domain: &str, order_by_created: bool) -> StoreResult<Vec<Page>> {
        let clause = format!("WHERE pages.domain_id = ?1 ORDER BY {}", order_column(order_by_created));
        self.list_in_domain(domain, &clause, None)
    }

    pub fn get_top_x(
        &self,
        domain: &str,
        n: usize,
        order_by_created: bool,
    ) -> StoreResult<Vec<Page>> {
        let clause = format!(
            "WHERE pages.domain_id = ?1 AND page_fts.content != '' ORDER BY {} LIMIT ?2",
            order_column(order_by_created)
        );
        self.list_in_domain(domain, &clause, Some(n))
    }

    pub fn get_top_x_most_viewed(&self, domain: &str, n: usize) -> StoreResult<Vec<Page>> {
        self.list_in_domain(
            domain,
            "WHERE pages.domain_id = ?1 AND page_fts.content != '' \
             ORDER BY pages.views DESC, pages.modified DESC LIMIT ?2",
            Some(n),
        )
    }

    fn list_in_domain(
        &self,
        domain: &str,
        clause: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Page>> {
        let domain = normalize_domain(domain)?;
        let conn = self.lock();
        let Some(domain_id) = domain_id(&conn, &domain)? else {
            return Ok(vec![]);
        };
        let pages = match limit {
            Some(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                query_pages(&conn, clause, params![domain_id, n])?
            }
            None => query_pages(&conn, clause, params![domain_id])?,
        };
        Ok(pages)
    }

    /// Count one view. Failures are logged, never returned.
    pub fn record_view(&self, id: &PageId) {
        if let Err(error) = self.try_record_view(id) {
            warn!(?error, page_id = %id, "failed to record page view");
        }
    }

    pub fn try_record_view(&self, id: &PageId) -> StoreResult<bool> {
        let conn = self.lock();
        let changed = conn
            .execute("UPDATE pages SET views = views + 1 WHERE id = ?1", params![id.as_str()])
            .context("failed to increment page views")?;
        Ok(changed > 0)
    }

    /// Most recent `modified` across all pages.
    pub fn latest_modified(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row("SELECT MAX(modified) FROM pages", [], |row| row.get(0))
            .context("failed to read latest modification")?;
        Ok(optional_ts(raw)?)
    }

    pub fn latest_modified_in_domain(&self, domain_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.lock();
        Ok(latest_modified_in(&conn, domain_id)?)
    }

    pub fn page_count(&self) -> StoreResult<i64> {
        let conn = self.lock();
        Ok(conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))
            .context("failed to count pages")?)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn order_column(order_by_created: bool) -> &'static str {
    if order_by_created {
        "pages.created DESC"
    } else {
        "pages.modified DESC"
    }
}

pub(crate) fn latest_modified_in(conn: &Connection, domain_id: i64) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row("SELECT MAX(modified) FROM pages WHERE domain_id = ?1", params![domain_id], |row| {
            row.get(0)
        })
        .context("failed to read latest domain modification")?;
    optional_ts(raw)
}

pub(crate) fn query_pages<P: Params>(conn: &Connection, clause: &str, params: P) -> Result<Vec<Page>> {
    let mut stmt = conn
        .prepare(&format!("{PAGE_SELECT} {clause}"))
        .context("failed to prepare page query")?;
    let pages = stmt
        .query_map(params, row_to_page)
        .context("failed to query pages")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to collect pages")?;
    Ok(pages)
}

fn load_stored(conn: &Connection, id: &PageId) -> Result<Option<StoredPage>> {
    let row = conn
        .query_row(
            "SELECT domains.name, pages.domain_id, pages.created, pages.history, pages.views
             FROM pages JOIN domains ON domains.id = pages.domain_id
             WHERE pages.id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    ts_column(&row.get::<_, String>(2)?, 2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .context("failed to load existing page")?;

    let Some((domain_name, domain_id, created, history_raw, views)) = row else {
        return Ok(None);
    };
    let history = serde_json::from_str(&history_raw)
        .with_context(|| format!("failed to decode history of page {id}"))?;
    Ok(Some(StoredPage { domain_name, domain_id, created, history, views }))
}

fn row_to_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<Page> {
    let id_raw: String = row.get(0)?;
    let id = PageId::parse(&id_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let history_raw: String = row.get(5)?;
    let history: VersionedText = serde_json::from_str(&history_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Page {
        id,
        slug: row.get(1)?,
        domain: row.get(2)?,
        created: ts_column(&row.get::<_, String>(3)?, 3)?,
        modified: ts_column(&row.get::<_, String>(4)?, 4)?,
        history,
        views: row.get(6)?,
        data: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::Clock;

    fn store() -> Store {
        let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let store = Store::open_in_memory().unwrap().with_clock(Clock::manual(start));
        store.register_domain("team", "secret").unwrap();
        store
    }

    fn draft(id: &PageId, slug: &str, domain: &str, data: &str) -> PageDraft {
        PageDraft::new(id.clone(), slug, domain, data)
    }

    #[test]
    fn save_then_get_by_slug_and_id() {
        let store = store();
        let id = PageId::generate();
        let saved = store.save(&draft(&id, "Home", "team", "hello")).unwrap();
        assert_eq!(saved.slug, "home");
        assert_eq!(saved.domain, "team");

        let by_slug = store.get("home", "team").unwrap();
        assert_eq!(by_slug.len(), 1);
        assert_eq!(by_slug[0].data, "hello");
        assert_eq!(by_slug[0], saved);

        let by_id = store.get(id.as_str(), "TEAM").unwrap();
        assert_eq!(by_id, vec![saved]);
    }

    #[test]
    fn id_shaped_slug_is_found_as_typed() {
        let store = store();
        let id = PageId::generate();
        store.save(&draft(&id, "MEETINGNOTESABCD", "team", "agenda")).unwrap();

        for typed in ["MEETINGNOTESABCD", "meetingnotesabcd"] {
            let pages = store.get(typed, "team").unwrap();
            assert_eq!(pages.len(), 1);
            assert_eq!(pages[0].id, id);
            assert_eq!(store.resolve_exists(typed, "team").unwrap(), PageLookup::Found(id.clone()));
        }
        assert_eq!(store.resolve_exists("MEETINGNOTESWXYZ", "team").unwrap(), PageLookup::Missing);
    }

    #[test]
    fn concurrent_saves_keep_index_in_step() {
        let store = std::sync::Arc::new(store());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..10 {
                        let id = PageId::generate();
                        let text = format!("worker{worker} round{round}");
                        store.save(&draft(&id, "shared", "team", &text)).unwrap();
                        store.save(&draft(&id, "shared", "team", &format!("{text} edited"))).unwrap();
                        store.find("edited", "team").unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let conn = store.lock();
        let (pages, mismatched): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), \
                        SUM(page_fts.rowid IS NULL OR page_fts.content NOT LIKE '% edited') \
                 FROM pages LEFT JOIN page_fts ON page_fts.rowid = pages.seq",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(pages, 80);
        assert_eq!(mismatched, 0);
    }

    #[test]
    fn save_to_missing_domain_writes_nothing() {
        let store = store();
        let id = PageId::generate();
        let err = store.save(&draft(&id, "home", "ghost", "hello")).unwrap_err();
        assert!(matches!(err, StoreError::DomainNotFound(ref name) if name == "ghost"));
        assert_eq!(store.page_count().unwrap(), 0);
        let index_rows: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM page_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(index_rows, 0);
    }

    #[test]
    fn empty_domain_saves_to_public() {
        let store = store();
        let id = PageId::generate();
        let saved = store.save(&draft(&id, "welcome", "", "hi")).unwrap();
        assert_eq!(saved.domain, "public");
        assert_eq!(store.get("welcome", "public").unwrap().len(), 1);
    }

    #[test]
    fn moving_page_between_domains_is_rejected() {
        let store = store();
        let id = PageId::generate();
        store.save(&draft(&id, "home", "team", "hello")).unwrap();

        let err = store.save(&draft(&id, "home", "public", "hijack")).unwrap_err();
        assert!(matches!(err, StoreError::DomainMismatch { ref existing, .. } if existing == "team"));
        assert_eq!(store.get(id.as_str(), "team").unwrap()[0].data, "hello");
    }

    #[test]
    fn get_by_id_ignores_emptiness_but_slug_lookup_does_not() {
        let store = store();
        let id = PageId::generate();
        store.save(&draft(&id, "draft", "team", "")).unwrap();

        assert_eq!(store.get(id.as_str(), "team").unwrap().len(), 1);
        assert!(store.get("draft", "team").unwrap_err().is_not_found());
    }

    #[test]
    fn resolve_exists_reports_missing_found_and_ambiguous() {
        let store = store();
        assert_eq!(store.resolve_exists("notes", "team").unwrap(), PageLookup::Missing);

        let first = PageId::generate();
        store.save(&draft(&first, "notes", "team", "one")).unwrap();
        assert_eq!(store.resolve_exists("notes", "team").unwrap(), PageLookup::Found(first.clone()));
        assert_eq!(
            store.resolve_exists(first.as_str(), "team").unwrap(),
            PageLookup::Found(first.clone())
        );
        assert_eq!(store.resolve_exists(first.as_str(), "public").unwrap(), PageLookup::Missing);

        let second = PageId::generate();
        store.save(&draft(&second, "Notes", "team", "two")).unwrap();
        assert_eq!(
            store.resolve_exists("notes", "team").unwrap(),
            PageLookup::Ambiguous(vec![second, first])
        );
    }

    #[test]
    fn placeholder_pages_resolve_but_are_not_listed() {
        let store = store();
        let placeholder = store.create_page("team", "later").unwrap();
        assert!(placeholder.is_empty());
        assert_eq!(
            store.resolve_exists("later", "team").unwrap(),
            PageLookup::Found(placeholder.id.clone())
        );
        assert!(store.get_top_x("team", 10, false).unwrap().is_empty());
        assert_eq!(store.get_all("team", false).unwrap().len(), 1);
    }

    #[test]
    fn listings_order_and_limit() {
        let store = store();
        let a = PageId::generate();
        let b = PageId::generate();
        let c = PageId::generate();
        store.save(&draft(&a, "a", "team", "alpha")).unwrap();
        store.save(&draft(&b, "b", "team", "beta")).unwrap();
        store.save(&draft(&c, "c", "team", "gamma")).unwrap();
        store.save(&draft(&a, "a", "team", "alpha edited")).unwrap();

        let recent: Vec<_> =
            store.get_top_x("team", 2, false).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(recent, vec![a.clone(), c.clone()]);

        let created: Vec<_> =
            store.get_top_x("team", 3, true).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(created, vec![c.clone(), b.clone(), a.clone()]);

        store.record_view(&b);
        store.record_view(&b);
        store.record_view(&c);
        let viewed: Vec<_> =
            store.get_top_x_most_viewed("team", 2).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(viewed, vec![b, c]);
    }

    #[test]
    fn record_view_on_missing_page_is_silent() {
        let store = store();
        let id = PageId::generate();
        store.record_view(&id);
        assert!(!store.try_record_view(&id).unwrap());
    }

    #[test]
    fn latest_modified_tracks_saves_per_domain() {
        let store = store();
        assert_eq!(store.latest_modified().unwrap(), None);

        let team = store.domain_by_name("team").unwrap();
        let saved = store.save(&draft(&PageId::generate(), "x", "team", "x")).unwrap();
        let public = store.save(&draft(&PageId::generate(), "y", "", "y")).unwrap();

        assert_eq!(store.latest_modified().unwrap(), Some(public.modified));
        assert_eq!(store.latest_modified_in_domain(team.id).unwrap(), Some(saved.modified));
        assert_eq!(store.latest_modified_in_domain(999).unwrap(), None);
    }

    #[test]
    fn page_as_of_reads_history() {
        let store = store();
        let id = PageId::generate();
        let first = store.save(&draft(&id, "p", "team", "first")).unwrap();
        store.save(&draft(&id, "p", "team", "second")).unwrap();

        assert_eq!(store.page_as_of(&id, first.modified).unwrap(), "first");
        assert!(matches!(
            store.page_as_of(&id, first.modified - chrono::Duration::seconds(1)),
            Err(StoreError::History(_))
        ));
    }

    #[test]
    fn slug_with_separator_is_rejected() {
        let store = store();
        let err = store.save(&draft(&PageId::generate(), "a/b", "team", "x")).unwrap_err();
        assert!(matches!(err, StoreError::Slug(_)));
    }
}
