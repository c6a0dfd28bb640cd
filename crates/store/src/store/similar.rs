// "Similar pages" edges, rebuilt per source page.

use anyhow::{Context, Result};
use folio_common::similarity::rank_similar;
use folio_common::{Page, PageId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::pages::query_pages;
use super::Store;
use crate::error::{StoreError, StoreResult};

impl Store {
    /// Replace the similarity edges of `id` with its best matches among the
    /// other non-empty pages of its domain. Returns the number of edges kept.
    pub fn recompute_similar(&self, id: &PageId) -> StoreResult<usize> {
        let mut conn = self.lock();

        let source: Option<(i64, String)> = conn
            .query_row(
                "SELECT pages.domain_id, COALESCE(page_fts.content, '')
                 FROM pages LEFT JOIN page_fts ON page_fts.rowid = pages.seq
                 WHERE pages.id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to load similarity source page")?;
        let (domain_id, content) = source.ok_or(StoreError::NotFound)?;

        let candidates = similarity_candidates(&conn, domain_id, id)?;

        let texts: Vec<&str> = candidates.iter().map(|(_, text)| text.as_str()).collect();
        let ranked = rank_similar(&content, &texts, self.settings.max_similar);

        let tx = conn.transaction().context("failed to start similarity update")?;
        tx.execute("DELETE FROM similar_pages WHERE source_id = ?1", params![id.as_str()])
            .context("failed to clear similar pages")?;
        for (rank, scored) in ranked.iter().enumerate() {
            tx.execute(
                "INSERT INTO similar_pages (source_id, similar_id, rank) VALUES (?1, ?2, ?3)",
                params![id.as_str(), candidates[scored.index].0, rank as i64],
            )
            .context("failed to insert similar page")?;
        }
        tx.commit().context("failed to commit similarity update")?;

        debug!(page_id = %id, count = ranked.len(), "recomputed similar pages");
        Ok(ranked.len())
    }

    /// Non-empty pages most similar to `id`, best first.
    pub fn get_similar(&self, id: &PageId) -> StoreResult<Vec<Page>> {
        let conn = self.lock();
        Ok(query_pages(
            &conn,
            "JOIN similar_pages ON similar_pages.similar_id = pages.id
             WHERE similar_pages.source_id = ?1
               AND page_fts.content != ''
               AND pages.domain_id = (SELECT domain_id FROM pages WHERE id = ?1)
             ORDER BY similar_pages.rank ASC",
            params![id.as_str()],
        )?)
    }
}

fn similarity_candidates(
    conn: &Connection,
    domain_id: i64,
    id: &PageId,
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare(
            "SELECT pages.id, page_fts.content
             FROM pages JOIN page_fts ON page_fts.rowid = pages.seq
             WHERE pages.domain_id = ?1 AND pages.id != ?2 AND page_fts.content != ''",
        )
        .context("failed to prepare similarity candidates query")?;
    let rows = stmt
        .query_map(params![domain_id, id.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
        .context("failed to query similarity candidates")?;
    rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to collect similarity candidates")
}

#[cfg(test)]
mod tests {
    use folio_common::PageDraft;

    use super::*;

    fn save(store: &Store, slug: &str, domain: &str, data: &str) -> PageId {
        let id = PageId::generate();
        store.save(&PageDraft::new(id.clone(), slug, domain, data)).unwrap();
        id
    }

    #[test]
    fn ranks_related_pages_in_the_same_domain() {
        let store = Store::open_in_memory().unwrap();
        store.register_domain("team", "pw").unwrap();

        let source = save(&store, "rust", "team", "rust sqlite storage engine notes");
        let close = save(&store, "db", "team", "sqlite storage engine");
        let far = save(&store, "misc", "team", "notes about gardening");
        save(&store, "none", "team", "completely different words");
        save(&store, "other", "", "rust sqlite storage engine notes");

        assert_eq!(store.recompute_similar(&source).unwrap(), 2);
        let similar: Vec<_> = store.get_similar(&source).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(similar, vec![close, far]);
    }

    #[test]
    fn recompute_replaces_previous_edges() {
        let store = Store::open_in_memory().unwrap();
        let source = save(&store, "a", "", "shared words here");
        let related = save(&store, "b", "", "shared words");
        assert_eq!(store.recompute_similar(&source).unwrap(), 1);

        store.save(&PageDraft::new(related.clone(), "b", "", "nothing in common")).unwrap();
        assert_eq!(store.recompute_similar(&source).unwrap(), 0);
        assert!(store.get_similar(&source).unwrap().is_empty());
    }

    #[test]
    fn keeps_at_most_max_similar() {
        let store = Store::open_in_memory().unwrap();
        let source = save(&store, "src", "", "alpha beta gamma");
        for i in 0..8 {
            save(&store, &format!("p{i}"), "", &format!("alpha page{i}"));
        }
        assert_eq!(store.recompute_similar(&source).unwrap(), 5);
        assert_eq!(store.get_similar(&source).unwrap().len(), 5);
    }

    #[test]
    fn unknown_source_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.recompute_similar(&PageId::generate()).unwrap_err().is_not_found());
    }
}
