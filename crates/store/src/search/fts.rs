// FTS5 mirror of page content. Each row's rowid is the owning page's `seq`,
// so joins against `pages` are rowid lookups rather than scans.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// A search hit: the owning page's `seq` and a highlighted excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub seq: i64,
    pub snippet: String,
}

/// `page_fts` access over a borrowed connection (or transaction).
pub struct PageIndex<'a> {
    conn: &'a Connection,
}

impl<'a> PageIndex<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn contains(&self, seq: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM page_fts WHERE rowid = ?1", params![seq], |_| Ok(()))
            .optional()
            .context("failed to check page index row")?;
        Ok(found.is_some())
    }

    /// Create the row when absent, otherwise rewrite its content.
    pub fn upsert(&self, seq: i64, page_id: &str, content: &str) -> Result<()> {
        if self.contains(seq)? {
            self.conn
                .execute("UPDATE page_fts SET content = ?1 WHERE rowid = ?2", params![content, seq])
                .context("failed to update page index")?;
        } else {
            self.conn
                .execute(
                    "INSERT INTO page_fts (rowid, page_id, content) VALUES (?1, ?2, ?3)",
                    params![seq, page_id, content],
                )
                .context("failed to insert page index")?;
        }
        Ok(())
    }

    pub fn content(&self, seq: i64) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT content FROM page_fts WHERE rowid = ?1", params![seq], |row| {
                row.get(0)
            })
            .optional()
            .context("failed to read page index row")
    }

    /// Matching non-empty pages in one domain, newest-modified first.
    pub fn search(&self, query: &str, domain_id: i64) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = match_expression(query) else {
            return Ok(vec![]);
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT pages.seq,
                        snippet(page_fts, 1, '<b>', '</b>', '...', 30)
                 FROM page_fts
                 JOIN pages ON pages.seq = page_fts.rowid
                 WHERE page_fts MATCH ?1
                   AND pages.domain_id = ?2
                   AND page_fts.content != ''
                 ORDER BY pages.modified DESC",
            )
            .context("failed to prepare page search query")?;

        let hits = stmt
            .query_map(params![match_expr, domain_id], |row| {
                Ok(SearchHit { seq: row.get(0)?, snippet: row.get(1)? })
            })
            .context("failed to execute page search query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect page search results")?;

        debug!(domain_id, count = hits.len(), "page search finished");
        Ok(hits)
    }

    /// Remove rows that are empty or no longer backed by a page.
    pub fn remove_dead_rows(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM page_fts
                 WHERE content = '' OR rowid NOT IN (SELECT seq FROM pages)",
                [],
            )
            .context("failed to remove dead page index rows")?;
        Ok(removed)
    }
}

/// Quote each whitespace-separated term so user input is never parsed as
/// FTS5 query syntax. Terms are ANDed.
pub fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
