// Rendered-output side cache. Entries are keyed by page id or domain name
// and are fresh only while their render time is after the source's
// last modification.

use anyhow::Context;
use chrono::{DateTime, Utc};
use folio_common::slug::normalize_domain;
use folio_common::PageId;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::domains::domain_id;
use super::pages::latest_modified_in;
use super::{ts_column, Store};
use crate::clock::encode_ts;
use crate::error::{StoreError, StoreResult};

impl Store {
    /// Overwrite the entry for `key`, stamped with the current time.
    pub fn set_cached_render(&self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO render_cache (key, rendered_at, payload) VALUES (?1, ?2, ?3)",
            params![key, encode_ts(self.now()), payload],
        )
        .context("failed to write render cache entry")?;
        debug!(key, size = payload.len(), "cached render");
        Ok(())
    }

    /// The payload for `key` if it was rendered strictly after
    /// `source_modified`. `None` skips the freshness check.
    pub fn get_cached_render(
        &self,
        key: &str,
        source_modified: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<u8>> {
        let conn = self.lock();
        let (rendered_at, payload) = conn
            .query_row(
                "SELECT rendered_at, payload FROM render_cache WHERE key = ?1",
                params![key],
                |row| Ok((ts_column(&row.get::<_, String>(0)?, 0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .context("failed to read render cache entry")?
            .ok_or(StoreError::NotFound)?;

        match source_modified {
            Some(modified) if rendered_at <= modified => Err(StoreError::Stale),
            _ => Ok(payload),
        }
    }

    /// Cached render of a page, checked against the page's `modified`.
    pub fn get_cached_page_render(&self, id: &PageId) -> StoreResult<Vec<u8>> {
        let modified = self.get_by_id(id)?.modified;
        self.get_cached_render(id.as_str(), Some(modified))
    }

    /// Cached render of a domain-level view, checked against the newest
    /// page modification in that domain.
    pub fn get_cached_domain_render(&self, domain: &str) -> StoreResult<Vec<u8>> {
        let domain = normalize_domain(domain)?;
        let latest = {
            let conn = self.lock();
            let id = domain_id(&conn, &domain)?.ok_or(StoreError::NotFound)?;
            latest_modified_in(&conn, id)?
        };
        self.get_cached_render(&domain, latest)
    }

    pub fn set_cached_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let payload = serde_json::to_vec(value).context("failed to encode cached render")?;
        self.set_cached_render(key, &payload)
    }

    pub fn get_cached_json<T: DeserializeOwned>(
        &self,
        key: &str,
        source_modified: Option<DateTime<Utc>>,
    ) -> StoreResult<T> {
        let payload = self.get_cached_render(key, source_modified)?;
        Ok(serde_json::from_slice(&payload).context("failed to decode cached render")?)
    }
}
