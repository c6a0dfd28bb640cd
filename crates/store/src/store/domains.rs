// Domains (tenants) and their session keys.

use anyhow::{Context, Result};
use folio_common::slug::{normalize_domain, PUBLIC_DOMAIN};
use folio_common::{DomainInfo, DomainOptions};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::Store;
use crate::auth::{generate_session_key, hash_password, hash_session_key, verify_password};
use crate::clock::encode_ts;
use crate::error::{StoreError, StoreResult};

/// Result of a successful [`Store::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCredentials {
    pub id: i64,
    pub options: DomainOptions,
}

/// The domain a session key is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyOwner {
    pub domain_id: i64,
    pub domain_name: String,
}

struct DomainRow {
    info: DomainInfo,
    hashed_password: String,
}

// ── Domains ────────────────────────────────────────────────────────

impl Store {
    /// Create a private domain. Names are unique case-insensitively.
    pub fn register_domain(&self, name: &str, password: &str) -> StoreResult<DomainInfo> {
        let name = normalize_domain(name)?;
        let hashed = hash_password(password)?;
        let options = encode_options(&DomainOptions::default())?;

        let conn = self.lock();
        if domain_id(&conn, &name)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }
        conn.execute(
            "INSERT INTO domains (name, hashed_password, is_public, options) VALUES (?1, ?2, 0, ?3)",
            params![name, hashed, options],
        )
        .context("failed to insert domain row")?;

        info!(domain = %name, "registered domain");
        Ok(DomainInfo {
            id: conn.last_insert_rowid(),
            name,
            is_public: false,
            options: DomainOptions::default(),
        })
    }

    pub fn domain_by_name(&self, name: &str) -> StoreResult<DomainInfo> {
        let name = normalize_domain(name)?;
        let conn = self.lock();
        Ok(load_domain(&conn, &name)?.ok_or(StoreError::NotFound)?.info)
    }

    pub fn list_domains(&self) -> StoreResult<Vec<DomainInfo>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, is_public, options, hashed_password FROM domains ORDER BY id ASC",
            )
            .context("failed to prepare domain list query")?;
        let rows = stmt
            .query_map([], row_to_domain)
            .context("failed to query domains")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect domains")?;
        Ok(rows.into_iter().map(|row| row.info).collect())
    }

    /// Check `password` against the domain's stored hash.
    pub fn authenticate(&self, name: &str, password: &str) -> StoreResult<DomainCredentials> {
        let name = normalize_domain(name)?;
        let row = {
            let conn = self.lock();
            load_domain(&conn, &name)?.ok_or(StoreError::NotFound)?
        };

        // Verified outside the lock.
        if !verify_password(password, &row.hashed_password) {
            debug!(domain = %name, "domain authentication failed");
            return Err(StoreError::InvalidCredentials);
        }
        Ok(DomainCredentials { id: row.info.id, options: row.info.options })
    }

    /// Change a domain's settings. An empty `new_password` keeps the
    /// current hash.
    pub fn update_domain_settings(
        &self,
        name: &str,
        new_password: &str,
        is_public: bool,
        options: &DomainOptions,
    ) -> StoreResult<()> {
        let name = normalize_domain(name)?;
        if name == PUBLIC_DOMAIN {
            if !new_password.is_empty() {
                return Err(StoreError::PublicDomain("password protected"));
            }
            if !is_public {
                return Err(StoreError::PublicDomain("made private"));
            }
        }

        let hashed = if new_password.is_empty() { None } else { Some(hash_password(new_password)?) };
        let options = encode_options(options)?;

        let conn = self.lock();
        let changed = match hashed {
            Some(hashed) => conn
                .execute(
                    "UPDATE domains SET hashed_password = ?1, is_public = ?2, options = ?3
                     WHERE name = ?4",
                    params![hashed, is_public, options, name],
                )
                .context("failed to update domain settings and password")?,
            None => conn
                .execute(
                    "UPDATE domains SET is_public = ?1, options = ?2 WHERE name = ?3",
                    params![is_public, options, name],
                )
                .context("failed to update domain settings")?,
        };
        if changed == 0 {
            return Err(StoreError::NotFound);
        }

        info!(domain = %name, is_public, "updated domain settings");
        Ok(())
    }
}

// ── Session keys ───────────────────────────────────────────────────

impl Store {
    /// Authenticate, then mint a session key bound to the domain.
    pub fn issue_session_key(&self, name: &str, password: &str) -> StoreResult<String> {
        let credentials = self.authenticate(name, password)?;
        let key = generate_session_key();

        let conn = self.lock();
        conn.execute(
            "INSERT INTO session_keys (key, domain_id, last_used) VALUES (?1, ?2, ?3)",
            params![hash_session_key(&key), credentials.id, encode_ts(self.now())],
        )
        .context("failed to insert session key")?;

        debug!(domain_id = credentials.id, "issued session key");
        Ok(key)
    }

    /// Resolve a key to its domain. Does not refresh `last_used`.
    pub fn validate_session_key(&self, key: &str) -> StoreResult<SessionKeyOwner> {
        let conn = self.lock();
        lookup_key(&conn, key)?.ok_or(StoreError::InvalidKey)
    }

    /// Resolve many keys at once, keeping only the valid ones.
    pub fn validate_session_keys(
        &self,
        keys: &[String],
    ) -> StoreResult<Vec<(String, SessionKeyOwner)>> {
        let conn = self.lock();
        let mut valid = Vec::new();
        for key in keys {
            if let Some(owner) = lookup_key(&conn, key)? {
                valid.push((key.clone(), owner));
            }
        }
        Ok(valid)
    }

    /// Refresh `last_used` for `keys`. Failures are logged, never returned.
    pub fn touch_session_keys(&self, keys: &[String]) {
        if let Err(error) = self.try_touch_session_keys(keys) {
            warn!(?error, count = keys.len(), "failed to refresh session keys");
        }
    }

    pub fn try_touch_session_keys(&self, keys: &[String]) -> StoreResult<usize> {
        let now = encode_ts(self.now());
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to start session key refresh")?;
        let mut touched = 0;
        for key in keys {
            touched += tx
                .execute(
                    "UPDATE session_keys SET last_used = ?1 WHERE key = ?2",
                    params![now, hash_session_key(key)],
                )
                .context("failed to refresh session key")?;
        }
        tx.commit().context("failed to commit session key refresh")?;
        Ok(touched)
    }

    /// Log out: forget one key.
    pub fn delete_session_key(&self, key: &str) -> StoreResult<bool> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM session_keys WHERE key = ?1", params![hash_session_key(key)])
            .context("failed to delete session key")?;
        Ok(removed > 0)
    }

    /// Delete keys unused for longer than the retention window.
    pub fn purge_stale_session_keys(&self) -> StoreResult<usize> {
        let conn = self.lock();
        Ok(purge_stale_keys(&conn, self)?)
    }
}

// ── Helpers ────────────────────────────────────────────────────────

pub(crate) fn purge_stale_keys(conn: &Connection, store: &Store) -> Result<usize> {
    let cutoff = store.now() - store.settings.session_retention;
    let removed = conn
        .execute("DELETE FROM session_keys WHERE last_used < ?1", params![encode_ts(cutoff)])
        .context("failed to purge stale session keys")?;
    if removed > 0 {
        info!(count = removed, "purged stale session keys");
    }
    Ok(removed)
}

/// Id of the domain with this (already normalized) name.
pub(crate) fn domain_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM domains WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .context("failed to look up domain id")
}

fn load_domain(conn: &Connection, name: &str) -> Result<Option<DomainRow>> {
    conn.query_row(
        "SELECT id, name, is_public, options, hashed_password FROM domains WHERE name = ?1",
        params![name],
        row_to_domain,
    )
    .optional()
    .context("failed to load domain")
}

fn lookup_key(conn: &Connection, key: &str) -> Result<Option<SessionKeyOwner>> {
    conn.query_row(
        "SELECT session_keys.domain_id, domains.name
         FROM session_keys
         JOIN domains ON domains.id = session_keys.domain_id
         WHERE session_keys.key = ?1",
        params![hash_session_key(key)],
        |row| Ok(SessionKeyOwner { domain_id: row.get(0)?, domain_name: row.get(1)? }),
    )
    .optional()
    .context("failed to look up session key")
}

fn row_to_domain(row: &rusqlite::Row<'_>) -> rusqlite::Result<DomainRow> {
    let options_raw: String = row.get(3)?;
    let options = serde_json::from_str(&options_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(DomainRow {
        info: DomainInfo { id: row.get(0)?, name: row.get(1)?, is_public: row.get(2)?, options },
        hashed_password: row.get(4)?,
    })
}

fn encode_options(options: &DomainOptions) -> Result<String> {
    serde_json::to_string(options).context("failed to encode domain options")
}
