// The wiki store: one SQLite connection behind one lock.
//
// Every public operation takes the lock for its full duration, so
// multi-statement writes (page row + index row) are never observed half-done.

pub mod blobs;
pub mod domains;
pub mod dump;
pub mod export;
pub mod pages;
pub mod render_cache;
pub(crate) mod schema;
pub mod similar;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::clock::{decode_ts, Clock};
use crate::error::StoreResult;

pub use blobs::{blob_id_for, decompress, Blob};
pub use domains::{DomainCredentials, SessionKeyOwner};
pub use dump::{DumpReport, PurgeReport};
pub use pages::{PageLookup, SearchResult};

/// Tunables that shape store behavior rather than where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Session keys unused for longer than this are purged.
    pub session_retention: Duration,
    /// Similar pages kept per source page.
    pub max_similar: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { session_retention: Duration::days(5), max_similar: 5 }
    }
}

pub struct Store {
    conn: Mutex<Connection>,
    clock: Clock,
    settings: StoreSettings,
    snapshot_path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `path`. The compressed snapshot lives
    /// beside it at `<path>.sql.gz`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        Self::open_with_snapshot(path, Some(default_snapshot_path(path)))
    }

    /// Open the database at `path`; if it holds no schema yet and
    /// `snapshot_path` points at a snapshot, the snapshot is restored first.
    pub fn open_with_snapshot(
        path: impl AsRef<Path>,
        snapshot_path: Option<PathBuf>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))?;
        schema::configure(&conn)?;
        info!(path = %path.display(), "opened wiki database");

        Self::from_connection(conn, snapshot_path)
    }

    /// A private in-memory store with no snapshot.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_in_memory_with_snapshot(None::<PathBuf>)
    }

    /// An in-memory store seeded from (and dumping to) `snapshot_path`.
    pub fn open_in_memory_with_snapshot(
        snapshot_path: Option<impl Into<PathBuf>>,
    ) -> StoreResult<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn, snapshot_path.map(Into::into))
    }

    /// A file left empty by an earlier failed restore still counts as new.
    fn from_connection(mut conn: Connection, snapshot_path: Option<PathBuf>) -> StoreResult<Self> {
        if schema::is_empty(&conn)? {
            if let Some(snapshot) = snapshot_path.as_deref().filter(|p| p.exists()) {
                dump::restore_snapshot(&conn, snapshot)?;
            }
        }
        schema::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock: Clock::system(),
            settings: StoreSettings::default(),
            snapshot_path,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        Ok(schema::schema_version(&self.lock())?)
    }

    /// Take the store lock. A panic while holding it leaves no open
    /// transaction behind (rusqlite rolls back on drop), so a poisoned lock
    /// is still usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn default_snapshot_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".sql.gz");
    PathBuf::from(name)
}

/// Parse a stored timestamp column, mapping failures to a rusqlite
/// conversion error for the column at `idx`.
pub(crate) fn ts_column(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    decode_ts(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn optional_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        decode_ts(&value).with_context(|| format!("invalid stored timestamp `{value}`"))
    })
    .transpose()
}
