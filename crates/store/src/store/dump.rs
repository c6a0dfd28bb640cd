// Compaction: purge dead rows, then write the whole database as a gzip'd
// SQL script. The script is what a fresh store replays on cold start.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use folio_common::ids::PAGE_ID_LEN;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, info};

use super::domains::purge_stale_keys;
use super::Store;
use crate::error::StoreResult;
use crate::search::PageIndex;

/// Rows removed by [`Store::purge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub pages: usize,
    pub index_rows: usize,
    pub similar_edges: usize,
    pub render_entries: usize,
    pub session_keys: usize,
}

/// Result of a successful [`Store::dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReport {
    pub path: PathBuf,
    pub tables: usize,
    pub rows: usize,
    pub bytes: u64,
}

impl Store {
    /// Remove empty pages with their index rows, similarity edges and
    /// page renders that point at pages which no longer exist, and stale
    /// session keys.
    pub fn purge(&self) -> StoreResult<PurgeReport> {
        let mut conn = self.lock();
        let tx = conn.transaction().context("failed to start purge")?;

        let pages = tx
            .execute(
                "DELETE FROM pages WHERE seq IN (SELECT rowid FROM page_fts WHERE content = '')",
                [],
            )
            .context("failed to purge empty pages")?;
        let index_rows = PageIndex::new(&tx).remove_dead_rows()?;
        let similar_edges = tx
            .execute(
                "DELETE FROM similar_pages
                 WHERE source_id NOT IN (SELECT id FROM pages)
                    OR similar_id NOT IN (SELECT id FROM pages)",
                [],
            )
            .context("failed to purge similarity edges")?;
        let render_entries = tx
            .execute(
                "DELETE FROM render_cache WHERE key GLOB ?1 AND key NOT IN (SELECT id FROM pages)",
                [page_id_glob()],
            )
            .context("failed to purge page renders")?;
        let session_keys = purge_stale_keys(&tx, self)?;

        tx.commit().context("failed to commit purge")?;

        let report = PurgeReport { pages, index_rows, similar_edges, render_entries, session_keys };
        if report != PurgeReport::default() {
            info!(?report, "purged store");
        }
        Ok(report)
    }

    /// Write the snapshot, replacing the previous one atomically. Returns
    /// `None` when the store has no snapshot path.
    pub fn dump(&self) -> StoreResult<Option<DumpReport>> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(None);
        };

        let conn = self.lock();
        let script = dump_sql(&conn)?;
        let bytes = write_snapshot(&path, &script.sql)?;
        drop(conn);

        info!(path = %path.display(), tables = script.tables, rows = script.rows, bytes, "wrote snapshot");
        Ok(Some(DumpReport { path, tables: script.tables, rows: script.rows, bytes }))
    }

    /// Purge, then dump.
    pub fn compact(&self) -> StoreResult<(PurgeReport, Option<DumpReport>)> {
        let purged = self.purge()?;
        let dumped = self.dump()?;
        Ok((purged, dumped))
    }
}

/// GLOB pattern matching exactly the page id format.
fn page_id_glob() -> String {
    format!("[A-Z]{}", "[A-Z2-7]".repeat(PAGE_ID_LEN - 1))
}

pub(crate) struct SqlScript {
    pub sql: String,
    pub tables: usize,
    pub rows: usize,
}

/// Render the schema and every row as SQL. FTS shadow tables and sqlite
/// internals are skipped; the virtual table's CREATE rebuilds them.
pub(crate) fn dump_sql(conn: &Connection) -> Result<SqlScript> {
    let objects = schema_objects(conn)?;
    let virtual_tables: Vec<&str> = objects
        .iter()
        .filter(|object| object.is_virtual())
        .map(|object| object.name.as_str())
        .collect();

    let mut sql = String::from("PRAGMA foreign_keys=OFF;\nBEGIN TRANSACTION;\n");
    let mut tables = 0;
    let mut rows = 0;

    for object in objects.iter().filter(|object| object.kind == "table") {
        if object.name.starts_with("sqlite_")
            || virtual_tables
                .iter()
                .any(|vt| object.name.len() > vt.len() && object.name.starts_with(&format!("{vt}_")))
        {
            continue;
        }

        let _ = writeln!(sql, "{};", object.sql);
        rows += dump_rows(conn, object, &mut sql)?;
        tables += 1;
    }
    for object in objects.iter().filter(|object| object.kind == "index") {
        let _ = writeln!(sql, "{};", object.sql);
    }

    sql.push_str("COMMIT;\n");
    debug!(tables, rows, "rendered sql dump");
    Ok(SqlScript { sql, tables, rows })
}

struct SchemaObject {
    kind: String,
    name: String,
    sql: String,
}

impl SchemaObject {
    fn is_virtual(&self) -> bool {
        self.sql.trim_start().to_ascii_uppercase().starts_with("CREATE VIRTUAL TABLE")
    }
}

fn schema_objects(conn: &Connection) -> Result<Vec<SchemaObject>> {
    let mut stmt = conn
        .prepare(
            "SELECT type, name, sql FROM sqlite_master
             WHERE sql IS NOT NULL AND type IN ('table', 'index')
             ORDER BY rowid",
        )
        .context("failed to prepare schema query")?;
    let objects = stmt
        .query_map([], |row| Ok(SchemaObject { kind: row.get(0)?, name: row.get(1)?, sql: row.get(2)? }))
        .context("failed to query schema")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to collect schema")?;
    Ok(objects)
}

fn dump_rows(conn: &Connection, table: &SchemaObject, out: &mut String) -> Result<usize> {
    let mut columns = table_columns(conn, &table.name)?;
    if table.is_virtual() {
        columns.insert(0, "rowid".to_owned());
    }
    let column_list =
        columns.iter().map(|column| quote_ident(column)).collect::<Vec<_>>().join(", ");

    let mut stmt = conn
        .prepare(&format!("SELECT {column_list} FROM {}", quote_ident(&table.name)))
        .with_context(|| format!("failed to prepare dump of `{}`", table.name))?;
    let mut rows = stmt.query([]).with_context(|| format!("failed to dump `{}`", table.name))?;

    let mut count = 0;
    while let Some(row) = rows.next().with_context(|| format!("failed to read `{}`", table.name))? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(sql_literal(row.get_ref(idx)?));
        }
        let _ = writeln!(
            out,
            "INSERT INTO {} ({column_list}) VALUES ({});",
            quote_ident(&table.name),
            values.join(", ")
        );
        count += 1;
    }
    Ok(count)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .context("failed to prepare table_info")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .context("failed to query table_info")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to collect table columns")?;
    Ok(columns)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_owned(),
        ValueRef::Integer(v) => v.to_string(),
        ValueRef::Real(v) => format!("{v:?}"),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) if !text.contains('\0') => format!("'{}'", text.replace('\'', "''")),
            _ => format!("CAST({} AS TEXT)", hex_literal(bytes)),
        },
        ValueRef::Blob(bytes) => hex_literal(bytes),
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("X'");
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out.push('\'');
    out
}

// ── Snapshot file ──────────────────────────────────────────────────

/// Gzip `sql` into `path` via a temp file, fsync and rename.
fn write_snapshot(path: &Path, sql: &str) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create snapshot directory `{}`", parent.display())
        })?;
    }

    let tmp_path = temp_path_for(path);
    let file = File::create(&tmp_path)
        .with_context(|| format!("failed to open temp snapshot `{}`", tmp_path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(sql.as_bytes()).context("failed to write snapshot")?;
    let file = encoder.finish().context("failed to finish snapshot compression")?;
    file.sync_all().context("failed to fsync snapshot")?;
    let bytes = file.metadata().context("failed to stat snapshot")?.len();
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to atomically move snapshot `{}` to `{}`",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(bytes)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replay a snapshot into an empty database.
pub(crate) fn restore_snapshot(conn: &Connection, path: &Path) -> Result<()> {
    let file = File::open(path)
        .with_context(|| format!("failed to open snapshot `{}`", path.display()))?;
    let mut sql = String::new();
    GzDecoder::new(BufReader::new(file))
        .read_to_string(&mut sql)
        .with_context(|| format!("failed to decompress snapshot `{}`", path.display()))?;

    if let Err(error) = conn.execute_batch(&sql) {
        if !conn.is_autocommit() {
            let _ = conn.execute_batch("ROLLBACK");
        }
        return Err(error).with_context(|| format!("failed to replay snapshot `{}`", path.display()));
    }
    info!(path = %path.display(), bytes = sql.len(), "restored database from snapshot");
    Ok(())
}
