// Schema migrations for the wiki database.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE domains (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL UNIQUE COLLATE NOCASE,
    hashed_password TEXT NOT NULL DEFAULT '',
    is_public       INTEGER NOT NULL DEFAULT 0,
    options         TEXT NOT NULL DEFAULT '{}'
);

INSERT INTO domains (name, hashed_password, is_public, options)
    VALUES ('public', '', 1, '{}');

CREATE TABLE pages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    domain_id   INTEGER NOT NULL,
    slug        TEXT NOT NULL,
    created     TEXT NOT NULL,
    modified    TEXT NOT NULL,
    history     TEXT NOT NULL,
    views       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX pages_slug_idx
    ON pages (domain_id, slug);

CREATE INDEX pages_modified_idx
    ON pages (domain_id, modified);

CREATE VIRTUAL TABLE page_fts USING fts5(
    page_id UNINDEXED,
    content,
    tokenize = 'unicode61'
);

CREATE TABLE session_keys (
    key         TEXT PRIMARY KEY,
    domain_id   INTEGER NOT NULL,
    last_used   TEXT NOT NULL
);

CREATE INDEX session_keys_last_used_idx
    ON session_keys (last_used);

CREATE TABLE similar_pages (
    source_id   TEXT NOT NULL,
    similar_id  TEXT NOT NULL,
    rank        INTEGER NOT NULL,
    PRIMARY KEY (source_id, similar_id)
);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE blobs (
    id      TEXT PRIMARY KEY,
    name    TEXT NOT NULL,
    data    BLOB NOT NULL,
    views   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE resized_blobs (
    id      TEXT PRIMARY KEY,
    data    BLOB NOT NULL
);

CREATE TABLE render_cache (
    key         TEXT PRIMARY KEY,
    rendered_at TEXT NOT NULL,
    payload     BLOB NOT NULL
);
"#;

pub(crate) const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

pub(crate) fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )
    .context("failed to configure sqlite pragmas")
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    ensure_migration_table(conn)?;
    apply_pending_migrations(conn)
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

/// True when the database holds no schema objects at all.
pub(crate) fn is_empty(conn: &Connection) -> Result<bool> {
    let objects: i64 = conn
        .query_row("SELECT COUNT(1) FROM sqlite_master", [], |row| row.get(0))
        .context("failed to inspect database schema")?;
    Ok(objects == 0)
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::*;

    const EXPECTED_TABLES: &[&str] = &[
        "schema_migrations",
        "domains",
        "pages",
        "page_fts",
        "session_keys",
        "similar_pages",
        "blobs",
        "resized_blobs",
        "render_cache",
    ];

    #[test]
    fn migrate_creates_schema_and_records_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        for table in EXPECTED_TABLES {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("table existence query should succeed");
            assert_eq!(exists, 1, "expected `{table}` table to exist");
        }

        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn configured_file_without_tables_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut conn = Connection::open(dir.path().join("wiki.db")).unwrap();
        configure(&conn).unwrap();
        assert!(is_empty(&conn).unwrap());

        migrate(&mut conn).unwrap();
        assert!(!is_empty(&conn).unwrap());
    }

    #[test]
    fn public_domain_is_seeded_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wiki.db");
        {
            let mut conn = Connection::open(&path).unwrap();
            migrate(&mut conn).unwrap();
        }
        let mut conn = Connection::open(&path).unwrap();
        migrate(&mut conn).unwrap();

        let (count, hash, is_public): (i64, String, bool) = conn
            .query_row(
                "SELECT COUNT(*), MAX(hashed_password), MAX(is_public) FROM domains WHERE name = 'PUBLIC'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(hash, "");
        assert!(is_public);

        let migration_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(migration_rows, 2);
    }

    #[test]
    fn existing_v1_schema_is_upgraded() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_migration_table(&conn).unwrap();
        conn.execute_batch(MIGRATION_V1_SQL).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (1, datetime('now'))",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }
}
