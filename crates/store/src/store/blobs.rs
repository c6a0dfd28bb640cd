// Content-addressed uploads, stored gzip-compressed, plus a read-through
// cache of resized variants keyed by the same id.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::Store;
use crate::error::{StoreError, StoreResult};

const BLOB_ID_PREFIX: &str = "sha256-";

/// A stored upload. `data` is gzip-compressed; see [`Blob::decompressed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: String,
    pub name: String,
    pub data: Vec<u8>,
    /// Views recorded before this read.
    pub views: i64,
}

impl Blob {
    pub fn decompressed(&self) -> Result<Vec<u8>> {
        decompress(&self.data)
    }
}

/// The conventional id for an upload: `sha256-<hex digest>`.
pub fn blob_id_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut id = String::with_capacity(BLOB_ID_PREFIX.len() + digest.len() * 2);
    id.push_str(BLOB_ID_PREFIX);
    for byte in digest {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).context("failed to compress blob")?;
    encoder.finish().context("failed to finish blob compression")
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).context("failed to decompress blob")?;
    Ok(out)
}

impl Store {
    /// Insert or replace the blob `id`. The id is not checked against the
    /// bytes.
    pub fn put_blob(&self, id: &str, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let compressed = compress(bytes)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO blobs (id, name, data, views) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, data = excluded.data",
            params![id, name, compressed],
        )
        .context("failed to save blob")?;
        debug!(blob_id = id, size = bytes.len(), "saved blob");
        Ok(())
    }

    /// Read a blob and count the view.
    pub fn get_blob(&self, id: &str) -> StoreResult<Blob> {
        let conn = self.lock();
        let blob = load_blob(&conn, id)?.ok_or(StoreError::NotFound)?;
        conn.execute("UPDATE blobs SET views = views + 1 WHERE id = ?1", params![id])
            .context("failed to count blob view")?;
        Ok(blob)
    }

    pub fn put_resized(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let compressed = compress(bytes)?;
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO resized_blobs (id, data) VALUES (?1, ?2)",
            params![id, compressed],
        )
        .context("failed to save resized blob")?;
        Ok(())
    }

    /// Decompressed resized variant of `id`.
    pub fn get_resized(&self, id: &str) -> StoreResult<Vec<u8>> {
        let conn = self.lock();
        let compressed: Vec<u8> = conn
            .query_row("SELECT data FROM resized_blobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .context("failed to read resized blob")?
            .ok_or(StoreError::NotFound)?;
        Ok(decompress(&compressed)?)
    }

    /// Return the cached resized variant, or build it from the original with
    /// `resize` and cache it. `resize` runs without the store lock held.
    pub fn get_or_create_resized<F>(&self, id: &str, resize: F) -> StoreResult<Vec<u8>>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        match self.get_resized(id) {
            Ok(bytes) => return Ok(bytes),
            Err(StoreError::NotFound) => {}
            Err(error) => return Err(error),
        }

        let original = self.get_blob(id)?.decompressed()?;
        let resized = resize(&original).with_context(|| format!("failed to resize blob {id}"))?;
        self.put_resized(id, &resized)?;
        debug!(blob_id = id, size = resized.len(), "cached resized blob");
        Ok(resized)
    }

    pub fn list_blob_ids(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id FROM blobs ORDER BY id").context("failed to prepare blob list")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("failed to list blobs")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to collect blob ids")?;
        Ok(ids)
    }
}

fn load_blob(conn: &Connection, id: &str) -> Result<Option<Blob>> {
    conn.query_row("SELECT id, name, data, views FROM blobs WHERE id = ?1", params![id], |row| {
        Ok(Blob { id: row.get(0)?, name: row.get(1)?, data: row.get(2)?, views: row.get(3)? })
    })
    .optional()
    .context("failed to read blob")
}
