// Plain-file exports of a domain's pages and of all uploads.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use super::Store;
use crate::error::StoreResult;

impl Store {
    /// Write every non-empty page of `domain` to `dir` as
    /// `<slug>-<id>.md`. Returns the number of files written.
    pub fn export_domain(&self, domain: &str, dir: &Path) -> StoreResult<usize> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export directory `{}`", dir.display()))?;

        let mut written = 0;
        for page in self.get_all(domain, false)?.into_iter().filter(|page| !page.is_empty()) {
            let path = dir.join(format!("{}-{}.md", file_safe(&page.slug, "untitled"), page.id));
            fs::write(&path, &page.data)
                .with_context(|| format!("failed to write `{}`", path.display()))?;
            written += 1;
        }

        info!(domain, dir = %dir.display(), pages = written, "exported domain");
        Ok(written)
    }

    /// Write every blob, decompressed, to `dir` as `<id>-<name>`.
    pub fn export_blobs(&self, dir: &Path) -> StoreResult<usize> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export directory `{}`", dir.display()))?;

        let blobs = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare("SELECT id, name, data FROM blobs ORDER BY id")
                .context("failed to prepare blob export")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?))
                })
                .context("failed to query blobs for export")?;
            rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to collect blobs")?
        };

        for (id, name, compressed) in &blobs {
            let path = dir.join(format!("{id}-{}", file_safe(name, "blob")));
            fs::write(&path, super::decompress(compressed)?)
                .with_context(|| format!("failed to write `{}`", path.display()))?;
        }

        info!(dir = %dir.display(), blobs = blobs.len(), "exported blobs");
        Ok(blobs.len())
    }
}

/// Longest name part kept, leaving room for the id and extension within
/// the usual 255-byte file name limit.
const MAX_NAME_BYTES: usize = 160;

/// Keep names to a single, bounded path component.
fn file_safe(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');

    let mut end = trimmed.len().min(MAX_NAME_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        fallback.to_owned()
    } else {
        trimmed[..end].to_owned()
    }
}
