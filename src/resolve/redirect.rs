use crate::dump::RedirectRow;
use crate::store::{RedirectRecord, StoreBatch, Watermark, successor_version};

/// Writes the next generation of `row.source_id`.
///
/// An id present at the watermark gets version `watermark + 1` even when its
/// target title is unchanged; any other id (re)starts at version 0.
pub fn resolve_redirect(
    batch: &StoreBatch<'_>,
    row: &RedirectRow<'_>,
    watermark: Watermark,
) -> rusqlite::Result<RedirectRecord> {
    let version = match watermark.get() {
        None => 0,
        Some(current) => match batch.redirect_at(row.source_id, current)? {
            Some(_) => successor_version(current)?,
            None => 0,
        },
    };

    let record = RedirectRecord {
        source_id: row.source_id,
        target_title: row.target_title.to_string(),
        version,
    };
    batch.insert_redirect(&record)?;
    Ok(record)
}
