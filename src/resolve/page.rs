use serde::Serialize;

use crate::dump::PageRow;
use crate::store::{PageRecord, StoreBatch, Watermark, successor_version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageResolution {
    Written(PageRecord),
    /// No redirect record exists at the version the page would move to.
    MissingPeer { page_id: u32, wanted_version: u32 },
}

/// Binds `row.page_id` to the redirect generation after its current one.
///
/// With no page records yet the page binds to redirect version 0. Otherwise
/// the page moves to `existing.version + 1` when it has a record at the
/// watermark, or catches up to `watermark + 1` when it does not. Nothing is
/// written unless a redirect record exists at exactly that version.
pub fn resolve_page(
    batch: &StoreBatch<'_>,
    row: &PageRow<'_>,
    watermark: Watermark,
) -> rusqlite::Result<PageResolution> {
    let wanted_version = match watermark.get() {
        None => 0,
        Some(current) => match batch.page_at(row.page_id, current)? {
            Some(existing) => successor_version(existing.version)?,
            None => successor_version(current)?,
        },
    };

    let Some(redirect) = batch.redirect_at(row.page_id, wanted_version)? else {
        return Ok(PageResolution::MissingPeer {
            page_id: row.page_id,
            wanted_version,
        });
    };

    let record = PageRecord::resolved_against(row.page_id, row.local_title, &redirect);
    batch.insert_page(&record)?;
    Ok(PageResolution::Written(record))
}
