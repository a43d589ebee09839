use serde::Serialize;

use crate::store::{PageRecord, RedirectRecord, VersionedStore, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub current_pages: u64,
    pub current_roots: u64,
    pub page_watermark: Watermark,
    pub redirect_watermark: Watermark,
    /// Redirect ids whose own latest version is below `redirect_watermark`.
    pub lagging_roots: u64,
}

/// Counts against freshly read maxima; nothing here is cached across passes.
pub fn summary(store: &VersionedStore) -> rusqlite::Result<Summary> {
    Ok(Summary {
        current_pages: store.count_current_pages()?,
        current_roots: store.count_current_roots()?,
        page_watermark: store.max_page_version()?,
        redirect_watermark: store.max_redirect_version()?,
        lagging_roots: store.count_lagging_roots()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    pub id: u32,
    pub latest_redirect_version: Option<u32>,
    pub redirects: Vec<RedirectRecord>,
    pub pages: Vec<PageRecord>,
}

pub fn history(store: &VersionedStore, id: u32) -> rusqlite::Result<History> {
    Ok(History {
        id,
        latest_redirect_version: store.latest_redirect_version(id)?,
        redirects: store.redirect_history(id)?,
        pages: store.page_history(id)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub page_id: u32,
    pub as_of: Option<u32>,
    pub page: Option<PageRecord>,
}

/// What `page_id` resolved to as of `as_of`, or as of the current page
/// watermark when `as_of` is `None`.
pub fn resolve_as_of(
    store: &VersionedStore,
    page_id: u32,
    as_of: Option<u32>,
) -> rusqlite::Result<Resolution> {
    let as_of = match as_of {
        Some(version) => Some(version),
        None => store.max_page_version()?.get(),
    };
    let page = match as_of {
        Some(version) => store.page_as_of(page_id, version)?,
        None => None,
    };
    Ok(Resolution {
        page_id,
        as_of,
        page,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub orphaned_pages: Vec<PageRecord>,
    pub broken_chains: Vec<u32>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_pages.is_empty() && self.broken_chains.is_empty()
    }
}

pub fn check_integrity(store: &VersionedStore) -> rusqlite::Result<IntegrityReport> {
    Ok(IntegrityReport {
        orphaned_pages: store.orphaned_pages()?,
        broken_chains: store.broken_chains()?,
    })
}
