use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectRecord {
    pub source_id: u32,
    pub target_title: String,
    pub version: u32,
}

/// Resolution of a redirect-flagged page against one exact redirect version.
/// `resolved_title` is copied at write time, not joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub page_id: u32,
    pub resolved_source_id: u32,
    pub resolved_title: String,
    pub local_title: String,
    pub version: u32,
}

impl PageRecord {
    pub fn resolved_against(page_id: u32, local_title: &str, redirect: &RedirectRecord) -> Self {
        Self {
            page_id,
            resolved_source_id: redirect.source_id,
            resolved_title: redirect.target_title.clone(),
            local_title: local_title.to_string(),
            version: redirect.version,
        }
    }
}

/// Global maximum version of a table, captured once at the start of a pass.
///
/// This is one scalar shared by every entity; an entity's own latest version
/// can lag behind it (see `VersionedStore::latest_redirect_version`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Watermark(Option<u32>);

impl Watermark {
    pub const EMPTY: Watermark = Watermark(None);

    pub fn at(version: u32) -> Self {
        Self(Some(version))
    }

    pub fn get(self) -> Option<u32> {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0.is_none()
    }
}

impl From<Option<u32>> for Watermark {
    fn from(value: Option<u32>) -> Self {
        Self(value)
    }
}

/// Counters for one pass over one dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PassStats {
    pub lines_read: u64,
    pub insert_lines: u64,
    pub tuples_seen: u64,
    pub rows_qualified: u64,
    pub records_written: u64,
    pub missing_peers: u64,
}

/// One completed pass as kept in the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub table: String,
    pub dump_path: String,
    pub dump_sha256: String,
    pub watermark: Watermark,
    pub started_at: String,
    pub finished_at: String,
    pub stats: PassStats,
}
