use std::io;

use thiserror::Error;

use crate::store::is_constraint_violation;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open dump `{path}`: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read dump `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Duplicate composite key, dangling foreign key or oversized title.
    #[error("{table} dump line {line}: store rejected write: {source}")]
    Conflict {
        table: &'static str,
        line: usize,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{table} dump line {line}: {source}")]
    Store {
        table: &'static str,
        line: usize,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl IngestError {
    pub(crate) fn at_line(table: &'static str, line: usize, source: rusqlite::Error) -> Self {
        if is_constraint_violation(&source) {
            Self::Conflict {
                table,
                line,
                source,
            }
        } else {
            Self::Store {
                table,
                line,
                source,
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open_error",
            Self::Read { .. } => "read_error",
            Self::Conflict { .. } => "schema_violation",
            Self::Store { .. } | Self::Sqlite(_) => "sqlite_error",
        }
    }

    /// 1-based dump line the failure happened on, when it happened mid-pass.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Conflict { line, .. } | Self::Store { line, .. } => Some(*line),
            _ => None,
        }
    }
}
