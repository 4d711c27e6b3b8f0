use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store is not open")]
    NotOpen,
    #[error("history store is closed")]
    Closed,
    #[error("failed to open history database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(i64),
    #[error("schema version could not be read")]
    VersionUnreadable,
    #[error("migration from schema version {from} failed: {source}")]
    Migration {
        from: i64,
        #[source]
        source: Box<HistoryError>,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("history worker is unavailable")]
    WorkerGone,
}

impl HistoryError {
    /// Native SQLite error code of the underlying failure, if there is one.
    pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            HistoryError::Sqlite(err) | HistoryError::Open { source: err, .. } => err.sqlite_error_code(),
            HistoryError::Migration { source, .. } => source.sqlite_code(),
            _ => None,
        }
    }
}
