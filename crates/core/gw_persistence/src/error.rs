use thiserror::Error;

/// Persistence errors are always logged by the caller and the affected
/// operation reports failure; the queue itself is left in a consistent
/// state — no partial files.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence directory '{path}' does not exist")]
    MissingDirectory { path: String },

    #[error("i/o error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed persisted message file '{path}': missing channel/payload delimiter")]
    MalformedRecord { path: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
