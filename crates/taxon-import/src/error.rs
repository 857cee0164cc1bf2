use std::path::PathBuf;

use taxon_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document as a whole is not a JSON array or JSON Lines.
    #[error("malformed feed: {0}")]
    Feed(#[from] serde_json::Error),
}

pub type ImportResult<T> = Result<T, ImportError>;
