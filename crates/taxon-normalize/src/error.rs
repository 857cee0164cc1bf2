use std::path::PathBuf;

use taxon_store::StoreError;

/// Errors from normalization passes and the review file codec.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown key basis: {0:?} (expected \"name\" or \"name_and_category\")")]
    UnknownBasis(String),
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;
