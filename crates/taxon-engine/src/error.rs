use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config serialization failed: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] taxon_store::StoreError),

    #[error("normalization error: {0}")]
    Normalize(#[from] taxon_normalize::NormalizeError),

    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] taxon_hierarchy::HierarchyError),

    #[error("merge error: {0}")]
    Merge(#[from] taxon_merge::MergeError),

    #[error("import error: {0}")]
    Import(#[from] taxon_import::ImportError),
}

pub type EngineResult<T> = Result<T, EngineError>;
