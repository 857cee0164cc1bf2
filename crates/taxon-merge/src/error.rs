use std::path::PathBuf;

use taxon_store::StoreError;
use taxon_types::SkillId;

/// Errors from merge and rollback.
///
/// Per-duplicate failures are counted by the engines and do not stop a run;
/// these surface only from single-duplicate calls or from reads that
/// precede any write.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("re-parenting node {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: SkillId, parent: SkillId },

    #[error("canonical node {0} is not active")]
    CanonicalInactive(SkillId),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type MergeResult<T> = Result<T, MergeError>;
