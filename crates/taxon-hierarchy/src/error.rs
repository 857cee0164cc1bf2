use taxon_store::StoreError;
use taxon_types::SkillId;

/// A node whose path cannot be computed from the current parent links.
///
/// These are fatal for the node and every descendant, never for the batch.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("parent cycle reached at node {0}")]
    CycleDetected(SkillId),

    #[error("node {node} references missing parent {parent}")]
    DanglingParent { node: SkillId, parent: SkillId },

    #[error("hierarchy under node {node} is deeper than {max_depth} levels")]
    DepthExceeded { node: SkillId, max_depth: usize },
}

/// Errors from hierarchy passes.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// The parent of `node` changed after the snapshot the batch was computed from.
    #[error("parent of node {node} changed since the snapshot was taken")]
    StaleSnapshot { node: SkillId },
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;
