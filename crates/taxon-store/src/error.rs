use std::fmt;

use taxon_types::{RelationId, SkillId, SynonymId, TypeError};

/// Uniqueness constraints enforced by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueConstraint {
    /// `SkillNode.canonical_key`
    NodeKey,
    /// `(SynonymEdge.owner_id, SynonymEdge.canonical_key)`
    SynonymOwnerKey,
    /// `(RelationEdge.source_id, RelationEdge.target_id, RelationEdge.relation_type)`
    RelationTriple,
}

impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniqueConstraint::NodeKey => "skill_canonical_key",
            UniqueConstraint::SynonymOwnerKey => "synonym_owner_key",
            UniqueConstraint::RelationTriple => "relation_source_target_type",
        };
        f.write_str(name)
    }
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("skill node not found: {0}")]
    NodeNotFound(SkillId),

    #[error("synonym not found: {0}")]
    SynonymNotFound(SynonymId),

    #[error("relation not found: {0}")]
    RelationNotFound(RelationId),

    /// A write would duplicate a unique key. Merge treats this as "row is redundant".
    #[error("unique constraint {constraint} violated: {detail}")]
    UniqueViolation {
        constraint: UniqueConstraint,
        detail: String,
    },

    #[error("relation would be a self-loop on node {0}")]
    SelfLoop(SkillId),

    #[error("node {0} cannot be its own parent")]
    SelfParent(SkillId),

    #[error("invalid field: {0}")]
    InvalidField(#[from] TypeError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
