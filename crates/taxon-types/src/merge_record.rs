//! Merge audit records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{CrossRefId, SkillId};
use crate::temporal::Timestamp;

/// Append-only audit entry pairing a duplicate with the canonical node that
/// absorbed it. Written in the same transaction as the migration it
/// describes and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Merge run this record belongs to.
    pub batch_id: Uuid,
    pub canonical_id: SkillId,
    pub duplicate_id: SkillId,
    /// The shared key that put both nodes in one collision group.
    pub collision_key: String,
    pub merged_at: Timestamp,
    /// Nodes that were parented to the duplicate and moved to the canonical node.
    #[serde(default)]
    pub moved_children: Vec<SkillId>,
    /// Cross-reference rows repointed from the duplicate.
    #[serde(default)]
    pub repointed_refs: Vec<CrossRefId>,
}

impl MergeRecord {
    pub fn new(
        batch_id: Uuid,
        canonical_id: SkillId,
        duplicate_id: SkillId,
        collision_key: impl Into<String>,
        merged_at: Timestamp,
    ) -> Self {
        Self {
            batch_id,
            canonical_id,
            duplicate_id,
            collision_key: collision_key.into(),
            merged_at,
            moved_children: Vec::new(),
            repointed_refs: Vec::new(),
        }
    }
}
