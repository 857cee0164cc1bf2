use serde::{Deserialize, Serialize};

use crate::id::{CrossRefId, SkillId};

/// Externally owned row carrying a foreign key to a skill node.
///
/// The engine repoints these on merge but never creates or deletes them;
/// `kind` names the owning collaborator (`PROFILE_SKILL`, `JOB_REQUIRED_SKILL`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub id: CrossRefId,
    pub kind: String,
    pub skill_id: SkillId,
}
