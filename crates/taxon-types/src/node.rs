//! Skill nodes: the concepts of the controlled vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::SkillId;
use crate::temporal::Timestamp;

/// Default `skill_type` for nodes whose feed row does not name one.
pub const DEFAULT_SKILL_TYPE: &str = "TECHNICAL";

/// Lifecycle state of a node. Nodes are never physically deleted; a merged
/// duplicate is kept as `Deprecated` with a forwarding pointer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillStatus {
    #[default]
    Active,
    Deprecated,
}

impl SkillStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SkillStatus::Active => "ACTIVE",
            SkillStatus::Deprecated => "DEPRECATED",
        }
    }
}

impl fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(SkillStatus::Active),
            "DEPRECATED" => Ok(SkillStatus::Deprecated),
            _ => Err(TypeError::InvalidStatus(s.to_string())),
        }
    }
}

/// Numeric weight and demand attributes.
///
/// `demand_score` drives canonical selection during merges; the other
/// weights are carried for downstream matching.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkillWeights {
    pub base_weight: f64,
    pub demand_score: f64,
    pub trending_score: f64,
}

impl Default for SkillWeights {
    fn default() -> Self {
        Self {
            base_weight: 0.5,
            demand_score: 0.5,
            trending_score: 0.0,
        }
    }
}

/// A vocabulary concept.
///
/// `parent_id` is a weak reference: the node it names may be missing or, on
/// malformed input, form a cycle. `hierarchy_path` is a cache maintained by
/// the hierarchy pass and is `None` until first computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkillNode {
    pub id: SkillId,
    pub display_name: String,
    pub canonical_key: String,
    #[serde(default)]
    pub skill_code: Option<String>,
    pub skill_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub skill_level: u32,
    #[serde(default)]
    pub parent_id: Option<SkillId>,
    pub status: SkillStatus,
    #[serde(default)]
    pub merged_into_id: Option<SkillId>,
    pub weights: SkillWeights,
    #[serde(default)]
    pub hierarchy_path: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SkillNode {
    pub fn is_active(&self) -> bool {
        self.status == SkillStatus::Active
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Mark this node as absorbed by `canonical`.
    pub fn deprecate_into(&mut self, canonical: SkillId, at: Timestamp) {
        self.status = SkillStatus::Deprecated;
        self.merged_into_id = Some(canonical);
        self.updated_at = at;
    }

    /// Undo [`deprecate_into`](Self::deprecate_into).
    pub fn reactivate(&mut self, at: Timestamp) {
        self.status = SkillStatus::Active;
        self.merged_into_id = None;
        self.updated_at = at;
    }
}

/// Insert/upsert payload for a node. The store assigns the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSkillNode {
    pub display_name: String,
    pub canonical_key: String,
    pub skill_code: Option<String>,
    pub skill_type: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub skill_level: u32,
    pub weights: SkillWeights,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl NewSkillNode {
    pub fn new(display_name: impl Into<String>, canonical_key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            canonical_key: canonical_key.into(),
            skill_code: None,
            skill_type: DEFAULT_SKILL_TYPE.to_string(),
            category: None,
            subcategory: None,
            skill_level: 0,
            weights: SkillWeights::default(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_demand(mut self, demand_score: f64) -> Self {
        self.weights.demand_score = demand_score;
        self
    }

    pub fn with_created_at(mut self, at: Timestamp) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Materialize into a node with the given id; missing timestamps become `now`.
    pub fn into_node(self, id: SkillId, now: Timestamp) -> SkillNode {
        SkillNode {
            id,
            display_name: self.display_name,
            canonical_key: self.canonical_key,
            skill_code: self.skill_code,
            skill_type: self.skill_type,
            category: self.category,
            subcategory: self.subcategory,
            skill_level: self.skill_level,
            parent_id: None,
            status: SkillStatus::Active,
            merged_into_id: None,
            weights: self.weights,
            hierarchy_path: None,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        }
    }
}
