//! Synonym and relation edges.
//!
//! Both edge kinds carry a `merge_trail`: the merge engine pushes an entry
//! whenever it migrates an edge away from a duplicate, and rollback pops it.
//! This makes rollback an exact reverse of the migration instead of a guess.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{RelationId, SkillId, SynonymId};

/// Alternate text for a node. `(owner_id, canonical_key)` is unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynonymEdge {
    pub id: SynonymId,
    pub owner_id: SkillId,
    pub raw_text: String,
    pub canonical_key: String,
    pub locale: String,
    pub confidence: f64,
    pub provenance: String,
    /// Duplicates this synonym was migrated away from, most recent last.
    #[serde(default)]
    pub merge_trail: Vec<SkillId>,
}

impl SynonymEdge {
    /// The duplicate this synonym was most recently migrated from, if any.
    pub fn migrated_from(&self) -> Option<SkillId> {
        self.merge_trail.last().copied()
    }
}

/// Insert payload for a synonym.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSynonym {
    pub owner_id: SkillId,
    pub raw_text: String,
    pub canonical_key: String,
    pub locale: String,
    pub confidence: f64,
    pub provenance: String,
}

impl NewSynonym {
    pub fn new(
        owner_id: SkillId,
        raw_text: impl Into<String>,
        canonical_key: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            raw_text: raw_text.into(),
            canonical_key: canonical_key.into(),
            locale: "en".into(),
            confidence: 1.0,
            provenance: "MANUAL".into(),
        }
    }

    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }
}

/// Relation type. Open enum: unknown names round-trip through `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    CommonlyWith,
    Prerequisite,
    Alternative,
    Specialization,
    Other(String),
}

impl RelationType {
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::CommonlyWith => "COMMONLY_WITH",
            RelationType::Prerequisite => "PREREQUISITE",
            RelationType::Alternative => "ALTERNATIVE",
            RelationType::Specialization => "SPECIALIZATION",
            RelationType::Other(name) => name,
        }
    }
}

impl From<String> for RelationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "COMMONLY_WITH" => RelationType::CommonlyWith,
            "PREREQUISITE" => RelationType::Prerequisite,
            "ALTERNATIVE" => RelationType::Alternative,
            "SPECIALIZATION" => RelationType::Specialization,
            _ => RelationType::Other(value),
        }
    }
}

impl From<RelationType> for String {
    fn from(value: RelationType) -> Self {
        match value {
            RelationType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of a relation edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endpoint {
    Source,
    Target,
}

impl Endpoint {
    pub fn opposite(self) -> Self {
        match self {
            Endpoint::Source => Endpoint::Target,
            Endpoint::Target => Endpoint::Source,
        }
    }
}

/// One endpoint migration recorded on a relation edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMigration {
    pub duplicate: SkillId,
    pub endpoint: Endpoint,
}

/// Typed link between two nodes. `(source_id, target_id, relation_type)` is
/// unique and `source_id != target_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub id: RelationId,
    pub source_id: SkillId,
    pub target_id: SkillId,
    pub relation_type: RelationType,
    pub strength: f64,
    pub bidirectional: bool,
    #[serde(default)]
    pub merge_trail: Vec<EndpointMigration>,
}

impl RelationEdge {
    pub fn endpoint(&self, which: Endpoint) -> SkillId {
        match which {
            Endpoint::Source => self.source_id,
            Endpoint::Target => self.target_id,
        }
    }

    pub fn set_endpoint(&mut self, which: Endpoint, id: SkillId) {
        match which {
            Endpoint::Source => self.source_id = id,
            Endpoint::Target => self.target_id = id,
        }
    }

    pub fn touches(&self, id: SkillId) -> bool {
        self.source_id == id || self.target_id == id
    }

    /// The most recent migration recorded on this edge.
    pub fn last_migration(&self) -> Option<EndpointMigration> {
        self.merge_trail.last().copied()
    }
}

/// Insert payload for a relation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    pub source_id: SkillId,
    pub target_id: SkillId,
    pub relation_type: RelationType,
    pub strength: f64,
    pub bidirectional: bool,
}

impl NewRelation {
    pub fn new(source_id: SkillId, target_id: SkillId, relation_type: RelationType) -> Self {
        Self {
            source_id,
            target_id,
            relation_type,
            strength: 0.5,
            bidirectional: false,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }
}
