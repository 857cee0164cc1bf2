//! Foundation types for the taxon skill-taxonomy engine.
//!
//! Every other taxon crate depends on `taxon-types`. The types here describe
//! the controlled vocabulary as the store sees it; none of them perform I/O.
//!
//! # Key Types
//!
//! - [`SkillNode`]: a vocabulary concept with a parent link and a cached hierarchy path
//! - [`SynonymEdge`]: alternate text owned by a node
//! - [`RelationEdge`]: typed link between two nodes
//! - [`CrossReference`]: externally owned row pointing at a node
//! - [`MergeRecord`]: append-only audit entry written by a merge
//! - [`SkillId`] and friends: store-assigned numeric identifiers

pub mod cross_ref;
pub mod edge;
pub mod error;
pub mod id;
pub mod merge_record;
pub mod node;
pub mod temporal;

pub use cross_ref::CrossReference;
pub use edge::{
    Endpoint, EndpointMigration, NewRelation, NewSynonym, RelationEdge, RelationType, SynonymEdge,
};
pub use error::TypeError;
pub use id::{CrossRefId, RelationId, SkillId, SynonymId};
pub use merge_record::MergeRecord;
pub use node::{NewSkillNode, SkillNode, SkillStatus, SkillWeights};
pub use temporal::{now, Timestamp};
