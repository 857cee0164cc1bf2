//! Taxonomy graph consistency engine.
//!
//! [`TaxonomyEngine`] owns one store and one [`EngineConfig`] and exposes
//! every offline pass: import, normalization, cycle detection, path
//! rebuilding, merge and rollback. This is the entry point for
//! applications embedding the engine.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{EngineConfig, HierarchyConfig, MergeConfig, NormalizeConfig, CONFIG_FILE_NAME};
pub use engine::{MergeRun, RollbackRun, TaxonomyEngine};
pub use error::{EngineError, EngineResult};

// Re-export the pieces callers need to drive the engine
pub use taxon_hierarchy::{CycleReport, PathSummary};
pub use taxon_import::ImportSummary;
pub use taxon_merge::{MergeSummary, RollbackSummary};
pub use taxon_normalize::{CollisionGroup, KeyBasis, NormalizeReport, NormalizeSummary, ResolveMode};
pub use taxon_store::{InMemoryTaxonomyStore, StoreStats, TaxonomyStore};
pub use taxon_types::{SkillId, SkillNode};
