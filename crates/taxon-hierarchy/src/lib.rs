//! Hierarchy structure for the taxon engine.
//!
//! Skill nodes form a forest through single `parent_id` links. This crate
//! validates that forest and maintains the `hierarchy_path` cache derived
//! from it.
//!
//! - [`CycleDetector`] -- three-state walk over parent links; reports cycles and dangling links
//! - [`would_create_cycle`] / [`would_create_cycle_in`] -- pre-flight check for a single re-parenting
//! - [`compute_paths`] -- `/root/.../node/` for every node from one snapshot of links
//! - [`HierarchyPathBuilder`] -- writes changed paths in batched transactions

pub mod cycle;
pub mod error;
pub mod path;

pub use cycle::{
    would_create_cycle, would_create_cycle_in, CycleDetector, CycleReport, DanglingLink, ParentLinks,
};
pub use error::{HierarchyError, HierarchyResult, StructuralError};
pub use path::{
    compute_paths, HierarchyPathBuilder, PathComputation, PathSummary, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_DEPTH,
};
