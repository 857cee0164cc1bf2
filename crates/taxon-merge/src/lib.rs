//! Merging duplicate skill nodes, and undoing merges.
//!
//! A merge absorbs every non-canonical member of a collision group into the
//! canonical node, one duplicate per transaction. Every migrated synonym
//! and relation records the duplicate it came from in its `merge_trail`,
//! and every merge appends a [`MergeRecord`](taxon_types::MergeRecord) with
//! the children and cross-references it moved. Rollback reads those back.
//!
//! - [`select_canonical`] -- deterministic winner of a collision group
//! - [`MergeEngine`] -- migrates synonyms, relations, cross-refs and children, then deprecates
//! - [`RollbackEngine`] -- reverses merge records, newest first
//! - [`report`] -- the append-only merge report file

pub mod canonical;
pub mod engine;
pub mod error;
pub mod report;
pub mod rollback;

pub use canonical::{canonical_order, select_canonical};
pub use engine::{DuplicateOutcome, MergeEngine, MergeOutcome, MergeSummary, MigrationCounts};
pub use error::{MergeError, MergeResult};
pub use report::{append_report, parse_report, read_report, render_report_line, ReportEntry};
pub use rollback::{RollbackEngine, RollbackSummary};
