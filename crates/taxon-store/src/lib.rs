//! Store boundary for the taxon engine.
//!
//! The relational store that owns the taxonomy is an external collaborator.
//! This crate pins down what the engine needs from it:
//!
//! - [`TaxonomyReader`] -- consistent read view (nodes, edges, cross-refs, merge log)
//! - [`TaxonomyWriter`] -- CRUD with enforced uniqueness, bulk cross-ref repoint
//! - [`TaxonomyStore`] -- entry point handing out read views and atomic transactions
//!
//! # Backends
//!
//! - [`InMemoryTaxonomyStore`] -- `RwLock`-guarded state with undo-journal
//!   transactions and JSON snapshot persistence; used by tests and the CLI
//!
//! # Design Rules
//!
//! 1. Components receive a store handle at construction; nothing reaches for a global.
//! 2. Every write happens inside [`TaxonomyStore::transaction`]; an `Err` from the
//!    closure discards all of its writes.
//! 3. Uniqueness violations are reported as [`StoreError::UniqueViolation`] so
//!    callers can tell "redundant row" apart from genuine failures.
//! 4. Nodes are never deleted.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult, UniqueConstraint};
pub use memory::{InMemoryTaxonomyStore, StoreStats, TaxonomyState};
pub use traits::{TaxonomyReader, TaxonomyStore, TaxonomyWriter, Upserted};
