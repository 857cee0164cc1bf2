//! Canonical key normalization for the taxon engine.
//!
//! - [`normalize`] -- pure, idempotent text canonicalization
//! - [`CollisionIndex`] -- groups ACTIVE nodes sharing a canonical key
//! - [`HashDisambiguator`] -- deterministic `base__hash[_n]` keys for auto-resolve mode
//! - [`review`] -- collision review file codec
//! - [`NormalizationPass`] -- the batch pass that rewrites node and synonym keys

pub mod collision;
pub mod error;
pub mod fingerprint;
pub mod pass;
pub mod review;
pub mod text;

pub use collision::{CollisionGroup, CollisionIndex, KeyBasis};
pub use error::{NormalizeError, NormalizeResult};
pub use fingerprint::{fingerprint, FingerprintContext, HashDisambiguator};
pub use pass::{NormalizationPass, NormalizeOptions, NormalizeReport, NormalizeSummary, ResolveMode};
pub use text::{normalize, normalize_with_category};
