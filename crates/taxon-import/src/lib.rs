//! Taxonomy feed import.
//!
//! The feed is a JSON array of records or JSON Lines, one record per skill.
//! Each record is validated on its own; a bad row is counted and skipped.
//!
//! [`ImportPipeline`] loads a parsed feed in two passes:
//!
//! 1. upsert every node by canonical key
//! 2. attach synonyms, resolve parent references, create relations to named skills
//!
//! Re-importing the same feed writes nothing new.

pub mod error;
pub mod feed;
pub mod pipeline;

pub use error::{ImportError, ImportResult};
pub use feed::{parse_feed, read_feed, FeedRecord, ParsedFeed};
pub use pipeline::{ImportPipeline, ImportSummary, FEED_PROVENANCE, PROGRESS_EVERY};
