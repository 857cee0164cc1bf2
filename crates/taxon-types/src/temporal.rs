//! Wall-clock timestamps.
//!
//! The engine only needs a total order on creation time (canonical selection
//! tie-break) and a human-readable audit stamp, so UTC `chrono` timestamps
//! are used throughout.

use chrono::{DateTime, Utc};

/// UTC timestamp attached to nodes and merge records.
pub type Timestamp = DateTime<Utc>;

/// The current wall-clock time.
pub fn now() -> Timestamp {
    Utc::now()
}
