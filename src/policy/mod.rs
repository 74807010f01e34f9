//! Admission Policy
//!
//! Pure, synchronous filters owned by the bridge state. They never touch
//! a backend or a timer; the orchestrator feeds them and acts on verdicts.
//!
//! - `accuracy`: threshold policy and the cold-start cache heuristic
//! - `dedup`: duplicate suppression and the watch motion filter

pub mod accuracy;
pub mod dedup;

pub use accuracy::{AccuracyFilter, AccuracyVerdict, CacheRejection, InitialCacheAcceptor};
pub use dedup::{DedupVerdict, Deduplicator};
