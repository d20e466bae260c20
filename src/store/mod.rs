//! Collaborators that outlive a match

pub mod stats;

pub use stats::{LocalStats, MatchReporter, StatsRecorder};
