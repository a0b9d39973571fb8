//! Merging mod contributions into a baseline graph.

pub mod engine;

pub use engine::{
    CancelFlag, ContributionSummary, MergeEngine, MergeOptions, MergeOutcome, MergeResult,
};
