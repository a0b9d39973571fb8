//! Conflict detection and reporting.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- grouping the edits of all mods by target and finding overlaps.
//! 2. **Planning** -- deciding which lower-priority edits the merge must skip.
//! 3. **Reporting** -- describing every overlap and the resolution applied.

pub mod detector;
pub mod report;

pub use detector::{depends_on, target_of, ConflictDetector, Detection, OpRef, ResolutionPlan};
pub use report::{
    AttributedOp, Classification, ConflictRecord, ConflictReport, Redirect, Resolution, Target,
};
