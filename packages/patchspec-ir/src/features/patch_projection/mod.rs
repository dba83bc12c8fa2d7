//! Patch projection: line-level diff → IR-level added/removed/matched sets.

pub mod domain;
pub mod infrastructure;

pub use domain::{parse_patch_text, ChangedLine, ProjectionState};
pub use infrastructure::{PatchProjector, ProjectedChanges, ValueMatcher};
