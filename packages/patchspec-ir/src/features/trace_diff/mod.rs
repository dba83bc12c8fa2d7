//! Trace differ: cross-build node matching and before/after classification.

pub mod differ;
pub mod node_match;

pub use differ::{DiffOutcome, TraceDiffer};
pub use node_match::{patch_nodes_matched, patch_sites_matched};
