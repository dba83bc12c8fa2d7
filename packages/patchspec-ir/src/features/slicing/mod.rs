//! Value-flow slicing: intra- and inter-procedural backward/forward
//! extraction with memoisation and call-context matching.

pub mod context;
pub mod domain;
pub mod inter;
pub mod intra;
pub mod related_bbs;

pub use context::match_def_use_context;
pub use domain::SegTrace;
pub use inter::InterSlicer;
pub use intra::{normalize_phi_duplicates, IntraSlicer, SliceStats};
pub use related_bbs::collect_related_blocks;
