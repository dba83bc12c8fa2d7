pub mod projector;
pub mod value_match;

pub use projector::{PatchProjector, ProjectedChanges};
pub use value_match::{register_block_values, ValueMatcher};
