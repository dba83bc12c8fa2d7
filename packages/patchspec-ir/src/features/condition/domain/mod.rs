pub mod tree;

pub use tree::{CondArena, CondId, CondKind, CondNode};
