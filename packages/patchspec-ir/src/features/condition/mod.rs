//! Condition engine: tree construction from control paths, normalisation,
//! simplification, and diffing with SMT-backed decisions.

pub mod domain;
pub mod infrastructure;

pub use domain::{CondArena, CondId, CondKind};
pub use infrastructure::{ConditionBuilder, Simplifier};
