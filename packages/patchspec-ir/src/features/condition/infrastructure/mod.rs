pub mod builder;
pub mod diff;
pub mod encode;
pub mod simplify;

pub use builder::ConditionBuilder;
pub use simplify::Simplifier;
