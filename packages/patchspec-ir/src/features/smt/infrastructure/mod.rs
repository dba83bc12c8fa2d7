pub mod node_encoder;
pub mod smtlib;
pub mod solver;

pub use solver::{with_scope, BoundedSolver, SmtSolver, SolverStats};
