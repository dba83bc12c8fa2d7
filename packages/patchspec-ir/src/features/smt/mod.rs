//! SMT port: term language, bounded in-process backend, SMT-LIB2 I/O, and
//! the SEG node encoding shared by the condition engine and the differ.

pub mod domain;
pub mod infrastructure;

pub use domain::{SmtTerm, SmtVerdict};
pub use infrastructure::{with_scope, BoundedSolver, SmtSolver};
