//! Feature modules, one per pipeline component.

pub mod checkers;
pub mod condition;
pub mod enhanced_trace;
pub mod graph_adapter;
pub mod node_resolution;
pub mod patch_projection;
pub mod slicing;
pub mod smt;
pub mod spec_abstraction;
pub mod trace_diff;
