//! Graph adapter: call graph, CFG reachability, control dependence.

pub mod api;
pub mod call_graph;
pub mod cdg;

pub use api::ApiClassifier;
pub use call_graph::{CallGraphIndex, CallTrace, CallerWitness};
pub use cdg::{CdPolarity, CfgIndex};
