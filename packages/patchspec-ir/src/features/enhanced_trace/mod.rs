//! Enhanced traces: slice + related blocks + condition tree + output order.

pub mod domain;
pub mod order;
pub mod sensitive;
pub mod trace_builder;

pub use domain::{EnhancedTrace, InputKind, InputNode, OutputKind, OutputNode};
pub use order::{site_orders, update_trace_order};
pub use trace_builder::{
    conditions_equal, filter_sub_traces, find_last_icmp, traces_equal, TraceBuilder,
};
