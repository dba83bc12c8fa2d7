//! Spec abstraction: record building, invalid-condition filtering, CSV +
//! SMT side-file persistence, peer-function table.

pub mod abstractor;
pub mod csv_io;
pub mod domain;

pub use abstractor::SpecAbstractor;
pub use csv_io::{load_specs, write_specs};
pub use domain::{
    inputs_equal, outputs_equal, PeerTable, SingleSrcMultiSinkSpec, SingleSrcSingleSinkSpec,
    SpecSet, SpecType,
};
