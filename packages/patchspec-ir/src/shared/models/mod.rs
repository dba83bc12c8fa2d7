//! Shared data models: IR arena, SEG arena, unified errors.

pub mod error;
pub mod ir;
pub mod matched;
pub mod seg;

pub use error::{ErrorKind, PatchSpecError, Result};
pub use matched::MatchedMap;
pub use ir::{
    dbg, BinOp, BlockId, DebugLoc, FuncId, FunctionIr, GlobalId, IcmpPred, InstId, InstIr,
    ModuleIr, Opcode, ValueId, ValueIr, ValueKind,
};
pub use seg::{
    resolved_value_name, AccessPath, OpcodeKind, PhiIncoming, SegGraph, SegModule, SegNode,
    SegNodeId, SegNodeKind, SegObj, SegSite, SegSiteId, SegSiteKind,
};
