//! Module IR model
//!
//! Arena-based read-only view of the program under analysis. The module image
//! holds both patch variants of every touched function (names prefixed
//! `before.patch.` / `after.patch.`); all source positions come from debug
//! metadata attached to instructions.
//!
//! The IR loader that produces this image is an external collaborator; this
//! crate only consumes it (deserialized from JSON by the CLI, or built
//! programmatically in tests).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(FuncId);
arena_id!(BlockId);
arena_id!(InstId);
arena_id!(GlobalId);
arena_id!(ValueId);

/// Source position from debug metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLoc {
    pub file: String,
    pub line: u32,
}

/// Integer comparison predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IcmpPred {
    /// The predicate holding exactly when `self` does not.
    pub fn inverse(self) -> Self {
        match self {
            IcmpPred::Eq => IcmpPred::Ne,
            IcmpPred::Ne => IcmpPred::Eq,
            IcmpPred::Ugt => IcmpPred::Ule,
            IcmpPred::Uge => IcmpPred::Ult,
            IcmpPred::Ult => IcmpPred::Uge,
            IcmpPred::Ule => IcmpPred::Ugt,
            IcmpPred::Sgt => IcmpPred::Sle,
            IcmpPred::Sge => IcmpPred::Slt,
            IcmpPred::Slt => IcmpPred::Sge,
            IcmpPred::Sle => IcmpPred::Sgt,
        }
    }

    /// Evaluate over concrete signed values (unsigned predicates reinterpret).
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            IcmpPred::Eq => lhs == rhs,
            IcmpPred::Ne => lhs != rhs,
            IcmpPred::Ugt => (lhs as u64) > (rhs as u64),
            IcmpPred::Uge => (lhs as u64) >= (rhs as u64),
            IcmpPred::Ult => (lhs as u64) < (rhs as u64),
            IcmpPred::Ule => (lhs as u64) <= (rhs as u64),
            IcmpPred::Sgt => lhs > rhs,
            IcmpPred::Sge => lhs >= rhs,
            IcmpPred::Slt => lhs < rhs,
            IcmpPred::Sle => lhs <= rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            IcmpPred::Eq => "=",
            IcmpPred::Ne => "distinct",
            IcmpPred::Ugt | IcmpPred::Sgt => ">",
            IcmpPred::Uge | IcmpPred::Sge => ">=",
            IcmpPred::Ult | IcmpPred::Slt => "<",
            IcmpPred::Ule | IcmpPred::Sle => "<=",
        }
    }
}

/// Binary arithmetic / bitwise operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_div(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

/// Instruction opcode
///
/// Operand conventions: `Call` puts the callee first and the arguments after
/// it; `CondBr` puts the condition first; `Store` is `[value, pointer]`;
/// `Phi` operands pair up with `InstIr::phi_blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Ret,
    Br,
    CondBr,
    Icmp(IcmpPred),
    BinOp(BinOp),
    Call,
    Load,
    Store,
    Phi,
    Alloca,
    GetElementPtr,
    Cast,
    Select,
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Ret => "ret",
            Opcode::Br | Opcode::CondBr => "br",
            Opcode::Icmp(_) => "icmp",
            Opcode::BinOp(op) => op.name(),
            Opcode::Call => "call",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Phi => "phi",
            Opcode::Alloca => "alloca",
            Opcode::GetElementPtr => "getelementptr",
            Opcode::Cast => "cast",
            Opcode::Select => "select",
        }
    }
}

/// What a value denotes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Inst(InstId),
    Argument { func: FuncId, index: u32 },
    ConstInt(i64),
    ConstNull,
    Global(GlobalId),
    Function(FuncId),
    Block(BlockId),
    /// Value wrapped as metadata (e.g. passed to a debug intrinsic)
    Metadata(ValueId),
    /// Inline assembly used as a call target
    InlineAsm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueIr {
    pub kind: ValueKind,
    /// SSA or source-level name; empty when unnamed
    pub name: String,
    /// Printed type, before cleaning
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstIr {
    pub opcode: Opcode,
    pub operands: Vec<ValueId>,
    /// Incoming blocks, parallel to `operands`; only for phi
    pub phi_blocks: Vec<BlockId>,
    pub block: BlockId,
    pub ty: String,
    pub debug: Option<DebugLoc>,
    /// Arena entry representing this instruction as a value
    pub value: ValueId,
}

impl InstIr {
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::CondBr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIr {
    pub name: String,
    pub func: FuncId,
    pub insts: Vec<InstId>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionIr {
    pub name: String,
    pub blocks: Vec<BlockId>,
    pub args: Vec<ValueId>,
    pub is_declaration: bool,
    pub is_intrinsic: bool,
    pub address_taken: bool,
    /// Source file the function body lives in, from debug metadata
    pub source_file: String,
}

impl FunctionIr {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalIr {
    pub name: String,
    pub ty: String,
}

/// The whole module image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleIr {
    pub functions: Vec<FunctionIr>,
    pub globals: Vec<GlobalIr>,
    pub blocks: Vec<BlockIr>,
    pub insts: Vec<InstIr>,
    pub values: Vec<ValueIr>,
}

impl ModuleIr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn func(&self, id: FuncId) -> &FunctionIr {
        &self.functions[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &BlockIr {
        &self.blocks[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &InstIr {
        &self.insts[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &ValueIr {
        &self.values[id.index()]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalIr {
        &self.globals[id.index()]
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        (0..self.functions.len() as u32).map(FuncId)
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.func_ids().find(|f| self.func(*f).name == name)
    }

    pub fn func_of_inst(&self, inst: InstId) -> FuncId {
        self.block(self.inst(inst).block).func
    }

    pub fn func_of_block(&self, block: BlockId) -> FuncId {
        self.block(block).func
    }

    pub fn entry_block(&self, func: FuncId) -> Option<BlockId> {
        self.func(func).blocks.first().copied()
    }

    pub fn source_line(&self, inst: InstId) -> Option<u32> {
        self.inst(inst).debug.as_ref().map(|d| d.line)
    }

    pub fn source_file_of_inst(&self, inst: InstId) -> Option<&str> {
        self.inst(inst).debug.as_ref().map(|d| d.file.as_str())
    }

    /// The function a call instruction directly invokes, if any.
    pub fn direct_callee(&self, inst: InstId) -> Option<FuncId> {
        let ir = self.inst(inst);
        if ir.opcode != Opcode::Call {
            return None;
        }
        let callee = ir.operands.first()?;
        match self.value(*callee).kind {
            ValueKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// True for calls whose target is inline assembly.
    pub fn is_inline_asm_call(&self, inst: InstId) -> bool {
        let ir = self.inst(inst);
        if ir.opcode != Opcode::Call {
            return false;
        }
        match ir.operands.first() {
            Some(callee) => self.value(*callee).kind == ValueKind::InlineAsm,
            None => false,
        }
    }

    /// True for calls to debug intrinsics (`llvm.dbg.*` and friends).
    pub fn is_debug_intrinsic_call(&self, inst: InstId) -> bool {
        match self.direct_callee(inst) {
            Some(f) => self.func(f).name.starts_with("llvm.dbg"),
            None => false,
        }
    }

    /// True for calls to any `llvm.` intrinsic.
    pub fn is_intrinsic_call(&self, inst: InstId) -> bool {
        match self.direct_callee(inst) {
            Some(f) => self.func(f).name.starts_with("llvm."),
            None => false,
        }
    }

    /// Instruction-level users of a value, across the whole module.
    pub fn users_of(&self, value: ValueId) -> Vec<InstId> {
        let mut users = Vec::new();
        for (idx, inst) in self.insts.iter().enumerate() {
            if inst.operands.contains(&value) {
                users.push(InstId(idx as u32));
            }
        }
        users
    }

    /// Functions containing at least one use of `value`.
    pub fn funcs_using(&self, value: ValueId) -> Vec<FuncId> {
        let mut funcs: Vec<FuncId> = self
            .users_of(value)
            .into_iter()
            .map(|i| self.func_of_inst(i))
            .collect();
        funcs.sort();
        funcs.dedup();
        funcs
    }

    /// Per-function map from name to id, for repeated lookups.
    pub fn name_index(&self) -> BTreeMap<String, FuncId> {
        self.func_ids()
            .map(|f| (self.func(f).name.clone(), f))
            .collect()
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Builder API (used by tests and by loaders producing the module image)
// ──────────────────────────────────────────────────────────────────────────

impl ModuleIr {
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        source_file: impl Into<String>,
    ) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(FunctionIr {
            name: name.into(),
            blocks: Vec::new(),
            args: Vec::new(),
            is_declaration: false,
            is_intrinsic: false,
            address_taken: false,
            source_file: source_file.into(),
        });
        id
    }

    pub fn add_declaration(&mut self, name: impl Into<String>) -> FuncId {
        let id = self.add_function(name, "");
        self.functions[id.index()].is_declaration = true;
        id
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: impl Into<String>) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalIr {
            name: name.into(),
            ty: ty.into(),
        });
        id
    }

    pub fn add_block(&mut self, func: FuncId, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockIr {
            name: name.into(),
            func,
            insts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        });
        self.functions[func.index()].blocks.push(id);
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.index()].succs.contains(&to) {
            self.blocks[from.index()].succs.push(to);
        }
        if !self.blocks[to.index()].preds.contains(&from) {
            self.blocks[to.index()].preds.push(from);
        }
    }

    pub fn add_value(&mut self, kind: ValueKind, name: impl Into<String>, ty: impl Into<String>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueIr {
            kind,
            name: name.into(),
            ty: ty.into(),
        });
        id
    }

    pub fn add_argument(&mut self, func: FuncId, name: impl Into<String>, ty: impl Into<String>) -> ValueId {
        let index = self.functions[func.index()].args.len() as u32;
        let id = self.add_value(ValueKind::Argument { func, index }, name, ty);
        self.functions[func.index()].args.push(id);
        id
    }

    pub fn const_int(&mut self, value: i64, ty: impl Into<String>) -> ValueId {
        self.add_value(ValueKind::ConstInt(value), "", ty)
    }

    pub fn const_null(&mut self, ty: impl Into<String>) -> ValueId {
        self.add_value(ValueKind::ConstNull, "", ty)
    }

    pub fn global_value(&mut self, global: GlobalId) -> ValueId {
        let (name, ty) = {
            let g = self.global(global);
            (g.name.clone(), g.ty.clone())
        };
        self.add_value(ValueKind::Global(global), name, ty)
    }

    pub fn func_value(&mut self, func: FuncId) -> ValueId {
        let name = self.func(func).name.clone();
        self.add_value(ValueKind::Function(func), name, "ptr")
    }

    pub fn block_value(&mut self, block: BlockId) -> ValueId {
        let name = self.block(block).name.clone();
        self.add_value(ValueKind::Block(block), name, "label")
    }

    pub fn add_inst(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        operands: Vec<ValueId>,
        ty: impl Into<String>,
        debug: Option<DebugLoc>,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        let ty = ty.into();
        let value = self.add_value(ValueKind::Inst(id), "", ty.clone());
        self.insts.push(InstIr {
            opcode,
            operands,
            phi_blocks: Vec::new(),
            block,
            ty,
            debug,
            value,
        });
        self.blocks[block.index()].insts.push(id);
        id
    }

    pub fn set_phi_blocks(&mut self, inst: InstId, blocks: Vec<BlockId>) {
        self.insts[inst.index()].phi_blocks = blocks;
    }

    pub fn mark_address_taken(&mut self, func: FuncId) {
        self.functions[func.index()].address_taken = true;
    }
}

pub fn dbg(file: &str, line: u32) -> Option<DebugLoc> {
    Some(DebugLoc {
        file: file.to_string(),
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_inverse_roundtrip() {
        for pred in [
            IcmpPred::Eq,
            IcmpPred::Ne,
            IcmpPred::Ugt,
            IcmpPred::Uge,
            IcmpPred::Ult,
            IcmpPred::Ule,
            IcmpPred::Sgt,
            IcmpPred::Sge,
            IcmpPred::Slt,
            IcmpPred::Sle,
        ] {
            assert_eq!(pred.inverse().inverse(), pred);
            assert_ne!(pred.eval(3, 5), pred.inverse().eval(3, 5));
        }
    }

    #[test]
    fn test_builder_wires_blocks_and_insts() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.probe", "driver/x.c");
        let entry = m.add_block(f, "entry");
        let exit = m.add_block(f, "return");
        m.add_edge(entry, exit);

        let zero = m.const_int(0, "i32");
        let ret = m.add_inst(exit, Opcode::Ret, vec![zero], "void", dbg("driver/x.c", 10));

        assert_eq!(m.func(f).blocks, vec![entry, exit]);
        assert_eq!(m.block(entry).succs, vec![exit]);
        assert_eq!(m.block(exit).preds, vec![entry]);
        assert_eq!(m.func_of_inst(ret), f);
        assert_eq!(m.source_line(ret), Some(10));
    }

    #[test]
    fn test_direct_callee_and_intrinsics() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.caller", "a.c");
        let callee = m.add_declaration("llvm.dbg.value");
        let bb = m.add_block(f, "entry");
        let cv = m.func_value(callee);
        let call = m.add_inst(bb, Opcode::Call, vec![cv], "void", None);

        assert_eq!(m.direct_callee(call), Some(callee));
        assert!(m.is_debug_intrinsic_call(call));
        assert!(m.is_intrinsic_call(call));
    }

    #[test]
    fn test_users_and_funcs_using() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let a = m.add_argument(f, "a", "i32");
        let one = m.const_int(1, "i32");
        let add = m.add_inst(bb, Opcode::BinOp(BinOp::Add), vec![a, one], "i32", None);

        assert_eq!(m.users_of(a), vec![add]);
        assert_eq!(m.funcs_using(a), vec![f]);
    }
}
