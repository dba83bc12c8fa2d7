//! Structural IR equality across the patch variants
//!
//! Two instructions match when opcode, cleaned type, operand count and all
//! operands match under the same relation. Phi operands may match in any
//! permutation; block operands match through the block-match rules (name
//! hints, instruction shape). Matched instruction and block pairs are
//! recorded in the projection state so later queries are O(1).

use super::super::domain::ProjectionState;
use crate::shared::models::ir::{BlockId, InstId, ModuleIr, Opcode, ValueId, ValueKind};
use crate::shared::utils::{clean_name, clean_type};
use std::collections::BTreeSet;

/// Block-name hints: two blocks sharing none of these cannot match when
/// either carries one.
const BLOCK_NAME_HINTS: &[&str] = &["entry", ".else", ".then", ".end", ".cond", ".body", "return"];

pub struct ValueMatcher<'a> {
    pub module: &'a ModuleIr,
}

impl<'a> ValueMatcher<'a> {
    pub fn new(module: &'a ModuleIr) -> Self {
        Self { module }
    }

    /// Values that never take part in matching.
    pub fn is_skip_match_value(&self, value: ValueId) -> bool {
        let v = self.module.value(value);
        match v.kind {
            ValueKind::Global(_) => v.name.contains(".str."),
            ValueKind::Inst(inst) => self.is_skip_match_inst(inst),
            _ => false,
        }
    }

    /// Allocas and inline-asm calls are skipped from matching entirely.
    pub fn is_skip_match_inst(&self, inst: InstId) -> bool {
        let ir = self.module.inst(inst);
        matches!(ir.opcode, Opcode::Alloca) || self.module.is_inline_asm_call(inst)
    }

    pub fn values_match(
        &self,
        state: &mut ProjectionState,
        v1: ValueId,
        v2: ValueId,
        match_block: bool,
    ) -> bool {
        if let Some(partner) = state.matched_values.after_of(v1) {
            return partner == v2;
        }
        if v1 == v2 {
            return true;
        }

        let a = self.module.value(v1);
        let b = self.module.value(v2);

        if !self.is_skip_match_value(v1)
            && !self.is_skip_match_value(v2)
            && clean_type(&a.ty) != clean_type(&b.ty)
        {
            return false;
        }
        if std::mem::discriminant(&a.kind) != std::mem::discriminant(&b.kind) {
            return false;
        }

        match (&a.kind, &b.kind) {
            (ValueKind::Global(_), ValueKind::Global(_)) => {
                clean_name(&a.name) == clean_name(&b.name)
            }
            (ValueKind::Function(f1), ValueKind::Function(f2)) => {
                let fa = self.module.func(*f1);
                let fb = self.module.func(*f2);
                fa.args.len() == fb.args.len() && clean_name(&fa.name) == clean_name(&fb.name)
            }
            (ValueKind::Metadata(m1), ValueKind::Metadata(m2)) => {
                let ka = &self.module.value(*m1).kind;
                let kb = &self.module.value(*m2).kind;
                if matches!(ka, ValueKind::Inst(_)) && matches!(kb, ValueKind::Inst(_)) {
                    return true;
                }
                self.values_match(state, *m1, *m2, match_block)
            }
            (
                ValueKind::Argument { func: f1, index: i1 },
                ValueKind::Argument { func: f2, index: i2 },
            ) => {
                let fv1 = self.module.func(*f1);
                let fv2 = self.module.func(*f2);
                i1 == i2
                    && fv1.args.len() == fv2.args.len()
                    && clean_name(&fv1.name) == clean_name(&fv2.name)
                    && clean_name(&a.name) == clean_name(&b.name)
            }
            (ValueKind::ConstInt(c1), ValueKind::ConstInt(c2)) => {
                a.ty == b.ty && c1 == c2
            }
            (ValueKind::ConstNull, ValueKind::ConstNull) => true,
            (ValueKind::InlineAsm, ValueKind::InlineAsm) => true,
            (ValueKind::Block(b1), ValueKind::Block(b2)) => {
                self.blocks_match(state, *b1, *b2)
            }
            (ValueKind::Inst(i1), ValueKind::Inst(i2)) => {
                self.insts_match(state, *i1, *i2, match_block)
            }
            _ => false,
        }
    }

    /// Structural block match, recording the pair on success.
    pub fn blocks_match(&self, state: &mut ProjectionState, b1: BlockId, b2: BlockId) -> bool {
        if let Some(partner) = state.matched_blocks.after_of(b1) {
            return partner == b2;
        }
        if let Some(partner) = state.matched_blocks.before_of(b2) {
            return partner == b1;
        }
        let ba = self.module.block(b1);
        let bb = self.module.block(b2);

        let fa = self.module.func(ba.func);
        let fb = self.module.func(bb.func);
        if fa.args.len() != fb.args.len() || clean_name(&fa.name) != clean_name(&fb.name) {
            return false;
        }

        // untouched functions keep their block names
        if !state.changed_funcs.contains(&ba.func) {
            return ba.name == bb.name;
        }

        if state.unmatched_blocks.contains(&b1) || state.unmatched_blocks.contains(&b2) {
            return false;
        }
        if ba.insts.len() != bb.insts.len() {
            return false;
        }

        let hint_of = |name: &str| {
            BLOCK_NAME_HINTS
                .iter()
                .filter(|h| name.contains(*h))
                .copied()
                .collect::<BTreeSet<_>>()
        };
        let hints1 = hint_of(&ba.name);
        let hints2 = hint_of(&bb.name);
        if hints1.is_disjoint(&hints2) && (!hints1.is_empty() || !hints2.is_empty()) {
            return false;
        }

        for (i1, i2) in ba.insts.iter().zip(bb.insts.iter()) {
            let ia = self.module.inst(*i1);
            let ib = self.module.inst(*i2);
            if ia.opcode != ib.opcode {
                return false;
            }
            if clean_type(&ia.ty) != clean_type(&ib.ty) {
                return false;
            }
        }

        if let (Some(bv1), Some(bv2)) = (
            block_value_id(self.module, b1),
            block_value_id(self.module, b2),
        ) {
            state.matched_values.insert(bv1, bv2);
        }
        state.matched_blocks.insert(b1, b2);
        true
    }

    /// Structural instruction match, recording the pair on success.
    pub fn insts_match(
        &self,
        state: &mut ProjectionState,
        i1: InstId,
        i2: InstId,
        match_block: bool,
    ) -> bool {
        let v1 = self.module.inst(i1).value;
        let v2 = self.module.inst(i2).value;
        if let Some(partner) = state.matched_values.after_of(v1) {
            if partner == v2 {
                return true;
            }
        }

        let ia = self.module.inst(i1);
        let ib = self.module.inst(i2);
        if ia.opcode != ib.opcode {
            return false;
        }
        if clean_type(&ia.ty) != clean_type(&ib.ty) {
            return false;
        }
        if ia.operands.len() != ib.operands.len() {
            return false;
        }

        // same-file unchanged lines must map onto each other
        if let (Some(d1), Some(d2)) = (&ia.debug, &ib.debug) {
            if d1.file != d2.file {
                return false;
            }
            if let Some(mapped) = state.mapped_line(&d1.file, d1.line) {
                if mapped != d2.line {
                    return false;
                }
            }
        }

        match ia.opcode {
            Opcode::Phi => {
                // operands match in any permutation up to bijection
                let mut used = BTreeSet::new();
                for op1 in &ia.operands {
                    let mut found = false;
                    for (j, op2) in ib.operands.iter().enumerate() {
                        if used.contains(&j) {
                            continue;
                        }
                        if self.values_match(state, *op1, *op2, match_block) {
                            used.insert(j);
                            found = true;
                            break;
                        }
                    }
                    if !found {
                        return false;
                    }
                }
            }
            Opcode::Ret => {}
            _ => {
                for (op1, op2) in ia.operands.iter().zip(ib.operands.iter()) {
                    let k1 = &self.module.value(*op1).kind;
                    let k2 = &self.module.value(*op2).kind;
                    // block operands of branches are matched by the block pass
                    if matches!(k1, ValueKind::Block(_)) && matches!(k2, ValueKind::Block(_)) {
                        continue;
                    }
                    if !self.values_match(state, *op1, *op2, match_block) {
                        return false;
                    }
                }
            }
        }

        if match_block && !self.blocks_match(state, ia.block, ib.block) {
            return false;
        }

        state.matched_values.insert(v1, v2);
        true
    }
}

/// The value-arena entry denoting a block; the projector pre-registers one
/// for every block via [`register_block_values`].
fn block_value_id(module: &ModuleIr, block: BlockId) -> Option<ValueId> {
    module
        .values
        .iter()
        .position(|v| v.kind == ValueKind::Block(block))
        .map(|idx| ValueId(idx as u32))
}

/// Ensure every block has a value-arena entry before matching starts.
pub fn register_block_values(module: &mut ModuleIr) {
    for b in 0..module.blocks.len() as u32 {
        let block = BlockId(b);
        let exists = module
            .values
            .iter()
            .any(|v| v.kind == ValueKind::Block(block));
        if !exists {
            module.block_value(block);
        }
    }
}
