//! Condition tree → SMT encoding
//!
//! The tree itself compiles connective-for-connective, with `Var(n)` becoming
//! `var(n) = 1`. The data-dependency side equates every icmp operand with the
//! sources feeding it: per operand, an Or over its backward slices, each
//! slice an And-chain of step equations; the conjunction of all of it is
//! asserted next to the tree before any satisfiability test.

use super::super::domain::tree::{CondArena, CondId, CondKind};
use crate::features::slicing::IntraSlicer;
use crate::features::smt::domain::term::SmtTerm;
use crate::features::smt::infrastructure::node_encoder;
use crate::shared::models::ir::{ModuleIr, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegObj};

/// Boolean encoding of the tree structure.
pub fn tree_term(arena: &CondArena, id: CondId) -> SmtTerm {
    match arena.kind(id) {
        CondKind::And | CondKind::Const => SmtTerm::and(
            arena
                .children(id)
                .into_iter()
                .map(|c| tree_term(arena, c))
                .collect(),
        ),
        CondKind::Or => SmtTerm::or(
            arena
                .children(id)
                .into_iter()
                .map(|c| tree_term(arena, c))
                .collect(),
        ),
        CondKind::Not => match arena.children(id).first() {
            Some(child) => SmtTerm::not(tree_term(arena, *child)),
            None => SmtTerm::BoolConst(true),
        },
        CondKind::Var(node) => node_encoder::taken_term(node),
    }
}

/// The icmp opcode node under an icmp value node, per the SEG convention
/// that an instruction's operand node has its opcode node as first child.
fn icmp_opcode_child(seg: &SegModule, value_node: SegNodeId) -> Option<SegNodeId> {
    seg.node(value_node)
        .children
        .iter()
        .copied()
        .find(|c| matches!(seg.node(*c).kind, SegNodeKind::Opcode(crate::shared::models::OpcodeKind::Icmp(_))))
}

fn is_icmp_value_node(module: &ModuleIr, seg: &SegModule, node: SegNodeId) -> bool {
    match seg.node(node).dbg_value {
        Some(v) => match module.value(v).kind {
            ValueKind::Inst(inst) => {
                matches!(module.inst(inst).opcode, crate::shared::models::ir::Opcode::Icmp(_))
            }
            _ => false,
        },
        None => false,
    }
}

/// Step equations of one backward slice (criterion-first order).
fn slice_chain(module: &ModuleIr, seg: &SegModule, slice: &[SegObj]) -> SmtTerm {
    let nodes: Vec<SegNodeId> = slice.iter().filter_map(|o| o.as_node()).collect();
    let mut steps = Vec::new();
    for i in (0..nodes.len().saturating_sub(1)).rev() {
        let cur = nodes[i];
        if seg.node(cur).is_opcode() {
            if let Some(eq) = node_encoder::encode_opcode(module, seg, cur) {
                steps.push(eq);
            }
        } else {
            steps.push(SmtTerm::eq(
                node_encoder::operand_term(module, seg, cur),
                node_encoder::operand_term(module, seg, nodes[i + 1]),
            ));
        }
    }
    SmtTerm::and(steps)
}

/// Data-dependency expression of every icmp variable in the tree.
pub fn data_dep_term(
    module: &ModuleIr,
    seg: &SegModule,
    slicer: &mut IntraSlicer,
    arena: &CondArena,
    id: CondId,
) -> SmtTerm {
    let mut per_icmp = Vec::new();
    for var_node in arena.obtain_nodes(id) {
        if !is_icmp_value_node(module, seg, var_node) {
            continue;
        }
        let opcode_node = match icmp_opcode_child(seg, var_node) {
            Some(o) => o,
            None => continue,
        };

        let mut operand_terms = Vec::new();
        for operand in seg.node(opcode_node).children.clone() {
            let slices = slicer.backward(operand);
            let mut alternatives = Vec::new();
            for slice in &slices {
                alternatives.push(slice_chain(module, seg, slice));
            }
            if !alternatives.is_empty() {
                operand_terms.push(SmtTerm::or(alternatives));
            }
        }

        let mut conjuncts = vec![SmtTerm::and(operand_terms)];
        if let Some(defining) = node_encoder::encode_opcode(module, seg, opcode_node) {
            conjuncts.push(defining);
        }
        conjuncts.push(SmtTerm::eq(
            node_encoder::expr_for_node(opcode_node),
            node_encoder::expr_for_node(var_node),
        ));
        per_icmp.push(SmtTerm::and(conjuncts));
    }
    SmtTerm::and(per_icmp)
}
