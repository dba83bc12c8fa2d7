//! Related basic-block collection
//!
//! Walks a trace in order and collects the blocks its elements witness,
//! deduplicating consecutive repeats. Constant phi inputs are attributed to
//! their incoming block (set during phi normalization), and a phi following
//! one of its incomings contributes the incoming's block; this is where a
//! single trace can fan out into several block sequences.

use crate::shared::models::ir::{BlockId, InstId, ModuleIr, Opcode, ValueKind};
use crate::shared::models::{SegModule, SegNodeKind, SegObj};

pub fn collect_related_blocks(
    module: &ModuleIr,
    seg: &SegModule,
    trace: &[SegObj],
) -> Vec<Vec<BlockId>> {
    let mut paths = Vec::new();
    let mut cur = Vec::new();
    walk(module, seg, trace, 0, &mut cur, &mut paths);
    paths
}

fn push_walk(
    module: &ModuleIr,
    seg: &SegModule,
    trace: &[SegObj],
    index: usize,
    block: BlockId,
    cur: &mut Vec<BlockId>,
    paths: &mut Vec<Vec<BlockId>>,
) {
    if cur.last() == Some(&block) {
        walk(module, seg, trace, index + 1, cur, paths);
    } else {
        cur.push(block);
        walk(module, seg, trace, index + 1, cur, paths);
        cur.pop();
    }
}

fn walk(
    module: &ModuleIr,
    seg: &SegModule,
    trace: &[SegObj],
    index: usize,
    cur: &mut Vec<BlockId>,
    paths: &mut Vec<Vec<BlockId>>,
) {
    if index >= trace.len() {
        if !paths.contains(cur) {
            paths.push(cur.clone());
        }
        return;
    }

    let obj = trace[index];
    match obj {
        SegObj::Site(site) => {
            let inst = seg.site(site).inst;
            push_walk(module, seg, trace, index, module.inst(inst).block, cur, paths);
        }
        SegObj::Node(node) => {
            let n = seg.node(node);
            match &n.kind {
                SegNodeKind::StoreMem { store: Some(inst) } => {
                    push_walk(module, seg, trace, index, module.inst(*inst).block, cur, paths);
                }
                SegNodeKind::LoadMem { .. } | SegNodeKind::StoreMem { store: None } => {
                    walk(module, seg, trace, index + 1, cur, paths);
                }
                SegNodeKind::CallSitePseudoInput { site, .. }
                | SegNodeKind::CallSiteCommonOutput { site }
                | SegNodeKind::CallSitePseudoOutput { site, .. } => {
                    let inst = seg.site(*site).inst;
                    push_walk(module, seg, trace, index, module.inst(inst).block, cur, paths);
                }
                SegNodeKind::CommonArgument { .. } | SegNodeKind::PseudoArgument { .. } => {
                    match module.entry_block(n.func) {
                        Some(entry) => {
                            push_walk(module, seg, trace, index, entry, cur, paths);
                        }
                        None => walk(module, seg, trace, index + 1, cur, paths),
                    }
                }
                SegNodeKind::Phi { incomings } => {
                    // a phi with debug info witnesses its own block; without
                    // it, the matching incoming's block speaks (and several
                    // matches fan out)
                    if let Some(block) = instruction_block(module, seg, node) {
                        push_walk(module, seg, trace, index, block, cur, paths);
                        return;
                    }
                    let prev = index.checked_sub(1).and_then(|i| trace[i].as_node());
                    let mut matched = false;
                    if let Some(prev) = prev {
                        for inc in incomings {
                            if inc.value == prev {
                                matched = true;
                                push_walk(module, seg, trace, index, inc.block, cur, paths);
                            }
                        }
                    }
                    if !matched {
                        walk(module, seg, trace, index + 1, cur, paths);
                    }
                }
                _ => {
                    if let Some(block) = constant_phi_block(module, seg, trace, index, node) {
                        push_walk(module, seg, trace, index, block, cur, paths);
                        return;
                    }
                    match instruction_block(module, seg, node) {
                        Some(block) => {
                            push_walk(module, seg, trace, index, block, cur, paths);
                        }
                        None => walk(module, seg, trace, index + 1, cur, paths),
                    }
                }
            }
        }
    }
}

/// A constant flowing into the next trace element (a phi) carries the block
/// it was attributed to during normalization, or the matching incoming's.
fn constant_phi_block(
    module: &ModuleIr,
    seg: &SegModule,
    trace: &[SegObj],
    index: usize,
    node: crate::shared::models::SegNodeId,
) -> Option<BlockId> {
    let value = seg.node(node).dbg_value?;
    if !matches!(
        module.value(value).kind,
        ValueKind::ConstInt(_) | ValueKind::ConstNull
    ) {
        return None;
    }
    let next = trace.get(index + 1)?.as_node()?;
    let incomings = match &seg.node(next).kind {
        SegNodeKind::Phi { incomings } => incomings,
        _ => return None,
    };
    if let Some(block) = seg.node(node).block {
        return Some(block);
    }
    incomings
        .iter()
        .find(|inc| inc.value == node)
        .map(|inc| inc.block)
}

/// The owning block of the instruction behind a plain operand node; loads and
/// geps are skipped because they attach noise blocks.
fn instruction_block(
    module: &ModuleIr,
    seg: &SegModule,
    node: crate::shared::models::SegNodeId,
) -> Option<BlockId> {
    let value = seg.node(node).dbg_value?;
    let inst: InstId = match module.value(value).kind {
        ValueKind::Inst(i) => i,
        _ => return None,
    };
    match module.inst(inst).opcode {
        Opcode::GetElementPtr | Opcode::Load => None,
        _ => Some(module.inst(inst).block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::{dbg, BinOp, Opcode};
    use crate::shared::models::{PhiIncoming, SegNodeKind};

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let x = m.add_argument(f, "x", "i32");
        let one = m.const_int(1, "i32");
        let i1 = m.add_inst(bb, Opcode::BinOp(BinOp::Add), vec![x, one], "i32", dbg("a.c", 2));
        let i1v = m.inst(i1).value;
        let i2 = m.add_inst(bb, Opcode::BinOp(BinOp::Mul), vec![i1v, one], "i32", dbg("a.c", 3));
        let i2v = m.inst(i2).value;

        let mut seg = SegModule::new();
        let n1 = seg.add_node(f, SegNodeKind::SimpleOperand, Some(i1v), "i32");
        let n2 = seg.add_node(f, SegNodeKind::SimpleOperand, Some(i2v), "i32");

        let paths = collect_related_blocks(&m, &seg, &[SegObj::Node(n1), SegObj::Node(n2)]);
        assert_eq!(paths, vec![vec![bb]]);
    }

    #[test]
    fn test_phi_after_incoming_contributes_incoming_block() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let then_bb = m.add_block(f, "if.then");
        let else_bb = m.add_block(f, "if.else");
        let x = m.add_argument(f, "x", "i32");
        let y = m.add_argument(f, "y", "i32");

        let mut seg = SegModule::new();
        let xn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(x), "i32");
        let yn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(y), "i32");
        let phi = seg.add_node(
            f,
            SegNodeKind::Phi {
                incomings: vec![
                    PhiIncoming { value: xn, block: then_bb },
                    PhiIncoming { value: yn, block: else_bb },
                ],
            },
            None,
            "i32",
        );
        seg.connect(phi, xn);
        seg.connect(phi, yn);

        let paths = collect_related_blocks(&m, &seg, &[SegObj::Node(xn), SegObj::Node(phi)]);
        assert_eq!(paths, vec![vec![then_bb]]);
    }

    #[test]
    fn test_argument_contributes_entry_block() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let entry = m.add_block(f, "entry");
        let mut seg = SegModule::new();
        let arg = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, None, "i32");
        let paths = collect_related_blocks(&m, &seg, &[SegObj::Node(arg)]);
        assert_eq!(paths, vec![vec![entry]]);
    }

    #[test]
    fn test_collected_blocks_stay_monotone() {
        // a constant in if.then flowing through a phi in if.end: the
        // collected sequence must step only along CFG-reachable blocks,
        // with no consecutive duplicates
        use crate::features::graph_adapter::CfgIndex;

        let mut m = ModuleIr::new();
        let f = m.add_function("after.patch.f", "a.c");
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "if.then");
        let end_bb = m.add_block(f, "if.end");
        m.add_edge(entry, then_bb);
        m.add_edge(entry, end_bb);
        m.add_edge(then_bb, end_bb);

        let c = m.const_int(-22, "i32");
        let zero = m.const_int(0, "i32");
        let phi_inst = m.add_inst(end_bb, Opcode::Phi, vec![c, zero], "i32", dbg("a.c", 12));
        m.set_phi_blocks(phi_inst, vec![then_bb, entry]);
        let phi_v = m.inst(phi_inst).value;

        let mut seg = SegModule::new();
        let cn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(c), "i32");
        seg.set_block(cn, then_bb);
        let zn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");
        seg.set_block(zn, entry);
        let phi = seg.add_node(
            f,
            SegNodeKind::Phi {
                incomings: vec![
                    PhiIncoming { value: cn, block: then_bb },
                    PhiIncoming { value: zn, block: entry },
                ],
            },
            Some(phi_v),
            "i32",
        );
        seg.connect(phi, cn);
        seg.connect(phi, zn);
        let ret = seg.add_node(f, SegNodeKind::CommonReturn, None, "i32");
        seg.connect(ret, phi);

        let paths = collect_related_blocks(
            &m,
            &seg,
            &[SegObj::Node(cn), SegObj::Node(phi), SegObj::Node(ret)],
        );
        assert!(!paths.is_empty());
        let mut cfg = CfgIndex::new();
        for blocks in &paths {
            assert!(blocks.len() >= 2, "trace spans several blocks");
            for pair in blocks.windows(2) {
                assert_ne!(pair[0], pair[1], "no consecutive duplicates");
                assert!(
                    cfg.block_reachable(&m, pair[0], pair[1]),
                    "consecutive blocks must stay reachable"
                );
            }
        }
    }
}
