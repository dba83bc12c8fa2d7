//! Condition-tree diffing
//!
//! Finds maximal matched and sub-matched subtrees between two trees (the
//! match relation is supplied by the caller, so the differ can route it
//! through the cross-build matched-node maps), clears the matched parts,
//! simplifies, and returns `¬T1 ∧ T2`. A `Const` result means the trees are
//! equivalent.

use super::super::domain::tree::{CondArena, CondId, CondKind};
use super::simplify::Simplifier;
use crate::features::smt::infrastructure::solver::SmtSolver;
use std::collections::BTreeMap;

/// Match operations supplied by the caller; the differ routes both through
/// its cross-build matched-node relation.
pub trait CondMatchOps {
    fn is_match(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool;
    fn is_sub_match(&mut self, arena: &CondArena, small: CondId, big: CondId) -> bool;
}

/// Identity-based ops: structural equality, no sub-matching. The simplifier
/// tests and P5 use this.
pub struct IdentityMatchOps;

impl CondMatchOps for IdentityMatchOps {
    fn is_match(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        arena.structurally_equal(a, b)
    }

    fn is_sub_match(&mut self, _arena: &CondArena, _small: CondId, _big: CondId) -> bool {
        false
    }
}

/// Root-to-node path as a sequence of connective kinds; subtrees only match
/// when they sit under the same path shape.
type PathShape = Vec<u8>;

fn kind_tag(kind: CondKind) -> u8 {
    match kind {
        CondKind::And => 0,
        CondKind::Or => 1,
        CondKind::Not => 2,
        CondKind::Const => 3,
        CondKind::Var(_) => 4,
    }
}

/// BFS over `t2`'s subtrees, locating for each one a positionally-compatible
/// match (or sub-match) inside `t1`.
pub fn find_matched_subtrees(
    arena: &CondArena,
    t1: CondId,
    t2: CondId,
    ops: &mut dyn CondMatchOps,
) -> (BTreeMap<CondId, CondId>, BTreeMap<CondId, CondId>) {
    let mut matched = BTreeMap::new();
    let mut sub_matched = BTreeMap::new();

    let mut queue: Vec<(CondId, PathShape)> = vec![(t2, Vec::new())];
    while let Some((cond2, path2)) = queue.pop() {
        locate_in_t1(arena, t1, cond2, &path2, ops, &mut matched, &mut sub_matched);
        if matched.contains_key(&cond2) {
            continue;
        }
        let mut child_path = path2.clone();
        child_path.push(kind_tag(arena.kind(cond2)));
        for child in arena.children(cond2) {
            queue.push((child, child_path.clone()));
        }
    }
    (matched, sub_matched)
}

fn locate_in_t1(
    arena: &CondArena,
    t1: CondId,
    cond2: CondId,
    path2: &PathShape,
    ops: &mut dyn CondMatchOps,
    matched: &mut BTreeMap<CondId, CondId>,
    sub_matched: &mut BTreeMap<CondId, CondId>,
) {
    let mut queue: Vec<(CondId, PathShape)> = vec![(t1, Vec::new())];
    while let Some((cur, path)) = queue.pop() {
        if matched.contains_key(&cur) {
            continue;
        }
        if path == *path2 && !matched.contains_key(&cond2) && ops.is_match(arena, cur, cond2) {
            matched.insert(cond2, cur);
            matched.insert(cur, cond2);
            break;
        }
        if path == *path2
            && !sub_matched.contains_key(&cur)
            && ops.is_sub_match(arena, cond2, cur)
        {
            sub_matched.insert(cur, cond2);
            break;
        }
        if path == *path2
            && !sub_matched.contains_key(&cond2)
            && ops.is_sub_match(arena, cur, cond2)
        {
            sub_matched.insert(cond2, cur);
            break;
        }
        let mut child_path = path.clone();
        child_path.push(kind_tag(arena.kind(cur)));
        for child in arena.children(cur) {
            queue.push((child, child_path.clone()));
        }
    }
}

/// Clear the matched material out of both trees: sub-matched And nodes lose
/// their matched children, fully-matched And nodes and leaves are cleared
/// whole.
pub fn clear_matched_subtrees(
    arena: &mut CondArena,
    matched: &BTreeMap<CondId, CondId>,
    sub_matched: &BTreeMap<CondId, CondId>,
    ops: &mut dyn CondMatchOps,
) {
    for (&holder, &counterpart) in sub_matched {
        if arena.kind(holder) != CondKind::And {
            continue;
        }
        for child in arena.children(holder) {
            let mut hit = None;
            for other in arena.children(counterpart) {
                if ops.is_match(arena, child, other) {
                    hit = Some(child);
                    break;
                }
            }
            if let Some(hit) = hit {
                arena.clear(hit);
            }
        }
    }

    for (&a, &b) in matched {
        if arena.is_const(a) && arena.is_const(b) {
            continue;
        }
        if arena.kind(a) == CondKind::And {
            arena.clear(a);
        }
    }
    for (&a, _) in matched {
        if arena.is_const(a) {
            continue;
        }
        if arena.kind(a) != CondKind::And {
            arena.clear(a);
        }
    }
}

/// The normative diff: clear matched parts, simplify both, return
/// `¬T1 ∧ T2` simplified; `None` when it collapses to `Const`.
pub fn diff_trees<S: SmtSolver>(
    simplifier: &mut Simplifier<'_, '_, S>,
    arena: &mut CondArena,
    t1: CondId,
    t2: CondId,
    matched: &BTreeMap<CondId, CondId>,
    sub_matched: &BTreeMap<CondId, CondId>,
    ops: &mut dyn CondMatchOps,
) -> Option<CondId> {
    clear_matched_subtrees(arena, matched, sub_matched, ops);
    simplifier.simplify(arena, t1);
    simplifier.simplify(arena, t2);

    let not_t1 = arena.not(t1);
    let diff = arena.and(vec![not_t1, t2]);
    simplifier.simplify(arena, diff);
    if arena.is_const(diff) {
        None
    } else {
        Some(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::slicing::IntraSlicer;
    use crate::features::smt::infrastructure::solver::BoundedSolver;
    use crate::shared::models::ir::{IcmpPred, ModuleIr, Opcode};
    use crate::shared::models::{OpcodeKind, SegModule, SegNodeId, SegNodeKind};

    fn icmp_node(m: &mut ModuleIr, seg: &mut SegModule) -> SegNodeId {
        let f = if m.functions.is_empty() {
            m.add_function("after.patch.f", "a.c")
        } else {
            crate::shared::models::ir::FuncId(0)
        };
        if m.func(f).blocks.is_empty() {
            m.add_block(f, "entry");
        }
        let bb = m.func(f).blocks[0];
        let x = m.add_argument(f, "x", "i32");
        let zero = m.const_int(0, "i32");
        let icmp = m.add_inst(bb, Opcode::Icmp(IcmpPred::Ne), vec![x, zero], "i1", None);
        let v = m.inst(icmp).value;

        let xn = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(x), "i32");
        let op = seg.add_node(f, SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
        let val = seg.add_node(f, SegNodeKind::SimpleOperand, Some(v), "i1");
        seg.connect(op, xn);
        seg.connect(val, op);
        val
    }

    #[test]
    fn test_diff_of_identical_trees_is_empty() {
        // P5: diff(T, T) simplifies to Const
        let mut m = ModuleIr::new();
        let mut seg = SegModule::new();
        let n = icmp_node(&mut m, &mut seg);

        let mut arena = CondArena::new();
        let v1 = arena.var(n);
        let t1 = arena.and(vec![v1]);
        let v2 = arena.var(n);
        let t2 = arena.and(vec![v2]);

        let mut ops = IdentityMatchOps;
        let (matched, sub_matched) = find_matched_subtrees(&arena, t1, t2, &mut ops);
        assert!(matched.contains_key(&t1) || matched.contains_key(&v1));

        let mut slicer = IntraSlicer::new(&m, &seg);
        let mut solver = BoundedSolver::new();
        let mut simplifier = Simplifier::new(&m, &seg, &mut slicer, &mut solver);
        let diff = diff_trees(
            &mut simplifier,
            &mut arena,
            t1,
            t2,
            &matched,
            &sub_matched,
            &mut ops,
        );
        assert!(diff.is_none());
    }

    #[test]
    fn test_diff_keeps_added_condition() {
        // T1 = true-ish (empty And), T2 = (x != 0): diff must retain the var
        let mut m = ModuleIr::new();
        let mut seg = SegModule::new();
        let n = icmp_node(&mut m, &mut seg);

        let mut arena = CondArena::new();
        let t1 = arena.and(vec![]);
        let v = arena.var(n);
        let t2 = arena.and(vec![v]);

        let mut ops = IdentityMatchOps;
        let (matched, sub_matched) = find_matched_subtrees(&arena, t1, t2, &mut ops);

        let mut slicer = IntraSlicer::new(&m, &seg);
        let mut solver = BoundedSolver::new();
        let mut simplifier = Simplifier::new(&m, &seg, &mut slicer, &mut solver);
        let diff = diff_trees(
            &mut simplifier,
            &mut arena,
            t1,
            t2,
            &matched,
            &sub_matched,
            &mut ops,
        );
        let diff = diff.expect("diff survives");
        assert!(arena.obtain_nodes(diff).contains(&n));
    }
}
