//! Condition-tree simplification
//!
//! Bottom-up rewrite to a fixed point: const elimination, double-negation,
//! flattening, conflict collapse, merge, absorption (including the sub-vector
//! variants), implication-based reduction, and depth-limited distribution of
//! And over Or. Pairwise verdicts go through a fast structural path over the
//! underlying comparisons first and the SMT backend second; every verdict is
//! memoised by node-id pair.

use super::super::domain::tree::{CondArena, CondId, CondKind};
use super::encode::{data_dep_term, tree_term};
use crate::features::slicing::IntraSlicer;
use crate::features::smt::domain::term::{SmtTerm, SmtVerdict};
use crate::features::smt::infrastructure::solver::{with_scope, SmtSolver};
use crate::shared::models::ir::{IcmpPred, InstId, ModuleIr, Opcode, ValueKind};
use crate::shared::models::{SegModule, SegNodeId};
use rustc_hash::FxHashSet;

const DISTRIBUTION_DEPTH_LIMIT: usize = 5;

/// Relation of two leaf conditions over the same comparison shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafShape {
    Same(SegNodeId, SegNodeId),
    Converse(SegNodeId, SegNodeId),
}

pub struct Simplifier<'a, 'b, S: SmtSolver> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    slicer: &'a mut IntraSlicer<'b>,
    solver: &'a mut S,
    merge_cache: FxHashSet<(CondId, CondId)>,
    conflict_cache: FxHashSet<(CondId, CondId)>,
    reduce_cache: FxHashSet<(CondId, CondId)>,
}

impl<'a, 'b, S: SmtSolver> Simplifier<'a, 'b, S> {
    pub fn new(
        module: &'a ModuleIr,
        seg: &'a SegModule,
        slicer: &'a mut IntraSlicer<'b>,
        solver: &'a mut S,
    ) -> Self {
        Self {
            module,
            seg,
            slicer,
            solver,
            merge_cache: FxHashSet::default(),
            conflict_cache: FxHashSet::default(),
            reduce_cache: FxHashSet::default(),
        }
    }

    /// Simplify to a fixed point, distribution included.
    pub fn simplify(&mut self, arena: &mut CondArena, root: CondId) {
        loop {
            let before = arena.dump(root);
            self.simplify_pass(arena, root);
            let mut changed = false;
            self.distribute(arena, root, 0, &mut changed);
            if !changed && arena.dump(root) == before {
                break;
            }
        }
    }

    fn simplify_pass(&mut self, arena: &mut CondArena, id: CondId) {
        simplify_const(arena, id);
        for child in arena.children(id) {
            self.simplify_pass(arena, child);
        }
        match arena.kind(id) {
            CondKind::And => self.simplify_connective(arena, id, true),
            CondKind::Or => self.simplify_connective(arena, id, false),
            CondKind::Not => simplify_not(arena, id),
            CondKind::Const | CondKind::Var(_) => {}
        }
    }

    /// Shared And/Or child-list rewriting. The reduction direction flips
    /// between the two: an And keeps the stronger conjunct, an Or keeps the
    /// stronger (the weaker disjunct is dropped).
    fn simplify_connective(&mut self, arena: &mut CondArena, id: CondId, is_and: bool) {
        let children = arena.children(id);
        let mut simplified: Vec<CondId> = Vec::new();
        let mut conflict = false;

        for child in children {
            let mut contains_merge = false;
            let mut a_reduces_child = false;
            let mut child_reduces_a = false;
            let mut to_remove = Vec::new();

            for &item in &simplified {
                if self.is_conflict(arena, item, child) {
                    conflict = true;
                }
                if self.is_merge(arena, item, child) {
                    contains_merge = true;
                }
                if self.is_a_reduce_b(arena, item, child) {
                    a_reduces_child = true;
                }
                if self.is_a_reduce_b(arena, child, item) {
                    child_reduces_a = true;
                    to_remove.push(item);
                }
            }

            if conflict {
                simplified.clear();
                break;
            }

            let child_kind = arena.kind(child);
            if child_kind == CondKind::Const {
                if is_and {
                    continue; // neutral in a conjunction
                }
                // a true disjunct makes the whole Or true
                arena.clear(id);
                return;
            }
            let absorbing_kind = if is_and { CondKind::Or } else { CondKind::And };
            let flattening_kind = if is_and { CondKind::And } else { CondKind::Or };

            if child_kind == absorbing_kind {
                if self.absorbs(arena, child, &mut simplified) {
                    continue;
                }
                self.add_unique(arena, &mut simplified, child);
            } else if child_kind == flattening_kind {
                simplified.extend(arena.children(child));
            } else {
                // in an And, `A ⇒ B` drops B when A is already kept; in an
                // Or the stronger disjunct is dropped instead
                let (skip, remove_kept) = if is_and {
                    (a_reduces_child || contains_merge, child_reduces_a)
                } else {
                    (child_reduces_a || contains_merge, a_reduces_child)
                };
                if skip {
                    continue;
                }
                if remove_kept {
                    simplified.retain(|s| !to_remove.contains(s));
                }
                self.add_unique(arena, &mut simplified, child);
            }
        }

        match simplified.len() {
            0 => arena.clear(id),
            1 => {
                let only = simplified[0];
                arena.replace_with(id, only);
            }
            _ => arena.node_mut(id).children = simplified,
        }
    }

    fn add_unique(&mut self, arena: &CondArena, list: &mut Vec<CondId>, node: CondId) {
        for &item in list.iter() {
            if self.is_equal(arena, item, node) {
                return;
            }
        }
        list.push(node);
    }

    /// Absorption between a composite child and the already-kept siblings:
    /// `A ∧ (A ∨ X)` keeps A; the sub-vector variants handle composite-vs-
    /// composite children.
    fn absorbs(&mut self, arena: &mut CondArena, a: CondId, kept: &mut Vec<CondId>) -> bool {
        // a sibling equal to one of a's parts absorbs a
        let parts = arena.children(a);
        for &sibling in kept.iter() {
            if sibling == a {
                continue;
            }
            for &part in &parts {
                if self.is_equal(arena, sibling, part) {
                    return true;
                }
            }
        }

        // a absorbs any kept composite containing it as a part
        let mut to_remove = Vec::new();
        for &sibling in kept.iter() {
            if sibling == a {
                continue;
            }
            for part in arena.children(sibling) {
                if self.is_equal(arena, a, part) {
                    to_remove.push(sibling);
                    break;
                }
            }
        }
        if !to_remove.is_empty() {
            kept.retain(|s| !to_remove.contains(s));
            return false;
        }

        // sub-vector variants between same-kind composites
        for &sibling in kept.iter() {
            if sibling != a
                && arena.kind(sibling) == arena.kind(a)
                && self.is_sub_list(arena, sibling, a)
            {
                return true;
            }
        }
        let mut to_remove = Vec::new();
        for &sibling in kept.iter() {
            if sibling != a
                && arena.kind(sibling) == arena.kind(a)
                && self.is_sub_list(arena, a, sibling)
            {
                to_remove.push(sibling);
            }
        }
        if !to_remove.is_empty() {
            kept.retain(|s| !to_remove.contains(s));
        }
        false
    }

    /// Are `inner`'s children a contiguous run of `outer`'s (by is_equal)?
    fn is_sub_list(&mut self, arena: &CondArena, inner: CondId, outer: CondId) -> bool {
        let small = arena.children(inner);
        let big = arena.children(outer);
        if small.is_empty() || small.len() > big.len() {
            return false;
        }
        'outer: for start in 0..=(big.len() - small.len()) {
            for (offset, s) in small.iter().enumerate() {
                if !self.is_equal(arena, *s, big[start + offset]) {
                    continue 'outer;
                }
            }
            return true;
        }
        false
    }

    /// Depth-limited distribution of And over Or.
    fn distribute(&mut self, arena: &mut CondArena, id: CondId, depth: usize, changed: &mut bool) {
        for child in arena.children(id) {
            self.distribute(arena, child, depth + 1, changed);
        }
        if depth > DISTRIBUTION_DEPTH_LIMIT || arena.kind(id) != CondKind::And {
            return;
        }
        let children = arena.children(id);
        let or_pos = children.iter().position(|c| arena.kind(*c) == CondKind::Or);
        let or_pos = match or_pos {
            Some(p) => p,
            None => return,
        };
        let or_node = children[or_pos];
        let others: Vec<CondId> = children
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != or_pos)
            .map(|(_, c)| *c)
            .collect();
        if others.is_empty() {
            return;
        }

        let mut new_or_children = Vec::new();
        for or_child in arena.children(or_node) {
            let mut and_children: Vec<CondId> =
                others.iter().map(|o| arena.deep_clone(*o)).collect();
            and_children.push(arena.deep_clone(or_child));
            let and_node = arena.and(and_children);
            new_or_children.push(and_node);
        }
        let node = arena.node_mut(id);
        node.kind = CondKind::Or;
        node.children = new_or_children;
        *changed = true;
    }

    // ──────────────────────────────────────────────────────────────────
    // Pairwise relations
    // ──────────────────────────────────────────────────────────────────

    /// Equality used inside the simplifier: merge relation for leaves,
    /// ordered structure otherwise.
    pub fn is_equal(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        if a == b {
            return true;
        }
        if self.is_merge(arena, a, b) {
            return true;
        }
        if arena.kind(a) != arena.kind(b) {
            return false;
        }
        let ca = arena.children(a);
        let cb = arena.children(b);
        ca.len() == cb.len()
            && ca
                .iter()
                .zip(cb.iter())
                .all(|(x, y)| self.is_equal(arena, *x, *y))
    }

    /// `a ∧ b` unsatisfiable?
    pub fn is_conflict(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        if self.conflict_cache.contains(&(a, b)) {
            return true;
        }
        if let Some(shape) = leaf_shape(arena, a, b) {
            if let Some(verdict) = self.leaf_conflict(shape) {
                if verdict {
                    self.conflict_cache.insert((a, b));
                }
                return verdict;
            }
        } else {
            return false;
        }

        let term = SmtTerm::and(vec![
            tree_term(arena, a),
            tree_term(arena, b),
            data_dep_term(self.module, self.seg, self.slicer, arena, a),
            data_dep_term(self.module, self.seg, self.slicer, arena, b),
        ]);
        let verdict = with_scope(self.solver, |s| {
            s.add(term);
            s.check()
        });
        if verdict == SmtVerdict::Unsat {
            self.conflict_cache.insert((a, b));
            return true;
        }
        false
    }

    /// `a ⇔ b`?
    pub fn is_merge(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        if self.merge_cache.contains(&(a, b)) {
            return true;
        }
        if let Some(shape) = leaf_shape(arena, a, b) {
            if let Some(verdict) = self.leaf_merge(shape) {
                if verdict {
                    self.merge_cache.insert((a, b));
                }
                return verdict;
            }
        } else {
            return false;
        }

        let term = SmtTerm::and(vec![
            data_dep_term(self.module, self.seg, self.slicer, arena, a),
            data_dep_term(self.module, self.seg, self.slicer, arena, b),
            SmtTerm::xor(tree_term(arena, a), tree_term(arena, b)),
        ]);
        let verdict = with_scope(self.solver, |s| {
            s.add(term);
            s.check()
        });
        if verdict == SmtVerdict::Unsat {
            self.merge_cache.insert((a, b));
            return true;
        }
        false
    }

    /// `a ⇒ b`?
    pub fn is_a_reduce_b(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        if self.reduce_cache.contains(&(a, b)) {
            return true;
        }
        if leaf_shape(arena, a, b).is_none() {
            return false;
        }

        // ¬(¬a ∨ b) unsatisfiable ⇔ a ⇒ b
        let not_a = SmtTerm::not(tree_term(arena, a));
        let term = SmtTerm::and(vec![
            data_dep_term(self.module, self.seg, self.slicer, arena, a),
            data_dep_term(self.module, self.seg, self.slicer, arena, b),
            SmtTerm::not(SmtTerm::or(vec![not_a, tree_term(arena, b)])),
        ]);
        let verdict = with_scope(self.solver, |s| {
            s.add(term);
            s.check()
        });
        if verdict == SmtVerdict::Unsat {
            self.reduce_cache.insert((a, b));
            return true;
        }
        false
    }

    /// Structural verdicts over leaf comparisons: Some(true/false) when the
    /// fast path decides, None to fall through to SMT.
    fn leaf_conflict(&mut self, shape: LeafShape) -> Option<bool> {
        match shape {
            LeafShape::Converse(n1, n2) => {
                if n1 == n2 || self.same_value(n1, n2) {
                    return Some(true);
                }
                match self.compare_icmps(n1, n2) {
                    Some(IcmpRelation::Same) => Some(true),
                    Some(IcmpRelation::Inverse) => Some(false),
                    _ => None,
                }
            }
            LeafShape::Same(n1, n2) => {
                if n1 == n2 {
                    return Some(false);
                }
                match self.compare_icmps(n1, n2) {
                    Some(IcmpRelation::Inverse) => Some(true),
                    Some(IcmpRelation::Same) => Some(false),
                    Some(IcmpRelation::DistinctEqConstants) => Some(true),
                    _ => None,
                }
            }
        }
    }

    fn leaf_merge(&mut self, shape: LeafShape) -> Option<bool> {
        match shape {
            LeafShape::Same(n1, n2) => {
                if n1 == n2 || self.same_value(n1, n2) {
                    return Some(true);
                }
                match self.compare_icmps(n1, n2) {
                    Some(IcmpRelation::Same) => Some(true),
                    Some(IcmpRelation::Inverse) => Some(false),
                    _ => None,
                }
            }
            LeafShape::Converse(n1, n2) => {
                if n1 == n2 {
                    return Some(false);
                }
                match self.compare_icmps(n1, n2) {
                    Some(IcmpRelation::Inverse) => Some(true),
                    Some(IcmpRelation::Same) => Some(false),
                    _ => None,
                }
            }
        }
    }

    /// Two SEG nodes that always carry the same value: same node or same IR
    /// value. Anything weaker is left to the SMT fallback.
    fn same_value(&mut self, n1: SegNodeId, n2: SegNodeId) -> bool {
        if n1 == n2 {
            return true;
        }
        let v1 = self.seg.node(n1).dbg_value;
        let v2 = self.seg.node(n2).dbg_value;
        v1.is_some() && v1 == v2
    }

    fn icmp_of(&self, node: SegNodeId) -> Option<(InstId, IcmpPred)> {
        let value = self.seg.node(node).dbg_value?;
        match self.module.value(value).kind {
            ValueKind::Inst(inst) => match self.module.inst(inst).opcode {
                Opcode::Icmp(pred) => Some((inst, pred)),
                _ => None,
            },
            _ => None,
        }
    }

    fn compare_icmps(&mut self, n1: SegNodeId, n2: SegNodeId) -> Option<IcmpRelation> {
        let (i1, p1) = self.icmp_of(n1)?;
        let (i2, p2) = self.icmp_of(n2)?;
        let func = self.seg.node(n1).func;

        let ops1 = self.module.inst(i1).operands.clone();
        let ops2 = self.module.inst(i2).operands.clone();
        if ops1.len() != 2 || ops2.len() != 2 {
            return None;
        }
        let node_of = |s: &Self, v| s.seg.find_node(func, v);
        let (a1, b1) = (node_of(self, ops1[0]), node_of(self, ops1[1]));
        let (a2, b2) = (node_of(self, ops2[0]), node_of(self, ops2[1]));

        let eq = |s: &mut Self, x: Option<SegNodeId>, y: Option<SegNodeId>| match (x, y) {
            (Some(x), Some(y)) => s.same_value(x, y),
            _ => false,
        };

        if eq(self, a1, a2) {
            if eq(self, b1, b2) {
                if p1 == p2 {
                    return Some(IcmpRelation::Same);
                }
                if p1.inverse() == p2 {
                    return Some(IcmpRelation::Inverse);
                }
            } else if p1 == p2 && p1 == IcmpPred::Eq {
                // x == c1 vs x == c2 with distinct constants
                let c1 = self.const_of(ops1[1]);
                let c2 = self.const_of(ops2[1]);
                if let (Some(c1), Some(c2)) = (c1, c2) {
                    if c1 != c2 {
                        return Some(IcmpRelation::DistinctEqConstants);
                    }
                }
            }
        }
        // swapped operands only line up for symmetric predicates
        let symmetric = matches!(p1, IcmpPred::Eq | IcmpPred::Ne);
        if symmetric && eq(self, a1, b2) && eq(self, b1, a2) {
            if p1 == p2 {
                return Some(IcmpRelation::Same);
            }
            if p1.inverse() == p2 {
                return Some(IcmpRelation::Inverse);
            }
        }
        None
    }

    fn const_of(&self, value: crate::shared::models::ir::ValueId) -> Option<i64> {
        match self.module.value(value).kind {
            ValueKind::ConstInt(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IcmpRelation {
    Same,
    Inverse,
    DistinctEqConstants,
}

/// Shape of a leaf pair: `(Var, Var)` and `(Not Var, Not Var)` compare the
/// same way round, mixed shapes compare conversely.
fn leaf_shape(arena: &CondArena, a: CondId, b: CondId) -> Option<LeafShape> {
    let payload = |id: CondId| match arena.kind(id) {
        CondKind::Var(n) => Some((n, false)),
        CondKind::Not => match arena.children(id).first() {
            Some(child) => match arena.kind(*child) {
                CondKind::Var(n) => Some((n, true)),
                _ => None,
            },
            None => None,
        },
        _ => None,
    };
    let (n1, neg1) = payload(a)?;
    let (n2, neg2) = payload(b)?;
    if neg1 == neg2 {
        Some(LeafShape::Same(n1, n2))
    } else {
        Some(LeafShape::Converse(n1, n2))
    }
}

/// Normalise `Const` children: the neutral element is dropped from And and
/// Not, but it makes a whole Or true, so the Or collapses to `Const` itself.
/// Connectives left without children clear too.
pub fn simplify_const(arena: &mut CondArena, id: CondId) {
    for child in arena.children(id) {
        simplify_const(arena, child);
    }
    let kind = arena.kind(id);
    if kind == CondKind::Or
        && arena
            .children(id)
            .iter()
            .any(|c| arena.kind(*c) == CondKind::Const)
    {
        arena.clear(id);
        return;
    }
    if matches!(kind, CondKind::And | CondKind::Or | CondKind::Not) {
        let kept: Vec<CondId> = arena
            .children(id)
            .into_iter()
            .filter(|c| !is_removable(arena, *c))
            .collect();
        arena.node_mut(id).children = kept;
        if arena.children(id).is_empty() {
            arena.clear(id);
        }
    }
}

fn is_removable(arena: &CondArena, id: CondId) -> bool {
    match arena.kind(id) {
        CondKind::Const => true,
        CondKind::And | CondKind::Or | CondKind::Not => arena.children(id).is_empty(),
        CondKind::Var(_) => false,
    }
}

/// Collapse chains of negations: even count → the variable, odd → one Not.
pub fn simplify_not(arena: &mut CondArena, id: CondId) {
    if arena.kind(id) != CondKind::Not {
        return;
    }
    let mut count = 0usize;
    let mut cur = id;
    while arena.kind(cur) == CondKind::Not {
        match arena.children(cur).first() {
            Some(child) => {
                count += 1;
                cur = *child;
            }
            None => return,
        }
    }
    if let CondKind::Var(node) = arena.kind(cur) {
        if count % 2 == 0 {
            let n = arena.node_mut(id);
            n.kind = CondKind::Var(node);
            n.children.clear();
        } else {
            arena.node_mut(id).children = vec![cur];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::smt::infrastructure::solver::BoundedSolver;
    use crate::shared::models::ir::Opcode;
    use crate::shared::models::{OpcodeKind, SegNodeKind};

    struct Fixture {
        module: ModuleIr,
        seg: SegModule,
        /// icmp value nodes for `x != 0` and `x == 0`
        ne_node: SegNodeId,
        eq_node: SegNodeId,
        other: SegNodeId,
    }

    fn fixture() -> Fixture {
        let mut m = ModuleIr::new();
        let f = m.add_function("after.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let x = m.add_argument(f, "x", "i32");
        let y = m.add_argument(f, "y", "i32");
        let zero = m.const_int(0, "i32");

        let mut seg = SegModule::new();
        let xn = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(x), "i32");
        let yn = seg.add_node(f, SegNodeKind::CommonArgument { index: 1 }, Some(y), "i32");
        let zn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");

        let mut icmp_value = |m: &mut ModuleIr, seg: &mut SegModule, pred, lhs_v, lhs_n| {
            let inst = m.add_inst(bb, Opcode::Icmp(pred), vec![lhs_v, zero], "i1", None);
            let v = m.inst(inst).value;
            let op = seg.add_node(f, SegNodeKind::Opcode(OpcodeKind::Icmp(pred)), None, "i1");
            let val = seg.add_node(f, SegNodeKind::SimpleOperand, Some(v), "i1");
            seg.connect(op, lhs_n);
            seg.connect(op, zn);
            seg.connect(val, op);
            val
        };

        let ne_node = icmp_value(&mut m, &mut seg, IcmpPred::Ne, x, xn);
        let eq_node = icmp_value(&mut m, &mut seg, IcmpPred::Eq, x, xn);
        let other = icmp_value(&mut m, &mut seg, IcmpPred::Ne, y, yn);

        Fixture { module: m, seg, ne_node, eq_node, other }
    }

    fn with_simplifier<R>(
        fx: &Fixture,
        body: impl FnOnce(&mut Simplifier<'_, '_, BoundedSolver>, &mut CondArena) -> R,
    ) -> R {
        let mut slicer = IntraSlicer::new(&fx.module, &fx.seg);
        let mut solver = BoundedSolver::new();
        let mut simplifier = Simplifier::new(&fx.module, &fx.seg, &mut slicer, &mut solver);
        let mut arena = CondArena::new();
        body(&mut simplifier, &mut arena)
    }

    #[test]
    fn test_double_negation() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            let v = arena.var(fx.ne_node);
            let n1 = arena.not(v);
            let n2 = arena.not(n1);
            let root = arena.and(vec![n2]);
            s.simplify(arena, root);
            assert_eq!(arena.kind(root), CondKind::Var(fx.ne_node));
        });
    }

    #[test]
    fn test_conflict_collapses_to_const() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            // x != 0 ∧ ¬(x != 0)
            let v1 = arena.var(fx.ne_node);
            let v2 = arena.var(fx.ne_node);
            let n = arena.not(v2);
            let root = arena.and(vec![v1, n]);
            s.simplify(arena, root);
            assert!(arena.is_const(root));
        });
    }

    #[test]
    fn test_inverse_predicates_conflict() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            // x != 0 ∧ x == 0
            let v1 = arena.var(fx.ne_node);
            let v2 = arena.var(fx.eq_node);
            let root = arena.and(vec![v1, v2]);
            s.simplify(arena, root);
            assert!(arena.is_const(root));
        });
    }

    #[test]
    fn test_merge_deduplicates() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            let v1 = arena.var(fx.ne_node);
            let v2 = arena.var(fx.ne_node);
            let v3 = arena.var(fx.other);
            let root = arena.and(vec![v1, v2, v3]);
            s.simplify(arena, root);
            assert_eq!(arena.children(root).len(), 2);
        });
    }

    #[test]
    fn test_absorption() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            // A ∧ (A ∨ X) → A
            let a1 = arena.var(fx.ne_node);
            let a2 = arena.var(fx.ne_node);
            let x = arena.var(fx.other);
            let or = arena.or(vec![a2, x]);
            let root = arena.and(vec![a1, or]);
            s.simplify(arena, root);
            assert_eq!(arena.kind(root), CondKind::Var(fx.ne_node));
        });
    }

    #[test]
    fn test_flattening() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            let a = arena.var(fx.ne_node);
            let b = arena.var(fx.other);
            let inner = arena.and(vec![b]);
            let root = arena.and(vec![a, inner]);
            s.simplify(arena, root);
            // And-inside-And absorbed into the parent
            assert_eq!(arena.kind(root), CondKind::And);
            assert_eq!(arena.children(root).len(), 2);
            assert!(arena
                .children(root)
                .iter()
                .all(|c| matches!(arena.kind(*c), CondKind::Var(_))));
        });
    }

    #[test]
    fn test_distribution_depth_limited() {
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            // A ∧ (B ∨ C) → (A ∧ B) ∨ (A ∧ C)
            let a = arena.var(fx.ne_node);
            let b = arena.var(fx.other);
            let c = arena.var(fx.eq_node);
            let or = arena.or(vec![b, c]);
            let root = arena.and(vec![a, or]);
            let mut changed = false;
            s.distribute(arena, root, 0, &mut changed);
            assert!(changed);
            assert_eq!(arena.kind(root), CondKind::Or);
            for child in arena.children(root) {
                assert_eq!(arena.kind(child), CondKind::And);
            }
        });
    }

    #[test]
    fn test_simplification_preserves_equivalence() {
        // P4: ¬(T xor T') must stay Unsat for the rewrite above
        let fx = fixture();
        with_simplifier(&fx, |s, arena| {
            let v1 = arena.var(fx.ne_node);
            let v2 = arena.var(fx.ne_node);
            let v3 = arena.var(fx.other);
            let root = arena.and(vec![v1, v2, v3]);
            let original = arena.deep_clone(root);
            s.simplify(arena, root);

            let t = tree_term(arena, original);
            let t_prime = tree_term(arena, root);
            let verdict = with_scope(s.solver, |sol| {
                sol.add(SmtTerm::xor(t, t_prime));
                sol.check()
            });
            assert_eq!(verdict, SmtVerdict::Unsat);
        });
    }
}
