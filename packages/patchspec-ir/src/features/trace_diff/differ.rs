//! Trace differ
//!
//! Bootstraps the cross-build matched-node relation from the projector's
//! matched values, drives the staged intra slicing over the changed nodes,
//! and classifies before/after enhanced traces into added / removed /
//! condition-changed / order-changed / unchanged.

use super::node_match::{
    nodes_structurally_matched, optional_sites_matched, patch_nodes_matched, patch_sites_matched,
};
use crate::features::condition::{CondArena, CondId, CondKind};
use crate::features::enhanced_trace::{traces_equal, EnhancedTrace};
use crate::features::patch_projection::domain::ProjectionState;
use crate::features::patch_projection::ValueMatcher;
use crate::features::slicing::{IntraSlicer, SegTrace};
use crate::features::smt::domain::term::{SmtTerm, SmtVerdict};
use crate::features::smt::infrastructure::node_encoder;
use crate::features::smt::infrastructure::solver::{with_scope, SmtSolver};
use crate::shared::models::ir::{ModuleIr, ValueId};
use crate::shared::models::{MatchedMap, SegModule, SegNodeId, SegNodeKind, SegObj};
use crate::shared::utils::{is_after_variant, is_before_variant};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Classification of one diff run, as indices into the before/after vectors.
#[derive(Debug, Default, Clone)]
pub struct DiffOutcome {
    pub unchanged: Vec<(usize, usize)>,
    pub cond_changed: Vec<(usize, usize)>,
    pub order_changed: Vec<(usize, usize)>,
    pub removed: Vec<usize>,
    pub added: Vec<usize>,
}

pub struct TraceDiffer<'a> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    /// before-node ↔ after-node (P1 symmetric)
    pub matched_nodes: MatchedMap<SegNodeId>,
    /// positively matched condition pairs
    matched_conditions: FxHashSet<(CondId, CondId)>,
    /// SMT verdicts for condition pairs
    cond_pair_cache: FxHashMap<(CondId, CondId), SmtVerdict>,
}

impl<'a> TraceDiffer<'a> {
    pub fn new(module: &'a ModuleIr, seg: &'a SegModule) -> Self {
        Self {
            module,
            seg,
            matched_nodes: MatchedMap::new(),
            matched_conditions: FxHashSet::default(),
            cond_pair_cache: FxHashMap::default(),
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Node matching bootstrap
    // ──────────────────────────────────────────────────────────────────

    /// Match the SEG nodes behind every matched IR pair; nodes of added and
    /// removed values stay unmatched by construction.
    pub fn match_ab_seg_nodes(&mut self, proj: &mut ProjectionState) {
        let pairs: Vec<(ValueId, ValueId)> = proj.matched_values.iter_before().collect();
        let matcher = ValueMatcher::new(self.module);
        for (v1, v2) in pairs {
            if matcher.is_skip_match_value(v1) || matcher.is_skip_match_value(v2) {
                continue;
            }
            let mut before_set = BTreeSet::new();
            before_set.insert(v1);
            let mut after_set = BTreeSet::new();
            after_set.insert(v2);
            let before_nodes =
                crate::features::node_resolution::resolve_values(self.module, self.seg, &before_set);
            let after_nodes =
                crate::features::node_resolution::resolve_values(self.module, self.seg, &after_set);

            for n1 in &before_nodes {
                if self.matched_nodes.contains_before(*n1) {
                    continue;
                }
                let mut found = false;
                for n2 in &after_nodes {
                    if self.matched_nodes.contains_after(*n2) {
                        continue;
                    }
                    if patch_nodes_matched(self.module, self.seg, proj, *n1, *n2) {
                        self.matched_nodes.insert(*n1, *n2);
                        found = true;
                        break;
                    }
                }
                if !found {
                    debug!(node = n1.0, "no matched SEG node for matched value");
                }
            }
        }
        info!(
            matched_nodes = self.matched_nodes.len(),
            "A/B SEG node matching done"
        );
        debug_assert!(self.matched_nodes.is_symmetric());
    }

    /// Slice criteria for one side: the changed nodes plus the matched nodes
    /// living in changed functions of that variant.
    pub fn slicing_criteria(
        &self,
        proj: &ProjectionState,
        changed_nodes: &BTreeSet<SegNodeId>,
        before_side: bool,
    ) -> BTreeSet<SegNodeId> {
        let mut criteria = changed_nodes.clone();
        for (n1, n2) in self.matched_nodes.iter_before() {
            let node = if before_side { n1 } else { n2 };
            let func = self.seg.node(node).func;
            let name = &self.module.func(func).name;
            let variant_ok = if before_side {
                is_before_variant(name)
            } else {
                is_after_variant(name)
            };
            if variant_ok && proj.changed_funcs.contains(&func) {
                criteria.insert(node);
            }
        }
        criteria
    }

    /// Closure stage: every operand node appearing on a discovered trace
    /// becomes a criterion itself.
    pub fn closure_criteria(
        &self,
        traces: &BTreeSet<SegTrace>,
        processed: &mut BTreeSet<SegNodeId>,
    ) -> BTreeSet<SegNodeId> {
        let mut fresh = BTreeSet::new();
        for trace in traces {
            for obj in &trace.objs {
                let node = match obj.as_node() {
                    Some(n) => n,
                    None => continue,
                };
                if self.seg.node(node).is_opcode() {
                    continue;
                }
                if super::node_match::dbg_is_const(self.module, self.seg, node) {
                    continue;
                }
                if self
                    .seg
                    .resolved_name(self.module, node)
                    .map(crate::shared::utils::is_excopy_name)
                    .unwrap_or(false)
                {
                    continue;
                }
                if processed.insert(node) {
                    fresh.insert(node);
                }
            }
        }
        fresh
    }

    // ──────────────────────────────────────────────────────────────────
    // Pairwise matching
    // ──────────────────────────────────────────────────────────────────

    pub fn traces_matched(
        &mut self,
        proj: &mut ProjectionState,
        t1: &SegTrace,
        t2: &SegTrace,
    ) -> bool {
        if !self.objs_matched_with_phi(proj, &t1.objs, &t2.objs)
            && !self.objs_matched_without_phi(proj, &t1.objs, &t2.objs)
        {
            return false;
        }
        if t1.blocks.len() != t2.blocks.len() {
            return false;
        }
        for (b1, b2) in t1.blocks.iter().zip(t2.blocks.iter()) {
            if b1 == b2 {
                continue;
            }
            if self.module.func_of_block(*b1) == self.module.func_of_block(*b2) {
                return false;
            }
            if let Some(partner) = proj.matched_blocks.partner(*b1) {
                if partner != *b2 {
                    return false;
                }
            }
        }
        true
    }

    fn objs_matched_with_phi(
        &mut self,
        proj: &mut ProjectionState,
        t1: &[SegObj],
        t2: &[SegObj],
    ) -> bool {
        if t1.len() != t2.len() {
            return false;
        }
        for (idx, (o1, o2)) in t1.iter().zip(t2.iter()).enumerate() {
            if o1 == o2 {
                continue;
            }
            match (o1, o2) {
                (SegObj::Node(n1), SegObj::Node(n2)) => {
                    if let Some(partner) = self.matched_nodes.partner(*n1) {
                        if partner == *n2 {
                            continue;
                        }
                        return false;
                    }
                    if let Some(partner) = self.matched_nodes.partner(*n2) {
                        if partner == *n1 {
                            continue;
                        }
                        return false;
                    }
                    if patch_nodes_matched(self.module, self.seg, proj, *n1, *n2) {
                        continue;
                    }
                    // phi tolerance: incoming-block sets must intersect
                    // after mapping through the matched-block relation
                    if self.phis_tolerantly_matched(proj, t1, t2, idx, *n1, *n2) {
                        continue;
                    }
                    return false;
                }
                (SegObj::Site(s1), SegObj::Site(s2)) => {
                    if !patch_sites_matched(self.module, self.seg, proj, *s1, *s2) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    fn phis_tolerantly_matched(
        &mut self,
        proj: &mut ProjectionState,
        t1: &[SegObj],
        t2: &[SegObj],
        idx: usize,
        n1: SegNodeId,
        n2: SegNodeId,
    ) -> bool {
        let inc1 = match &self.seg.node(n1).kind {
            SegNodeKind::Phi { incomings } => incomings.clone(),
            _ => return false,
        };
        let inc2 = match &self.seg.node(n2).kind {
            SegNodeKind::Phi { incomings } => incomings.clone(),
            _ => return false,
        };
        let prev1 = idx.checked_sub(1).and_then(|i| t1[i].as_node());
        let prev2 = idx.checked_sub(1).and_then(|i| t2[i].as_node());

        let blocks_of = |incs: &[crate::shared::models::PhiIncoming],
                         prev: Option<SegNodeId>,
                         seg: &SegModule| {
            let mut blocks = BTreeSet::new();
            for inc in incs {
                let direct = Some(inc.value) == prev;
                let by_value = match (prev, seg.node(inc.value).dbg_value) {
                    (Some(p), Some(v)) => seg.node(p).dbg_value == Some(v),
                    _ => false,
                };
                if direct || by_value {
                    blocks.insert(inc.block);
                }
            }
            blocks
        };
        let blocks1 = blocks_of(&inc1, prev1, self.seg);
        let blocks2 = blocks_of(&inc2, prev2, self.seg);

        let matcher = ValueMatcher::new(self.module);
        for b1 in &blocks1 {
            for b2 in &blocks2 {
                if matcher.blocks_match(proj, *b1, *b2) {
                    return true;
                }
            }
        }
        false
    }

    fn objs_matched_without_phi(
        &mut self,
        proj: &mut ProjectionState,
        t1: &[SegObj],
        t2: &[SegObj],
    ) -> bool {
        let strip = |objs: &[SegObj], seg: &SegModule| -> Vec<SegObj> {
            objs.iter()
                .filter(|o| match o.as_node() {
                    Some(n) => !matches!(seg.node(n).kind, SegNodeKind::Phi { .. }),
                    None => true,
                })
                .copied()
                .collect()
        };
        let s1 = strip(t1, self.seg);
        let s2 = strip(t2, self.seg);
        if s1.len() != s2.len() {
            return false;
        }
        for (o1, o2) in s1.iter().zip(s2.iter()) {
            if o1 == o2 {
                continue;
            }
            match (o1, o2) {
                (SegObj::Node(n1), SegObj::Node(n2)) => {
                    if let Some(partner) = self.matched_nodes.partner(*n1) {
                        if partner != *n2 {
                            return false;
                        }
                        continue;
                    }
                    if !patch_nodes_matched(self.module, self.seg, proj, *n1, *n2) {
                        return false;
                    }
                }
                (SegObj::Site(s1), SegObj::Site(s2)) => {
                    if !patch_sites_matched(self.module, self.seg, proj, *s1, *s2) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Site comparisons run first: a call-site mismatch (different callee)
    /// rejects the pair before any node comparison can record structural
    /// value matches that a better pairing should own.
    pub fn io_matched(
        &mut self,
        proj: &mut ProjectionState,
        a: &EnhancedTrace,
        b: &EnhancedTrace,
    ) -> bool {
        if !optional_sites_matched(self.module, self.seg, proj, a.input.used_site, b.input.used_site)
        {
            return false;
        }
        if !optional_sites_matched(
            self.module,
            self.seg,
            proj,
            a.output.used_site,
            b.output.used_site,
        ) {
            return false;
        }
        let nodes_ok = match (a.input.used_node, b.input.used_node) {
            (Some(n1), Some(n2)) => patch_nodes_matched(self.module, self.seg, proj, n1, n2),
            (None, None) => true,
            _ => false,
        };
        if !nodes_ok {
            return false;
        }
        match (a.output.used_node, b.output.used_node) {
            (Some(n1), Some(n2)) => patch_nodes_matched(self.module, self.seg, proj, n1, n2),
            (None, None) => true,
            _ => false,
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Condition matching
    // ──────────────────────────────────────────────────────────────────

    pub fn conditions_matched<S: SmtSolver>(
        &mut self,
        proj: &mut ProjectionState,
        arena: &CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        c1: CondId,
        c2: CondId,
    ) -> bool {
        if self.conditions_matched_fast(proj, arena, c1, c2) {
            return true;
        }
        self.conditions_matched_smt(proj, arena, slicer, solver, c1, c2)
    }

    /// Structural walk with children matched as multisets; `Var` payloads
    /// resolve through the matched-node relation (and extend it when a fresh
    /// structural match crosses the variants).
    pub fn conditions_matched_fast(
        &mut self,
        proj: &mut ProjectionState,
        arena: &CondArena,
        c1: CondId,
        c2: CondId,
    ) -> bool {
        if self.matched_conditions.contains(&(c1, c2)) {
            return true;
        }
        if arena.kind(c1) != arena.kind(c2) {
            return false;
        }
        if let (CondKind::Var(n1), CondKind::Var(n2)) = (arena.kind(c1), arena.kind(c2)) {
            if n1 == n2 {
                return true;
            }
            if let Some(partner) = self.matched_nodes.partner(n1) {
                let ok = partner == n2;
                if ok {
                    self.matched_conditions.insert((c1, c2));
                    self.matched_conditions.insert((c2, c1));
                }
                return ok;
            }
            if patch_nodes_matched(self.module, self.seg, proj, n1, n2) {
                let f1 = &self.module.func(self.seg.node(n1).func).name;
                let f2 = &self.module.func(self.seg.node(n2).func).name;
                if is_before_variant(f1) && is_after_variant(f2) {
                    self.matched_nodes.insert(n1, n2);
                }
                self.matched_conditions.insert((c1, c2));
                self.matched_conditions.insert((c2, c1));
                return true;
            }
            return false;
        }

        let ca = arena.children(c1);
        let cb = arena.children(c2);
        if ca.len() != cb.len() {
            return false;
        }
        let mut used = vec![false; cb.len()];
        for x in &ca {
            let mut found = false;
            for (j, y) in cb.iter().enumerate() {
                if used[j] {
                    continue;
                }
                if self.conditions_matched_fast(proj, arena, *x, *y) {
                    used[j] = true;
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        self.matched_conditions.insert((c1, c2));
        self.matched_conditions.insert((c2, c1));
        true
    }

    /// SMT equivalence: matched-node equalities ∧ data dependencies ∧
    /// `(T1 xor T2)` must be Unsat.
    pub fn conditions_matched_smt<S: SmtSolver>(
        &mut self,
        proj: &mut ProjectionState,
        arena: &CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        c1: CondId,
        c2: CondId,
    ) -> bool {
        if let Some(&verdict) = self.cond_pair_cache.get(&(c1, c2)) {
            return verdict == SmtVerdict::Unsat;
        }

        // nodes in each condition plus their backward slice sources
        let enriched = |slicer: &mut IntraSlicer, arena: &CondArena, c: CondId| {
            let mut nodes = arena.obtain_nodes(c);
            for node in nodes.clone() {
                for slice in slicer.backward(node) {
                    if let Some(source) = slice.last().and_then(|o| o.as_node()) {
                        if !super::node_match::dbg_is_const(self.module, self.seg, source) {
                            nodes.insert(source);
                        }
                    }
                }
            }
            nodes
        };
        let nodes1 = enriched(slicer, arena, c1);
        let nodes2 = enriched(slicer, arena, c2);

        let mut pairs: Vec<(SegNodeId, SegNodeId)> = Vec::new();
        let mut used: BTreeSet<SegNodeId> = BTreeSet::new();
        for &n1 in &nodes1 {
            if let Some(partner) = self.matched_nodes.partner(n1) {
                if nodes2.contains(&partner) && used.insert(partner) {
                    pairs.push((n1, partner));
                    continue;
                }
            }
            for &n2 in &nodes2 {
                if used.contains(&n2) {
                    continue;
                }
                if patch_nodes_matched(self.module, self.seg, proj, n1, n2) {
                    let f1 = &self.module.func(self.seg.node(n1).func).name;
                    let f2 = &self.module.func(self.seg.node(n2).func).name;
                    if is_before_variant(f1) && is_after_variant(f2) {
                        self.matched_nodes.insert(n1, n2);
                    }
                    used.insert(n2);
                    pairs.push((n1, n2));
                    break;
                }
            }
        }
        if pairs.is_empty() {
            return false;
        }

        let deps1 = crate::features::condition::infrastructure::encode::data_dep_term(
            self.module,
            self.seg,
            slicer,
            arena,
            c1,
        );
        let deps2 = crate::features::condition::infrastructure::encode::data_dep_term(
            self.module,
            self.seg,
            slicer,
            arena,
            c2,
        );
        let t1 = crate::features::condition::infrastructure::encode::tree_term(arena, c1);
        let t2 = crate::features::condition::infrastructure::encode::tree_term(arena, c2);

        let verdict = with_scope(solver, |s| {
            for (n1, n2) in &pairs {
                s.add(SmtTerm::eq(
                    node_encoder::expr_for_node(*n1),
                    node_encoder::expr_for_node(*n2),
                ));
            }
            s.add(deps1);
            s.add(deps2);
            s.add(SmtTerm::xor(t1, t2));
            s.check()
        });

        self.cond_pair_cache.insert((c1, c2), verdict);
        self.cond_pair_cache.insert((c2, c1), verdict);
        if verdict == SmtVerdict::Unknown {
            warn!("condition equivalence undecided; treated as distinct");
        }
        verdict == SmtVerdict::Unsat
    }

    // ──────────────────────────────────────────────────────────────────
    // Order matching
    // ──────────────────────────────────────────────────────────────────

    pub fn orders_matched(
        &mut self,
        proj: &mut ProjectionState,
        a: &EnhancedTrace,
        b: &EnhancedTrace,
    ) -> bool {
        let (s1, s2) = match (a.output.used_site, b.output.used_site) {
            (Some(s1), Some(s2)) => (s1, s2),
            _ => return a.output_order == b.output_order,
        };
        if !patch_sites_matched(self.module, self.seg, proj, s1, s2) {
            return false;
        }
        a.output_order == b.output_order
    }

    pub fn enhanced_matched<S: SmtSolver>(
        &mut self,
        proj: &mut ProjectionState,
        arena: &CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        a: &EnhancedTrace,
        b: &EnhancedTrace,
    ) -> bool {
        self.io_matched(proj, a, b)
            && self.traces_matched(proj, &a.trace, &b.trace)
            && self.conditions_matched(proj, arena, slicer, solver, a.cond, b.cond)
            && self.orders_matched(proj, a, b)
    }

    // ──────────────────────────────────────────────────────────────────
    // Classification
    // ──────────────────────────────────────────────────────────────────

    pub fn classify<S: SmtSolver>(
        &mut self,
        proj: &mut ProjectionState,
        arena: &CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        before: &[EnhancedTrace],
        after: &[EnhancedTrace],
    ) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();
        let mut after_taken = vec![false; after.len()];
        let mut before_taken = vec![false; before.len()];

        // pre-pass: fully equal traces pair up as unchanged first
        for (i, t1) in before.iter().enumerate() {
            for (j, t2) in after.iter().enumerate() {
                if after_taken[j] {
                    continue;
                }
                if traces_equal(arena, t1, t2)
                    || self.enhanced_matched(proj, arena, slicer, solver, t1, t2)
                {
                    outcome.unchanged.push((i, j));
                    before_taken[i] = true;
                    after_taken[j] = true;
                    break;
                }
            }
        }

        // slice-matching pass over the rest
        for (i, t1) in before.iter().enumerate() {
            if before_taken[i] {
                continue;
            }
            let mut found = false;
            for (j, t2) in after.iter().enumerate() {
                if after_taken[j] {
                    continue;
                }
                if !self.io_matched(proj, t1, t2) {
                    continue;
                }
                if !self.traces_matched(proj, &t1.trace, &t2.trace) {
                    continue;
                }
                found = true;
                if !self.conditions_matched(proj, arena, slicer, solver, t1.cond, t2.cond) {
                    outcome.cond_changed.push((i, j));
                } else if !self.orders_matched(proj, t1, t2) {
                    outcome.order_changed.push((i, j));
                } else {
                    outcome.unchanged.push((i, j));
                }
                before_taken[i] = true;
                after_taken[j] = true;
                break;
            }
            if !found {
                outcome.removed.push(i);
            }
        }

        for (j, taken) in after_taken.iter().enumerate() {
            if !taken {
                outcome.added.push(j);
            }
        }

        info!(
            unchanged = outcome.unchanged.len(),
            cond_changed = outcome.cond_changed.len(),
            order_changed = outcome.order_changed.len(),
            removed = outcome.removed.len(),
            added = outcome.added.len(),
            "trace classification done"
        );
        outcome
    }
}

/// Structural match ignoring everything that needs projection state; used by
/// tests and by the checker transformation.
pub fn plain_nodes_matched(seg: &SegModule, n1: SegNodeId, n2: SegNodeId) -> bool {
    nodes_structurally_matched(seg, n1, n2)
}
