//! Path → condition-tree construction
//!
//! Enumerates control paths between the blocks a trace witnesses (CDG
//! preferred, CFG fallback), converts each path's branch decisions into an
//! And-tree with polarity, prunes comparisons with no backward reach to a
//! semantic input, discards SMT-infeasible paths, and returns the Or of what
//! survives. Path sets and feasibility verdicts are memoised.

use super::super::domain::tree::{CondArena, CondId, CondKind};
use super::encode::{data_dep_term, tree_term};
use crate::features::graph_adapter::{ApiClassifier, CallGraphIndex, CdPolarity, CfgIndex};
use crate::features::node_resolution::resolve_values;
use crate::features::slicing::{InterSlicer, IntraSlicer};
use crate::features::smt::domain::term::{SmtTerm, SmtVerdict};
use crate::features::smt::infrastructure::solver::{with_scope, SmtSolver};
use crate::shared::models::ir::{BlockId, InstId, ModuleIr, Opcode, ValueId, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegObj};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Intrinsic conditions that encode compiler constant-folding, not program
/// logic.
const CONSTANT_FOLD_INTRINSIC_PREFIX: &str = "llvm.is.constant";

pub type CdPath = Vec<(BlockId, CdPolarity)>;

pub struct ConditionBuilder<'a, 'b, S: SmtSolver> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    cg: &'a CallGraphIndex,
    api: &'a ApiClassifier<'a>,
    cfg: &'a mut CfgIndex,
    slicer: &'a mut IntraSlicer<'b>,
    solver: &'a mut S,
    path_cache: BTreeMap<(BlockId, BlockId), BTreeSet<CdPath>>,
    feasibility_cache: BTreeMap<CdPath, SmtVerdict>,
    icmp_io_cache: FxHashMap<ValueId, bool>,
    icmp_inter_cache: FxHashMap<SegNodeId, BTreeSet<Vec<SegObj>>>,
}

impl<'a, 'b, S: SmtSolver> ConditionBuilder<'a, 'b, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        module: &'a ModuleIr,
        seg: &'a SegModule,
        cg: &'a CallGraphIndex,
        api: &'a ApiClassifier<'a>,
        cfg: &'a mut CfgIndex,
        slicer: &'a mut IntraSlicer<'b>,
        solver: &'a mut S,
    ) -> Self {
        Self {
            module,
            seg,
            cg,
            api,
            cfg,
            slicer,
            solver,
            path_cache: BTreeMap::new(),
            feasibility_cache: BTreeMap::new(),
            icmp_io_cache: FxHashMap::default(),
            icmp_inter_cache: FxHashMap::default(),
        }
    }

    /// The Or-of-paths condition guarding a trace that witnesses `blocks`.
    /// Paths are rooted at the function entry, so guards dominating the first
    /// witnessed block are collected too.
    pub fn build_trace_condition(
        &mut self,
        arena: &mut CondArena,
        blocks: &[BlockId],
        guarded: &[SegObj],
    ) -> CondId {
        let mut rooted: Vec<BlockId> = Vec::with_capacity(blocks.len() + 1);
        if let Some(first) = blocks.first() {
            let entry = self.module.entry_block(self.module.func_of_block(*first));
            if let Some(entry) = entry {
                if entry != *first {
                    rooted.push(entry);
                }
            }
        }
        rooted.extend_from_slice(blocks);

        let root = arena.alloc(CondKind::Or);
        for path in self.paths_along(&rooted) {
            if !self.is_path_feasible(arena, &path) {
                continue;
            }
            if let Some(cond) = self.path_condition(arena, &path, Some(guarded)) {
                if arena.kind(cond) != CondKind::Const {
                    arena.add_child(root, cond);
                }
            }
        }
        root
    }

    /// Concatenated path segments between every two consecutive blocks.
    pub fn paths_along(&mut self, blocks: &[BlockId]) -> BTreeSet<CdPath> {
        let (first, rest) = match blocks.split_first() {
            Some(split) => split,
            None => return BTreeSet::new(),
        };
        let mut start = *first;
        let mut total: Vec<CdPath> = Vec::new();
        for &bb in rest {
            if bb == start {
                continue;
            }
            let paths = self.paths_between(start, bb);
            start = bb;
            if total.is_empty() {
                total.extend(paths.iter().cloned());
            } else {
                let mut combined = Vec::new();
                for prefix in &total {
                    for segment in &paths {
                        let mut path = segment.clone();
                        path.extend(prefix.iter().cloned());
                        combined.push(path);
                    }
                }
                total = combined;
            }
        }
        total.into_iter().collect()
    }

    /// CDG paths from `start` to `end`, falling back to a CFG walk when the
    /// CDG yields nothing. Cached per block pair.
    pub fn paths_between(&mut self, start: BlockId, end: BlockId) -> BTreeSet<CdPath> {
        if let Some(cached) = self.path_cache.get(&(start, end)) {
            return cached.clone();
        }
        let mut total = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut cur = Vec::new();
        self.collect_cdg(start, end, &mut visited, &mut cur, &mut total);

        if total.is_empty() {
            let mut visited = BTreeSet::new();
            let mut on_path = BTreeSet::new();
            let mut cur = Vec::new();
            self.collect_cfg(start, end, &mut visited, &mut on_path, &mut cur, &mut total);
        }
        self.path_cache.insert((start, end), total.clone());
        total
    }

    fn collect_cdg(
        &mut self,
        start: BlockId,
        end: BlockId,
        visited: &mut BTreeSet<(BlockId, CdPolarity)>,
        cur: &mut Vec<(BlockId, CdPolarity)>,
        total: &mut BTreeSet<CdPath>,
    ) {
        if start == end {
            total.insert(cur.clone());
            return;
        }
        let deps = self.cfg.controllers_of(self.module, end);
        if deps.is_empty() && !cur.is_empty() {
            total.insert(cur.clone());
            return;
        }
        let mut live_deps = 0;
        for (controller, polarity) in deps {
            if start != controller && !self.cfg.block_reachable(self.module, start, controller) {
                continue;
            }
            if visited.contains(&(controller, polarity)) {
                continue;
            }
            live_deps += 1;
            visited.insert((controller, polarity));
            cur.push((controller, polarity));
            self.collect_cdg(start, controller, visited, cur, total);
            cur.pop();
            visited.remove(&(controller, polarity));
        }
        if live_deps == 0 && !cur.is_empty() {
            total.insert(cur.clone());
        }
    }

    fn collect_cfg(
        &mut self,
        start: BlockId,
        end: BlockId,
        visited: &mut BTreeSet<(BlockId, CdPolarity)>,
        on_path: &mut BTreeSet<BlockId>,
        cur: &mut Vec<(BlockId, CdPolarity)>,
        total: &mut BTreeSet<CdPath>,
    ) {
        if start != end && !self.cfg.block_reachable(self.module, start, end) {
            return;
        }
        if start == end {
            total.insert(cur.clone());
            return;
        }
        if !on_path.insert(start) {
            return; // CFG cycle
        }
        let polarity = self.cfg.controls(self.module, start, end);
        let pushed = polarity != CdPolarity::None && !visited.contains(&(start, polarity));
        if pushed {
            visited.insert((start, polarity));
            cur.push((start, polarity));
        }
        for succ in self.module.block(start).succs.clone() {
            self.collect_cfg(succ, end, visited, on_path, cur, total);
        }
        if pushed {
            visited.remove(&(start, polarity));
            cur.pop();
        }
        on_path.remove(&start);
    }

    /// And-tree for one path. With `guarded` present, comparisons that never
    /// reach a semantic input are pruned; `None` keeps everything (the
    /// feasibility variant).
    pub fn path_condition(
        &mut self,
        arena: &mut CondArena,
        path: &[(BlockId, CdPolarity)],
        guarded: Option<&[SegObj]>,
    ) -> Option<CondId> {
        let root = arena.alloc(CondKind::And);
        for (bb, polarity) in path {
            let cond = match self.branch_condition(arena, *bb, guarded) {
                Some(c) => c,
                None => continue,
            };
            if *polarity == CdPolarity::False {
                let negated = arena.not(cond);
                arena.add_child(root, negated);
            } else {
                arena.add_child(root, cond);
            }
        }
        if arena.children(root).is_empty() {
            return None;
        }
        Some(root)
    }

    /// The tree for one block's branch condition: a Var for an icmp, a
    /// canonical And/Or subtree for a binary combination of icmps.
    fn branch_condition(
        &mut self,
        arena: &mut CondArena,
        bb: BlockId,
        guarded: Option<&[SegObj]>,
    ) -> Option<CondId> {
        let terminator = *self.module.block(bb).insts.last()?;
        let term = self.module.inst(terminator);
        if term.opcode != Opcode::CondBr {
            debug!(block = %self.module.block(bb).name, "unhandled terminator");
            return None;
        }
        let cond_value = *term.operands.first()?;
        self.bool_expr(arena, bb, cond_value, guarded)
    }

    fn bool_expr(
        &mut self,
        arena: &mut CondArena,
        bb: BlockId,
        value: ValueId,
        guarded: Option<&[SegObj]>,
    ) -> Option<CondId> {
        let inst = match self.module.value(value).kind {
            ValueKind::Inst(i) => i,
            _ => return None,
        };
        let func = self.module.func_of_block(bb);
        match self.module.inst(inst).opcode {
            Opcode::Icmp(_) => {
                if let Some(guarded) = guarded {
                    if !self.is_icmp_io(inst, guarded) {
                        return None;
                    }
                }
                let node = self.seg.find_node(func, value)?;
                Some(arena.var(node))
            }
            Opcode::BinOp(op) => {
                use crate::shared::models::ir::BinOp;
                let kind = match op {
                    BinOp::And => CondKind::And,
                    BinOp::Or => CondKind::Or,
                    _ => {
                        warn!("unhandled boolean combinator in branch condition");
                        return None;
                    }
                };
                let operands = self.module.inst(inst).operands.clone();
                let combined = arena.alloc(kind);
                for operand in operands {
                    if let Some(child) = self.bool_expr(arena, bb, operand, guarded) {
                        arena.add_child(combined, child);
                    }
                }
                if arena.children(combined).is_empty() {
                    None
                } else {
                    Some(combined)
                }
            }
            Opcode::Call => {
                let callee = self.module.direct_callee(inst)?;
                if self
                    .module
                    .func(callee)
                    .name
                    .starts_with(CONSTANT_FOLD_INTRINSIC_PREFIX)
                {
                    return None;
                }
                warn!(callee = %self.module.func(callee).name, "unhandled call condition");
                None
            }
            _ => {
                warn!("unhandled branch condition shape");
                None
            }
        }
    }

    /// SMT feasibility of one path; Unsat paths are pruned, Unknown is kept
    /// (conservative). Verdicts cached per path.
    pub fn is_path_feasible(&mut self, arena: &mut CondArena, path: &[(BlockId, CdPolarity)]) -> bool {
        if let Some(verdict) = self.feasibility_cache.get(path) {
            return *verdict != SmtVerdict::Unsat;
        }
        let cond = match self.path_condition(arena, path, None) {
            Some(c) => c,
            None => {
                self.feasibility_cache.insert(path.to_vec(), SmtVerdict::Sat);
                return true;
            }
        };
        let tree = tree_term(arena, cond);
        let deps = data_dep_term(self.module, self.seg, self.slicer, arena, cond);
        let verdict = with_scope(self.solver, |s| {
            s.add(SmtTerm::and(vec![deps, tree]));
            s.check()
        });
        if verdict == SmtVerdict::Unsat {
            debug!("infeasible control path pruned");
        }
        self.feasibility_cache.insert(path.to_vec(), verdict);
        verdict != SmtVerdict::Unsat
    }

    // ──────────────────────────────────────────────────────────────────
    // icmp I/O relevance
    // ──────────────────────────────────────────────────────────────────

    /// An icmp stays in the tree only if some operand is backward-reachable
    /// from a semantic input.
    pub fn is_icmp_io(&mut self, icmp: InstId, _guarded: &[SegObj]) -> bool {
        let value = self.module.inst(icmp).value;
        if let Some(&cached) = self.icmp_io_cache.get(&value) {
            return cached;
        }
        let mut values = BTreeSet::new();
        values.insert(value);
        let nodes = resolve_values(self.module, self.seg, &values);

        let mut any_valid = false;
        for node in nodes {
            let flows = self.icmp_inter_flows(node);
            for trace in &flows {
                let source = match self.seg.last_node(trace) {
                    Some(s) => s,
                    None => continue,
                };
                let is_const = self
                    .seg
                    .node(source)
                    .dbg_value
                    .is_some_and(|v| matches!(self.module.value(v).kind, ValueKind::ConstInt(_)));
                if is_const {
                    continue;
                }
                if self.is_input_node(source, false) {
                    any_valid = true;
                    break;
                }
            }
            if any_valid {
                break;
            }
        }
        self.icmp_io_cache.insert(value, any_valid);
        any_valid
    }

    /// Inter-procedural backward flows from a condition node, cached.
    pub fn icmp_inter_flows(&mut self, node: SegNodeId) -> BTreeSet<Vec<SegObj>> {
        if let Some(cached) = self.icmp_inter_cache.get(&node) {
            return cached.clone();
        }
        let inter = InterSlicer::new(self.module, self.seg, self.cg, self.api);
        let mut out = BTreeSet::new();
        for call_trace in self.cg.upper_call_traces(self.seg.node(node).func) {
            let mut trace = call_trace.clone();
            let mut cur = Vec::new();
            inter.backward(node, &mut trace, &mut cur, &mut out);
        }
        self.icmp_inter_cache.insert(node, out.clone());
        out
    }

    /// Semantic-source classification of a slice endpoint.
    pub fn is_input_node(&self, node: SegNodeId, intra: bool) -> bool {
        let n = self.seg.node(node);
        if n.is_argument() {
            return intra || self.cg.is_indirect_target(n.func);
        }
        if n.is_call_site_output() {
            if let Some(site) = n.owning_call_site() {
                if let Some(callee) = self.seg.site(site).called_function() {
                    let name = &self.module.func(callee).name;
                    if name == crate::features::graph_adapter::api::OBJECTSIZE_INTRINSIC {
                        return false;
                    }
                    return intra || self.api.is_api(callee);
                }
            }
            return false;
        }
        if let Some(value) = n.dbg_value {
            match self.module.value(value).kind {
                ValueKind::Global(_) => return true,
                ValueKind::Argument { func, .. } => {
                    return intra || self.cg.is_indirect_target(func);
                }
                ValueKind::Inst(inst) => {
                    if let Some(callee) = self.module.direct_callee(inst) {
                        let name = &self.module.func(callee).name;
                        if name == crate::features::graph_adapter::api::OBJECTSIZE_INTRINSIC {
                            return false;
                        }
                        return intra || self.api.is_api(callee);
                    }
                }
                _ => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::smt::infrastructure::solver::BoundedSolver;
    use crate::shared::models::ir::{dbg, IcmpPred};
    use crate::shared::models::OpcodeKind;

    /// diamond with `if (bad != 0)` guarding if.then
    struct Fixture {
        module: ModuleIr,
        seg: SegModule,
        entry: BlockId,
        then_bb: BlockId,
        icmp_value_node: SegNodeId,
    }

    fn fixture() -> Fixture {
        let mut m = ModuleIr::new();
        let f = m.add_function("after.patch.probe", "driver/x.c");
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "if.then");
        let end = m.add_block(f, "if.end");
        m.add_edge(entry, then_bb);
        m.add_edge(entry, end);
        m.add_edge(then_bb, end);
        m.mark_address_taken(f);

        let bad = m.add_argument(f, "bad", "i32");
        let zero = m.const_int(0, "i32");
        let icmp = m.add_inst(
            entry,
            Opcode::Icmp(IcmpPred::Ne),
            vec![bad, zero],
            "i1",
            dbg("driver/x.c", 11),
        );
        let icmp_v = m.inst(icmp).value;
        let tv = m.block_value(then_bb);
        let ev = m.block_value(end);
        m.add_inst(entry, Opcode::CondBr, vec![icmp_v, tv, ev], "void", dbg("driver/x.c", 11));
        m.add_inst(end, Opcode::Ret, vec![zero], "void", dbg("driver/x.c", 14));

        // make the function an indirect target so its argument is a source
        let holder = m.add_function("after.patch.init", "driver/x.c");
        let hb = m.add_block(holder, "entry");
        let g = m.add_global("ops", "ptr");
        let gv = m.global_value(g);
        let fv = m.func_value(f);
        m.add_inst(hb, Opcode::Store, vec![fv, gv], "void", None);

        let mut seg = SegModule::new();
        let bad_n = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(bad), "i32");
        let zero_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");
        let op = seg.add_node(f, SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
        let val = seg.add_node(f, SegNodeKind::SimpleOperand, Some(icmp_v), "i1");
        seg.connect(op, bad_n);
        seg.connect(op, zero_n);
        seg.connect(val, op);

        Fixture {
            module: m,
            seg,
            entry,
            then_bb,
            icmp_value_node: val,
        }
    }

    #[test]
    fn test_condition_for_guarded_block() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let mut cfg = CfgIndex::new();
        let mut slicer = IntraSlicer::new(&fx.module, &fx.seg);
        let mut solver = BoundedSolver::new();
        let mut builder = ConditionBuilder::new(
            &fx.module, &fx.seg, &cg, &api, &mut cfg, &mut slicer, &mut solver,
        );

        let mut arena = CondArena::new();
        let cond = builder.build_trace_condition(
            &mut arena,
            &[fx.entry, fx.then_bb],
            &[],
        );

        // the surviving disjunct asserts the branch was taken
        let nodes = arena.obtain_nodes(cond);
        assert!(nodes.contains(&fx.icmp_value_node));
        // no negation anywhere: polarity was True
        let dump = arena.dump(cond);
        assert!(!dump.contains("NOT"));
    }

    #[test]
    fn test_paths_between_cached() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let mut cfg = CfgIndex::new();
        let mut slicer = IntraSlicer::new(&fx.module, &fx.seg);
        let mut solver = BoundedSolver::new();
        let mut builder = ConditionBuilder::new(
            &fx.module, &fx.seg, &cg, &api, &mut cfg, &mut slicer, &mut solver,
        );

        let p1 = builder.paths_between(fx.entry, fx.then_bb);
        let p2 = builder.paths_between(fx.entry, fx.then_bb);
        assert_eq!(p1, p2);
        assert!(p1
            .iter()
            .any(|p| p.contains(&(fx.entry, CdPolarity::True))));
    }

    #[test]
    fn test_icmp_io_requires_semantic_source() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let mut cfg = CfgIndex::new();
        let mut slicer = IntraSlicer::new(&fx.module, &fx.seg);
        let mut solver = BoundedSolver::new();
        let mut builder = ConditionBuilder::new(
            &fx.module, &fx.seg, &cg, &api, &mut cfg, &mut slicer, &mut solver,
        );

        // `bad` is the argument of an indirect target: a semantic input
        assert!(builder.is_input_node(
            fx.seg.graph(fx.seg.node(fx.icmp_value_node).func).unwrap().common_args[0],
            false
        ));
    }
}
