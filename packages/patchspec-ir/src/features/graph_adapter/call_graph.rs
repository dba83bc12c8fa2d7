//! Call graph index
//!
//! Builds the caller→callee multigraph (declarations, intrinsics, and
//! sanitizer helpers excluded), derives an acyclic caller/callee relation via
//! Kahn's algorithm, classifies indirect-call targets, and answers the
//! inter-procedural queries the slicer and the order computation need:
//! call-trace enumeration, common-caller search (SCC-cached), and
//! instruction reachability across functions.

use super::cdg::CfgIndex;
use crate::shared::models::ir::{FuncId, InstId, ModuleIr, Opcode, ValueKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::tarjan_scc;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

/// A chain of callers ending at (or starting from) a function
pub type CallTrace = Vec<FuncId>;

/// Common-caller witness: the caller plus the two call sites reaching the
/// queried functions (equal sites when one function transitively invokes the
/// other; absent for the trivial same-function case).
pub type CallerWitness = (FuncId, Option<(InstId, InstId)>);

pub struct CallGraphIndex {
    /// Acyclic caller → callees
    pub caller_to_callees: BTreeMap<FuncId, BTreeSet<FuncId>>,
    /// Acyclic callee → callers
    pub callee_to_callers: BTreeMap<FuncId, BTreeSet<FuncId>>,
    /// Raw (cyclic) caller → callees, used by the common-caller search
    raw_callers: BTreeMap<FuncId, BTreeSet<FuncId>>,
    /// (caller, callee) → call-site instructions
    pub call_sites: BTreeMap<(FuncId, FuncId), Vec<InstId>>,
    /// Likely dispatch-table entries
    indirect_targets: BTreeSet<FuncId>,
    /// SCC root per function, for functions inside a non-trivial SCC
    scc_root: FxHashMap<FuncId, FuncId>,
    /// Memoised all-callers maps, shared across SCC members
    all_callers_cache: FxHashMap<FuncId, BTreeMap<FuncId, BTreeSet<InstId>>>,
    /// Memoised (symmetric) common-caller results
    common_caller_cache: FxHashMap<(FuncId, FuncId), BTreeSet<CallerWitness>>,
    /// Memoised cross-function reachability
    reach_cache: FxHashMap<(InstId, InstId), bool>,
}

impl CallGraphIndex {
    pub fn build(module: &ModuleIr, sanitizer_prefix: &str) -> Self {
        let mut raw: BTreeMap<FuncId, BTreeSet<FuncId>> = BTreeMap::new();
        let mut raw_inverse: BTreeMap<FuncId, BTreeSet<FuncId>> = BTreeMap::new();
        let mut call_sites: BTreeMap<(FuncId, FuncId), Vec<InstId>> = BTreeMap::new();

        for caller in module.func_ids() {
            let f = module.func(caller);
            if f.is_declaration || f.is_intrinsic {
                continue;
            }
            for &bb in &f.blocks {
                for &inst in &module.block(bb).insts {
                    let callee = match module.direct_callee(inst) {
                        Some(c) => c,
                        None => continue,
                    };
                    let cf = module.func(callee);
                    if cf.is_declaration || cf.is_intrinsic {
                        continue;
                    }
                    if cf.name.starts_with(sanitizer_prefix) {
                        continue;
                    }
                    raw.entry(caller).or_default().insert(callee);
                    raw_inverse.entry(callee).or_default().insert(caller);
                    call_sites.entry((caller, callee)).or_default().push(inst);
                }
            }
        }

        let caller_to_callees = remove_cycles(&raw);
        let mut callee_to_callers: BTreeMap<FuncId, BTreeSet<FuncId>> = BTreeMap::new();
        for (caller, callees) in &caller_to_callees {
            for callee in callees {
                callee_to_callers.entry(*callee).or_default().insert(*caller);
            }
        }

        let indirect_targets = compute_indirect_targets(module, sanitizer_prefix);
        let scc_root = compute_scc_roots(&raw);

        Self {
            caller_to_callees,
            callee_to_callers,
            raw_callers: raw_inverse,
            call_sites,
            indirect_targets,
            scc_root,
            all_callers_cache: FxHashMap::default(),
            common_caller_cache: FxHashMap::default(),
            reach_cache: FxHashMap::default(),
        }
    }

    pub fn is_indirect_target(&self, func: FuncId) -> bool {
        self.indirect_targets.contains(&func)
    }

    pub fn indirect_targets(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.indirect_targets.iter().copied()
    }

    pub fn callees_of(&self, func: FuncId) -> impl Iterator<Item = FuncId> + '_ {
        self.caller_to_callees
            .get(&func)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Whether `callee` is an immediate callee of `caller` in the acyclic
    /// relation (self-calls count as transitive).
    pub fn is_transitive_callee(&self, caller: FuncId, callee: FuncId) -> bool {
        if caller == callee {
            return true;
        }
        self.caller_to_callees
            .get(&caller)
            .is_some_and(|cs| cs.contains(&callee))
    }

    /// Call-site instructions of `caller` invoking `callee`.
    pub fn sites_between(&self, caller: FuncId, callee: FuncId) -> &[InstId] {
        self.call_sites
            .get(&(caller, callee))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All caller chains above `func`, outermost caller first. Chains stop at
    /// indirect-call targets and at functions without callers.
    pub fn upper_call_traces(&self, func: FuncId) -> BTreeSet<CallTrace> {
        let mut traces = BTreeSet::new();
        let mut cur = Vec::new();
        self.upper_rec(func, &mut cur, &mut traces);
        traces
    }

    fn upper_rec(&self, func: FuncId, cur: &mut Vec<FuncId>, traces: &mut BTreeSet<CallTrace>) {
        cur.push(func);
        let stop = self.is_indirect_target(func)
            || self
                .callee_to_callers
                .get(&func)
                .map_or(true, |c| c.is_empty());
        if stop {
            let mut reversed = cur.clone();
            reversed.reverse();
            traces.insert(reversed);
        } else if let Some(callers) = self.callee_to_callers.get(&func) {
            for caller in callers {
                self.upper_rec(*caller, cur, traces);
            }
        }
        cur.pop();
    }

    /// All callee chains below `func`, `func` first.
    pub fn lower_call_traces(&self, func: FuncId) -> BTreeSet<CallTrace> {
        let mut traces = BTreeSet::new();
        let mut cur = Vec::new();
        self.lower_rec(func, &mut cur, &mut traces);
        traces
    }

    fn lower_rec(&self, func: FuncId, cur: &mut Vec<FuncId>, traces: &mut BTreeSet<CallTrace>) {
        cur.push(func);
        match self.caller_to_callees.get(&func) {
            Some(callees) if !callees.is_empty() => {
                for callee in callees {
                    self.lower_rec(*callee, cur, traces);
                }
            }
            _ => {
                traces.insert(cur.clone());
            }
        }
        cur.pop();
    }

    /// Every (transitive) caller of `func`, with the call sites leading into
    /// the chain. SCC members share one cached result.
    pub fn all_callers(&mut self, func: FuncId) -> BTreeMap<FuncId, BTreeSet<InstId>> {
        if let Some(cached) = self.all_callers_cache.get(&func) {
            return cached.clone();
        }
        if let Some(root) = self.scc_root.get(&func).copied() {
            if root != func {
                let result = self.all_callers(root);
                self.all_callers_cache.insert(func, result.clone());
                return result;
            }
        }

        let mut caller_map: BTreeMap<FuncId, BTreeSet<InstId>> = BTreeMap::new();
        let mut visited = BTreeSet::new();
        let mut worklist = VecDeque::new();
        worklist.push_back(func);
        while let Some(cur) = worklist.pop_front() {
            if !visited.insert(cur) {
                continue;
            }
            if let Some(callers) = self.raw_callers.get(&cur) {
                for caller in callers.clone() {
                    if caller == cur {
                        continue;
                    }
                    let sites: BTreeSet<InstId> =
                        self.sites_between(caller, cur).iter().copied().collect();
                    caller_map.entry(caller).or_default().extend(sites);
                    worklist.push_back(caller);
                }
            }
        }

        self.all_callers_cache.insert(func, caller_map.clone());
        caller_map
    }

    /// Functions reaching both `f1` and `f2`, with witnessing call sites.
    pub fn common_callers(&mut self, f1: FuncId, f2: FuncId) -> BTreeSet<CallerWitness> {
        if f1 == f2 {
            let mut set = BTreeSet::new();
            set.insert((f1, None));
            return set;
        }
        if let Some(cached) = self.common_caller_cache.get(&(f1, f2)) {
            return cached.clone();
        }
        if let Some(cached) = self.common_caller_cache.get(&(f2, f1)) {
            let swapped: BTreeSet<CallerWitness> = cached
                .iter()
                .map(|(f, cs)| (*f, cs.map(|(a, b)| (b, a))))
                .collect();
            self.common_caller_cache.insert((f1, f2), swapped.clone());
            return swapped;
        }

        let callers1 = self.all_callers(f1);
        let callers2 = self.all_callers(f2);
        let mut result = BTreeSet::new();

        // f1 (transitively) invokes f2
        if let Some(sites) = callers2.get(&f1) {
            for site in sites {
                result.insert((f1, Some((*site, *site))));
            }
        }
        // f2 (transitively) invokes f1
        if let Some(sites) = callers1.get(&f2) {
            for site in sites {
                result.insert((f2, Some((*site, *site))));
            }
        }
        // genuinely common callers
        for (caller, sites1) in &callers1 {
            if let Some(sites2) = callers2.get(caller) {
                if sites1 == sites2 {
                    continue;
                }
                for s1 in sites1 {
                    for s2 in sites2 {
                        if s1 == s2 {
                            continue;
                        }
                        result.insert((*caller, Some((*s1, *s2))));
                    }
                }
            }
        }

        self.common_caller_cache.insert((f1, f2), result.clone());
        result
    }

    /// Inter-procedural instruction reachability via the common-caller
    /// relation; intra-procedural queries fall through to the CFG.
    pub fn reachable_inter(
        &mut self,
        module: &ModuleIr,
        cfg: &mut CfgIndex,
        src: InstId,
        dst: InstId,
    ) -> bool {
        let src_func = module.func_of_inst(src);
        let dst_func = module.func_of_inst(dst);
        if src_func == dst_func {
            return cfg.inst_reachable(module, src, dst);
        }
        if let Some(&cached) = self.reach_cache.get(&(src, dst)) {
            return cached;
        }
        let mut reachable = false;
        for (caller, sites) in self.common_callers(src_func, dst_func) {
            let (cs1, cs2) = match sites {
                Some(pair) => pair,
                None => continue,
            };
            let hit = if caller == src_func {
                cfg.inst_reachable(module, src, cs2)
            } else if caller == dst_func {
                cfg.inst_reachable(module, cs1, dst)
            } else {
                cfg.inst_reachable(module, cs1, cs2)
            };
            if hit {
                reachable = true;
                break;
            }
        }
        self.reach_cache.insert((src, dst), reachable);
        reachable
    }
}

/// Kahn's algorithm: keep only edges whose tail is processed with in-degree
/// 0; edges crossing back into cycles are dropped.
fn remove_cycles(
    graph: &BTreeMap<FuncId, BTreeSet<FuncId>>,
) -> BTreeMap<FuncId, BTreeSet<FuncId>> {
    let mut indegree: BTreeMap<FuncId, usize> = BTreeMap::new();
    let mut tree: BTreeMap<FuncId, BTreeSet<FuncId>> = BTreeMap::new();

    for (node, neighbors) in graph {
        indegree.entry(*node).or_insert(0);
        tree.insert(*node, BTreeSet::new());
        for n in neighbors {
            *indegree.entry(*n).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<FuncId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut processed = BTreeSet::new();
    while let Some(node) = queue.pop_front() {
        processed.insert(node);
        let neighbors = match graph.get(&node) {
            Some(n) => n,
            None => continue,
        };
        for n in neighbors {
            tree.get_mut(&node).expect("pre-populated").insert(*n);
            let d = indegree.get_mut(n).expect("pre-populated");
            *d -= 1;
            if *d == 0 {
                queue.push_back(*n);
            }
        }
    }

    let cyclic: Vec<FuncId> = graph
        .keys()
        .filter(|n| !processed.contains(*n))
        .copied()
        .collect();
    if !cyclic.is_empty() {
        warn!(count = cyclic.len(), "call-graph cycles broken by edge drop");
    }

    tree
}

/// Address taken and more non-call users than direct-call users.
fn compute_indirect_targets(module: &ModuleIr, sanitizer_prefix: &str) -> BTreeSet<FuncId> {
    let mut direct_calls: BTreeMap<FuncId, usize> = BTreeMap::new();
    for inst in 0..module.insts.len() as u32 {
        if let Some(callee) = module.direct_callee(InstId(inst)) {
            *direct_calls.entry(callee).or_insert(0) += 1;
        }
    }

    let mut targets = BTreeSet::new();
    for func in module.func_ids() {
        let f = module.func(func);
        if f.is_declaration || f.is_intrinsic || f.name.starts_with(sanitizer_prefix) {
            continue;
        }
        if !f.address_taken {
            continue;
        }
        // users of the function value that are instructions but not the
        // callee operand of a call
        let mut non_call_users = 0usize;
        for (vid, value) in module.values.iter().enumerate() {
            if value.kind != ValueKind::Function(func) {
                continue;
            }
            let vid = crate::shared::models::ir::ValueId(vid as u32);
            for user in module.users_of(vid) {
                let ir = module.inst(user);
                let is_callee_slot =
                    ir.opcode == Opcode::Call && ir.operands.first() == Some(&vid);
                if !is_callee_slot {
                    non_call_users += 1;
                }
            }
        }
        let direct = direct_calls.get(&func).copied().unwrap_or(0);
        if non_call_users > direct {
            targets.insert(func);
        }
    }
    targets
}

/// Root (representative) per member of every non-trivial SCC of the raw
/// caller relation.
fn compute_scc_roots(raw: &BTreeMap<FuncId, BTreeSet<FuncId>>) -> FxHashMap<FuncId, FuncId> {
    let mut graph: DiGraph<FuncId, ()> = DiGraph::new();
    let mut nodes: BTreeMap<FuncId, NodeIndex> = BTreeMap::new();
    let mut index_of = |g: &mut DiGraph<FuncId, ()>, nodes: &mut BTreeMap<FuncId, NodeIndex>, f: FuncId| {
        *nodes.entry(f).or_insert_with(|| g.add_node(f))
    };
    for (caller, callees) in raw {
        let c = index_of(&mut graph, &mut nodes, *caller);
        for callee in callees {
            let e = index_of(&mut graph, &mut nodes, *callee);
            graph.add_edge(c, e, ());
        }
    }

    let mut roots = FxHashMap::default();
    for component in tarjan_scc(&graph) {
        if component.len() < 2 {
            continue;
        }
        let root = component
            .iter()
            .map(|n| graph[*n])
            .min()
            .expect("non-empty SCC");
        for n in component {
            roots.insert(graph[n], root);
        }
    }
    roots
}
