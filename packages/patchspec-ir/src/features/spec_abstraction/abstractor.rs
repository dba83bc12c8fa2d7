//! Spec abstraction
//!
//! Turns classified traces into spec records: added traces become
//! post-patch-required reach specs, removed traces become forbidden ones,
//! condition-changed pairs carry the simplified condition diff, and
//! order-changed pairs group per input into multi-sink order specs.
//! Condition variables whose backward slices never touch the guarded trace
//! are filtered out before emission.

use super::domain::{
    inputs_equal, outputs_equal, PeerTable, SingleSrcMultiSinkSpec, SingleSrcSingleSinkSpec,
    SpecSet,
};
use crate::features::condition::infrastructure::diff::{
    clear_matched_subtrees, find_matched_subtrees, CondMatchOps,
};
use crate::features::condition::infrastructure::encode::{data_dep_term, tree_term};
use crate::features::condition::{CondArena, CondId, Simplifier};
use crate::features::enhanced_trace::{EnhancedTrace, InputKind, OutputKind, TraceBuilder};
use crate::features::graph_adapter::{ApiClassifier, CallGraphIndex};
use crate::features::slicing::{InterSlicer, IntraSlicer};
use crate::features::smt::domain::term::SmtTerm;
use crate::features::smt::infrastructure::smtlib;
use crate::features::smt::infrastructure::solver::SmtSolver;
use crate::features::trace_diff::differ::{DiffOutcome, TraceDiffer};
use crate::features::patch_projection::domain::ProjectionState;
use crate::shared::models::ir::ModuleIr;
use crate::shared::models::{SegModule, SegNodeKind, SegObj};
use crate::shared::utils::{is_after_variant, is_before_variant};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct SpecAbstractor<'a> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    cg: &'a CallGraphIndex,
    api: &'a ApiClassifier<'a>,
}

impl<'a> SpecAbstractor<'a> {
    pub fn new(
        module: &'a ModuleIr,
        seg: &'a SegModule,
        cg: &'a CallGraphIndex,
        api: &'a ApiClassifier<'a>,
    ) -> Self {
        Self {
            module,
            seg,
            cg,
            api,
        }
    }

    /// Build the full spec set out of one classification run.
    #[allow(clippy::too_many_arguments)]
    pub fn build_specs<S: SmtSolver>(
        &self,
        proj: &mut ProjectionState,
        differ: &mut TraceDiffer,
        arena: &mut CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        before: &[EnhancedTrace],
        after: &[EnhancedTrace],
        outcome: &DiffOutcome,
        peers: &PeerTable,
    ) -> SpecSet {
        let mut specs = SpecSet::default();

        for &idx in &outcome.added {
            let trace = &after[idx];
            if !TraceBuilder::<S>::io_compatible(&trace.input.kind, &trace.output.kind) {
                continue;
            }
            let record = self.single_sink_record(arena, slicer, trace, false);
            push_unique_single(&mut specs.added, record, peers);
        }

        for &idx in &outcome.removed {
            let trace = &before[idx];
            if !TraceBuilder::<S>::io_compatible(&trace.input.kind, &trace.output.kind) {
                continue;
            }
            let record = self.single_sink_record(arena, slicer, trace, true);
            push_unique_single(&mut specs.removed, record, peers);
        }

        for &(bi, ai) in &outcome.cond_changed {
            let before_trace = &before[bi];
            let after_trace = &after[ai];
            if !self.roots_in_variants(before_trace, after_trace) {
                continue;
            }
            if !TraceBuilder::<S>::io_compatible(
                &after_trace.input.kind,
                &after_trace.output.kind,
            ) {
                continue;
            }
            let diff = self.condition_diff(
                proj,
                differ,
                arena,
                slicer,
                solver,
                before_trace,
                after_trace,
            );
            let diff = match diff {
                Some(d) => d,
                None => continue,
            };
            let cond_smt = self.render_cond(arena, slicer, diff);
            // the diff names the region the patch stopped allowing (or
            // started guarding): flow under it is forbidden post-patch
            let record = SingleSrcSingleSinkSpec {
                input: after_trace.input.kind.clone(),
                output: after_trace.output.kind.clone(),
                cond_smt: Some(cond_smt),
                is_buggy: true,
                indirect_call: indirect_anchor(&after_trace.input.kind, &after_trace.output.kind),
            };
            push_unique_single(&mut specs.cond_changed, record, peers);
        }

        self.group_order_specs(&mut specs, before, after, outcome, peers);

        info!(
            added = specs.added.len(),
            removed = specs.removed.len(),
            cond = specs.cond_changed.len(),
            order = specs.order_changed.len(),
            "spec abstraction done"
        );
        specs
    }

    fn roots_in_variants(&self, before: &EnhancedTrace, after: &EnhancedTrace) -> bool {
        let func_of = |t: &EnhancedTrace| {
            self.seg
                .first_node(&t.trace.objs)
                .map(|n| self.module.func(self.seg.node(n).func).name.clone())
        };
        matches!(
            (func_of(before), func_of(after)),
            (Some(b), Some(a)) if is_before_variant(&b) && is_after_variant(&a)
        )
    }

    /// Added/removed traces carry their condition as-is: the guard in an
    /// added error path IS the spec's condition, even when its backward
    /// slices live outside the guarded window.
    fn single_sink_record(
        &self,
        arena: &mut CondArena,
        slicer: &mut IntraSlicer,
        trace: &EnhancedTrace,
        is_buggy: bool,
    ) -> SingleSrcSingleSinkSpec {
        let cond_smt = if arena.obtain_nodes(trace.cond).is_empty() {
            None
        } else {
            Some(self.render_cond(arena, slicer, trace.cond))
        };
        SingleSrcSingleSinkSpec {
            input: trace.input.kind.clone(),
            output: trace.output.kind.clone(),
            cond_smt,
            is_buggy,
            indirect_call: indirect_anchor(&trace.input.kind, &trace.output.kind),
        }
    }

    /// Drop condition variables whose backward flows never intersect the
    /// guarded trace (access-path-equivalent pseudo arguments and common
    /// outputs count as intersections), then strip the residue.
    fn filter_invalid_cond(
        &self,
        arena: &mut CondArena,
        cond: CondId,
        guarded: &[SegObj],
    ) -> Option<CondId> {
        let inter = InterSlicer::new(self.module, self.seg, self.cg, self.api);
        let mut invalid = BTreeSet::new();
        for var in arena.obtain_nodes(cond) {
            let mut flows = BTreeSet::new();
            for call_trace in self.cg.upper_call_traces(self.seg.node(var).func) {
                let mut trace = call_trace.clone();
                let mut cur = Vec::new();
                inter.backward(var, &mut trace, &mut cur, &mut flows);
            }
            if flows.is_empty() {
                invalid.insert(var);
                continue;
            }
            let mut any_intersects = false;
            for flow in &flows {
                if flow.is_empty() {
                    continue;
                }
                if flow.iter().any(|obj| self.objs_equivalent(*obj, guarded)) {
                    any_intersects = true;
                    break;
                }
            }
            if !any_intersects {
                debug!(node = var.0, "condition variable irrelevant to trace; dropped");
                invalid.insert(var);
            }
        }
        for var in invalid {
            arena.eliminate_var(cond, var);
        }
        crate::features::condition::infrastructure::simplify::simplify_const(arena, cond);
        if arena.is_const(cond) || arena.children(cond).is_empty() && arena.obtain_nodes(cond).is_empty()
        {
            None
        } else {
            Some(cond)
        }
    }

    fn objs_equivalent(&self, obj: SegObj, guarded: &[SegObj]) -> bool {
        guarded.iter().any(|g| {
            if *g == obj {
                return true;
            }
            let (a, b) = match (g.as_node(), obj.as_node()) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            match (&self.seg.node(a).kind, &self.seg.node(b).kind) {
                (
                    SegNodeKind::PseudoArgument { path: p1, .. },
                    SegNodeKind::PseudoArgument { path: p2, .. },
                ) => p1.base == p2.base,
                (
                    SegNodeKind::CallSiteCommonOutput { .. },
                    SegNodeKind::CallSiteCommonOutput { .. },
                ) => true,
                _ => false,
            }
        })
    }

    /// The diff of a condition-changed pair, routed through the matched-node
    /// relation. Clearing the matched subtrees leaves the guard delta on one
    /// side: a guard the patch added (after residue) or removed (before
    /// residue). Its negation is the forbidden region: the spec's
    /// condition.
    #[allow(clippy::too_many_arguments)]
    fn condition_diff<S: SmtSolver>(
        &self,
        proj: &mut ProjectionState,
        differ: &mut TraceDiffer,
        arena: &mut CondArena,
        slicer: &mut IntraSlicer,
        solver: &mut S,
        before: &EnhancedTrace,
        after: &EnhancedTrace,
    ) -> Option<CondId> {
        // work on clones: the traces stay comparable afterwards
        let c_before = arena.deep_clone(before.cond);
        let c_after = arena.deep_clone(after.cond);

        let mut ops = DifferMatchOps { differ, proj };
        let (matched, sub_matched) = find_matched_subtrees(arena, c_before, c_after, &mut ops);
        clear_matched_subtrees(arena, &matched, &sub_matched, &mut ops);

        let mut simplifier = Simplifier::new(self.module, self.seg, slicer, solver);
        simplifier.simplify(arena, c_before);
        simplifier.simplify(arena, c_after);

        let residue = [c_after, c_before]
            .into_iter()
            .find(|c| !arena.is_const(*c) && !arena.obtain_nodes(*c).is_empty())?;
        let diff = arena.not(residue);
        simplifier.simplify(arena, diff);
        if arena.is_const(diff) {
            return None;
        }
        // the diff's variables may live in either build; filter against both
        // trace windows
        let guarded: Vec<SegObj> = before
            .trace
            .objs
            .iter()
            .chain(after.trace.objs.iter())
            .copied()
            .collect();
        self.filter_invalid_cond(arena, diff, &guarded)
    }

    /// SMT-LIB2 text of data-dependency ∧ tree encoding.
    fn render_cond(
        &self,
        arena: &CondArena,
        slicer: &mut IntraSlicer,
        cond: CondId,
    ) -> String {
        let deps = data_dep_term(self.module, self.seg, slicer, arena, cond);
        let tree = tree_term(arena, cond);
        smtlib::print_script(&[SmtTerm::and(vec![deps, tree])])
    }

    /// Order-changed pairs grouped per semantic input.
    fn group_order_specs(
        &self,
        specs: &mut SpecSet,
        before: &[EnhancedTrace],
        after: &[EnhancedTrace],
        outcome: &DiffOutcome,
        peers: &PeerTable,
    ) {
        struct Group {
            input: InputKind,
            indirect: String,
            outputs: Vec<OutputKind>,
            orders: Vec<(u32, u32)>,
        }
        let mut groups: Vec<Group> = Vec::new();

        for &(bi, ai) in &outcome.order_changed {
            let before_trace = &before[bi];
            let after_trace = &after[ai];
            if !self.roots_in_variants(before_trace, after_trace) {
                continue;
            }
            let input = after_trace.input.kind.clone();
            let output = after_trace.output.kind.clone();
            let pair = (before_trace.output_order, after_trace.output_order);

            let group = groups
                .iter_mut()
                .find(|g| inputs_equal(&g.input, &input, peers));
            match group {
                Some(g) => {
                    if !g.outputs.iter().any(|o| outputs_equal(o, &output, peers)) {
                        g.outputs.push(output);
                        g.orders.push(pair);
                    }
                }
                None => {
                    groups.push(Group {
                        indirect: indirect_anchor(&input, &output),
                        input,
                        outputs: vec![output],
                        orders: vec![pair],
                    });
                }
            }
        }

        for group in groups {
            // skip groups whose relative order did not actually change
            let mut indices: Vec<usize> = (0..group.outputs.len()).collect();
            let mut by_before = indices.clone();
            by_before.sort_by_key(|i| group.orders[*i].0);
            indices.sort_by_key(|i| group.orders[*i].1);
            if by_before == indices {
                continue;
            }
            specs.order_changed.push(SingleSrcMultiSinkSpec {
                input: group.input,
                outputs: group.outputs,
                order_map: group.orders,
                indirect_call: group.indirect,
            });
        }
    }
}

/// Match operations routed through the cross-build matched-node relation.
struct DifferMatchOps<'x, 'y> {
    differ: &'x mut TraceDiffer<'y>,
    proj: &'x mut ProjectionState,
}

impl CondMatchOps for DifferMatchOps<'_, '_> {
    fn is_match(&mut self, arena: &CondArena, a: CondId, b: CondId) -> bool {
        self.differ.conditions_matched_fast(self.proj, arena, a, b)
    }

    /// Sub-match: every child of `small` matches a distinct child of `big`.
    fn is_sub_match(&mut self, arena: &CondArena, small: CondId, big: CondId) -> bool {
        if arena.kind(small) != arena.kind(big) {
            return false;
        }
        let cs = arena.children(small);
        let cb = arena.children(big);
        if cs.is_empty() || cs.len() >= cb.len() {
            return false;
        }
        let mut used = vec![false; cb.len()];
        for x in &cs {
            let mut found = false;
            for (j, y) in cb.iter().enumerate() {
                if used[j] {
                    continue;
                }
                if self.differ.conditions_matched_fast(self.proj, arena, *x, *y) {
                    used[j] = true;
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }
}

/// The indirect function a spec is anchored at, when one is involved.
fn indirect_anchor(input: &InputKind, output: &OutputKind) -> String {
    match input {
        InputKind::IndirectArg { func, .. } => return func.clone(),
        InputKind::ErrorCode { cause, .. } => {
            if let InputKind::IndirectArg { func, .. } = &**cause {
                return func.clone();
            }
        }
        _ => {}
    }
    if let OutputKind::IndirectRet { func } = output {
        return func.clone();
    }
    String::new()
}

fn push_unique_single(
    list: &mut Vec<SingleSrcSingleSinkSpec>,
    record: SingleSrcSingleSinkSpec,
    peers: &PeerTable,
) {
    let duplicate = list.iter().any(|s| {
        inputs_equal(&s.input, &record.input, peers)
            && outputs_equal(&s.output, &record.output, peers)
    });
    if !duplicate {
        list.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_anchor_resolution() {
        let arg = InputKind::IndirectArg {
            func: "driver/x.c:probe".into(),
            arg: "arg_0".into(),
        };
        let ret = OutputKind::IndirectRet {
            func: "driver/x.c:probe".into(),
        };
        let api = InputKind::ArgRetOfApi {
            api: "kmalloc".into(),
            index: -1,
        };
        let sens = OutputKind::SensitiveOp {
            opcode: "div".into(),
            operand_index: 1,
        };
        assert_eq!(indirect_anchor(&arg, &sens), "driver/x.c:probe");
        assert_eq!(indirect_anchor(&api, &ret), "driver/x.c:probe");
        assert_eq!(indirect_anchor(&api, &sens), "");

        let error = InputKind::ErrorCode {
            cause: Box::new(arg),
            code: -22,
        };
        assert_eq!(indirect_anchor(&error, &sens), "driver/x.c:probe");
    }

    #[test]
    fn test_push_unique_deduplicates() {
        let peers = PeerTable::new();
        let mut list = Vec::new();
        let record = SingleSrcSingleSinkSpec {
            input: InputKind::GlobalVarIn { global: "g".into() },
            output: OutputKind::SensitiveOp {
                opcode: "div".into(),
                operand_index: 1,
            },
            cond_smt: None,
            is_buggy: false,
            indirect_call: String::new(),
        };
        push_unique_single(&mut list, record.clone(), &peers);
        push_unique_single(&mut list, record, &peers);
        assert_eq!(list.len(), 1);
    }
}
