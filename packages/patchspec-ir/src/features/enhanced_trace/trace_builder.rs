//! Enhanced trace assembly
//!
//! Finds the semantic endpoints inside a slice, trims the slice to the
//! input→output window, attaches related blocks and the guarding condition
//! tree, and extends changed intra traces across calls. Duplicate traces are
//! suppressed on insertion; sub-traces between equal endpoints are dropped.

use super::domain::{EnhancedTrace, InputKind, InputNode, OutputKind, OutputNode};
use super::sensitive::find_sensitive_outputs;
use crate::features::condition::{CondArena, CondId, CondKind, ConditionBuilder};
use crate::features::graph_adapter::api::OBJECTSIZE_INTRINSIC;
use crate::features::graph_adapter::{ApiClassifier, CallGraphIndex};
use crate::features::slicing::{collect_related_blocks, InterSlicer, SegTrace};
use crate::features::smt::infrastructure::solver::SmtSolver;
use crate::shared::models::ir::{BlockId, InstId, ModuleIr, Opcode, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegObj, SegSiteKind};
use crate::shared::utils::clean_name;
use std::collections::BTreeSet;
use tracing::debug;

pub struct TraceBuilder<'a, 'b, 'c, S: SmtSolver> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    cg: &'a CallGraphIndex,
    api: &'a ApiClassifier<'a>,
    pub conditions: &'c mut ConditionBuilder<'a, 'b, S>,
}

impl<'a, 'b, 'c, S: SmtSolver> TraceBuilder<'a, 'b, 'c, S> {
    pub fn new(
        module: &'a ModuleIr,
        seg: &'a SegModule,
        cg: &'a CallGraphIndex,
        api: &'a ApiClassifier<'a>,
        conditions: &'c mut ConditionBuilder<'a, 'b, S>,
    ) -> Self {
        Self {
            module,
            seg,
            cg,
            api,
            conditions,
        }
    }

    fn path_func_name(&self, func: crate::shared::models::ir::FuncId) -> String {
        let f = self.module.func(func);
        format!("{}:{}", f.source_file, clean_name(&f.name))
    }

    // ──────────────────────────────────────────────────────────────────
    // Input discovery
    // ──────────────────────────────────────────────────────────────────

    pub fn find_inputs(&mut self, trace: &[SegObj], intra: bool) -> Vec<InputNode> {
        let mut inputs = Vec::new();
        let start = match self.seg.first_node(trace) {
            Some(s) => s,
            None => return inputs,
        };
        let start_index = trace
            .iter()
            .position(|o| o.as_node() == Some(start))
            .unwrap_or(0);

        let n = self.seg.node(start);
        match &n.kind {
            SegNodeKind::CommonArgument { index } => {
                if intra || self.cg.is_indirect_target(n.func) {
                    inputs.push(InputNode::at_node(
                        InputKind::IndirectArg {
                            func: self.path_func_name(n.func),
                            arg: format!("arg_{}", index),
                        },
                        start,
                    ));
                }
            }
            SegNodeKind::PseudoArgument { index, path } => {
                if intra || self.cg.is_indirect_target(n.func) {
                    let offsets: Vec<String> =
                        path.offsets.iter().map(|o| o.to_string()).collect();
                    inputs.push(InputNode::at_node(
                        InputKind::IndirectArg {
                            func: self.path_func_name(n.func),
                            arg: format!("arg_{}:{}", index, offsets.join("_")),
                        },
                        start,
                    ));
                }
            }
            _ => {
                if let Some(value) = n.dbg_value {
                    match self.module.value(value).kind {
                        ValueKind::Global(g) => {
                            inputs.push(InputNode::at_node(
                                InputKind::GlobalVarIn {
                                    global: self.module.global(g).name.clone(),
                                },
                                start,
                            ));
                        }
                        ValueKind::ConstInt(code) if code != 0 => {
                            self.find_error_code_inputs(trace, start_index, start, code, &mut inputs);
                        }
                        ValueKind::Argument { func, .. } => {
                            if intra || self.cg.is_indirect_target(func) {
                                let arg_name = argument_name(self.module, self.seg, start, value);
                                inputs.push(InputNode::at_node(
                                    InputKind::IndirectArg {
                                        func: self.path_func_name(func),
                                        arg: arg_name,
                                    },
                                    start,
                                ));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // API call returns anywhere along the trace
        for obj in trace {
            let node = match obj.as_node() {
                Some(n) => n,
                None => continue,
            };
            if let Some(site) = self.seg.node(node).owning_call_site() {
                if !self.seg.node(node).is_call_site_output() {
                    continue;
                }
                let callee = match self.seg.site(site).called_function() {
                    Some(c) => c,
                    None => continue,
                };
                let name = clean_name(&self.module.func(callee).name);
                if name == OBJECTSIZE_INTRINSIC {
                    continue;
                }
                if intra || self.api.is_api(callee) {
                    let mut input = InputNode::at_node(
                        InputKind::ArgRetOfApi { api: name, index: -1 },
                        node,
                    );
                    input.used_site = Some(site);
                    inputs.push(input);
                }
            }
        }

        dedup_inputs(inputs)
    }

    /// A non-zero constant flowing into a phi is an error code when the
    /// incoming block's guarding comparison traces back to a failing call.
    fn find_error_code_inputs(
        &mut self,
        trace: &[SegObj],
        start_index: usize,
        start: SegNodeId,
        code: i64,
        inputs: &mut Vec<InputNode>,
    ) {
        let next = match trace.get(start_index + 1).and_then(|o| o.as_node()) {
            Some(n) => n,
            None => return,
        };
        let incomings = match &self.seg.node(next).kind {
            SegNodeKind::Phi { incomings } => incomings.clone(),
            _ => return,
        };
        for incoming in incomings {
            if incoming.value != start {
                continue;
            }
            for icmp in find_last_icmp(self.module, incoming.block) {
                for cause in self.find_error_causes(icmp) {
                    inputs.push(InputNode::at_node(
                        InputKind::ErrorCode {
                            cause: Box::new(cause),
                            code,
                        },
                        start,
                    ));
                }
            }
        }
    }

    /// Inputs reachable backward from a guarding comparison that start at a
    /// call output: the APIs whose failure the comparison tests.
    fn find_error_causes(&mut self, icmp: InstId) -> Vec<InputKind> {
        let mut causes = Vec::new();
        let value = self.module.inst(icmp).value;
        let func = self.module.func_of_inst(icmp);
        let node = match self.seg.find_node(func, value) {
            Some(n) => n,
            None => return causes,
        };
        for flow in self.conditions.icmp_inter_flows(node) {
            let source = match self.seg.last_node(&flow) {
                Some(s) => s,
                None => continue,
            };
            // the comparison must test something observable: an API result
            // or another semantic input
            if !self.seg.node(source).is_call_site_output()
                && !self.conditions.is_input_node(source, false)
            {
                continue;
            }
            let mut reversed = flow.clone();
            reversed.reverse();
            for input in self.find_inputs(&reversed, false) {
                causes.push(input.kind);
            }
        }
        causes.sort();
        causes.dedup();
        causes
    }

    // ──────────────────────────────────────────────────────────────────
    // Output discovery
    // ──────────────────────────────────────────────────────────────────

    pub fn find_outputs(&self, trace: &[SegObj], benign: bool, intra: bool) -> Vec<OutputNode> {
        let mut outputs = Vec::new();
        let end = match self.seg.last_node(trace) {
            Some(e) => e,
            None => return outputs,
        };
        let end_index = trace
            .iter()
            .rposition(|o| o.as_node() == Some(end))
            .unwrap_or(0);

        let n = self.seg.node(end);
        if matches!(n.kind, SegNodeKind::CommonReturn) && (intra || self.cg.is_indirect_target(n.func))
        {
            let mut output = OutputNode::new(
                OutputKind::IndirectRet {
                    func: self.path_func_name(n.func),
                },
                clean_name(&self.module.func(n.func).name),
            );
            output.used_node = Some(end);
            output.used_site = match trace.get(end_index + 1) {
                Some(SegObj::Site(site))
                    if matches!(self.seg.site(*site).kind, SegSiteKind::Return { .. }) =>
                {
                    Some(*site)
                }
                _ => {
                    let prev = trace[..end_index]
                        .iter()
                        .rev()
                        .find_map(|o| o.as_node());
                    self.seg.find_return_site(n.func, prev)
                }
            };
            outputs.push(output);
        }

        if !benign {
            outputs.extend(find_sensitive_outputs(self.module, self.seg, trace));
        }

        // pointer arguments handed to APIs
        for obj in trace {
            let node = match obj.as_node() {
                Some(n) => n,
                None => continue,
            };
            let seg_node = self.seg.node(node);
            if seg_node.is_opcode() {
                continue;
            }
            if !seg_node.ty.contains('*') && !seg_node.ty.contains("ptr") {
                continue;
            }
            for &site_id in &seg_node.use_sites {
                let site = self.seg.site(site_id);
                let index = match site.common_input_index(node) {
                    Some(i) => i,
                    None => continue,
                };
                let callee = match site.called_function() {
                    Some(c) => c,
                    None => continue,
                };
                if intra || self.api.is_api(callee) {
                    let mut output = OutputNode::new(
                        OutputKind::CustomizedApi {
                            api: clean_name(&self.module.func(callee).name),
                            arg_index: index,
                        },
                        clean_name(&self.module.func(site.func).name),
                    );
                    output.used_node = Some(node);
                    output.used_site = Some(site_id);
                    outputs.push(output);
                }
            }
        }

        dedup_outputs(outputs)
    }

    /// The input/output compatibility table.
    pub fn io_compatible(input: &InputKind, output: &OutputKind) -> bool {
        use InputKind::*;
        use OutputKind::*;
        matches!(
            (input, output),
            (ErrorCode { .. }, IndirectRet { .. })
                | (ArgRetOfApi { .. }, IndirectRet { .. })
                | (ArgRetOfApi { .. }, SensitiveOp { .. })
                | (ArgRetOfApi { .. }, SensitiveApi { .. })
                | (ArgRetOfApi { .. }, CustomizedApi { .. })
                | (ArgRetOfApi { .. }, GlobalVarOut { .. })
                | (IndirectArg { .. }, CustomizedApi { .. })
                | (IndirectArg { .. }, SensitiveApi { .. })
                | (IndirectArg { .. }, SensitiveOp { .. })
                | (IndirectArg { .. }, GlobalVarOut { .. })
                | (GlobalVarIn { .. }, CustomizedApi { .. })
                | (GlobalVarIn { .. }, SensitiveApi { .. })
                | (GlobalVarIn { .. }, SensitiveOp { .. })
                | (SensitiveIn { .. }, GlobalVarOut { .. })
                | (SensitiveIn { .. }, IndirectRet { .. })
        )
    }

    // ──────────────────────────────────────────────────────────────────
    // Assembly
    // ──────────────────────────────────────────────────────────────────

    /// Build enhanced traces out of raw intra slices: endpoint pairing,
    /// window trimming, related blocks, conditions, dedup.
    pub fn intra_enhanced(
        &mut self,
        arena: &mut CondArena,
        seg_traces: &BTreeSet<SegTrace>,
        out: &mut Vec<EnhancedTrace>,
    ) {
        for seg_trace in seg_traces {
            let inputs = self.find_inputs(&seg_trace.objs, true);
            if inputs.is_empty() {
                continue;
            }
            let outputs = self.find_outputs(&seg_trace.objs, false, true);
            if outputs.is_empty() {
                continue;
            }
            for input in &inputs {
                for output in &outputs {
                    if !Self::io_compatible(&input.kind, &output.kind) {
                        continue;
                    }
                    let window = match trim_window(&seg_trace.objs, input, output) {
                        Some(w) => w,
                        None => continue,
                    };
                    for blocks in collect_related_blocks(self.module, self.seg, &window) {
                        let cond_blocks =
                            self.condition_blocks(&blocks, output);
                        let cond = self.conditions.build_trace_condition(
                            arena,
                            &cond_blocks,
                            &window,
                        );
                        let candidate = EnhancedTrace::new(
                            SegTrace::new(window.clone(), blocks),
                            input.clone(),
                            output.clone(),
                            cond,
                        );
                        insert_unique(arena, out, candidate);
                    }
                }
            }
        }
        debug!(count = out.len(), "intra enhanced traces assembled");
    }

    /// The block sequence the condition is collected over: the trace blocks
    /// plus the output site's block, so guards dominating the sink itself
    /// (a div site inside a checked branch, say) are collected too.
    fn condition_blocks(&self, blocks: &[BlockId], output: &OutputNode) -> Vec<BlockId> {
        let mut cond_blocks = blocks.to_vec();
        if let Some(site) = output.used_site {
            let site_block = self.module.inst(self.seg.site(site).inst).block;
            if cond_blocks.last() != Some(&site_block) {
                cond_blocks.push(site_block);
            }
        }
        cond_blocks
    }

    /// Extend one changed intra trace across calls (§4.4 inter slicing) and
    /// re-discover endpoints on the extended traces.
    pub fn inter_extend(
        &mut self,
        arena: &mut CondArena,
        intra: &EnhancedTrace,
        out: &mut Vec<EnhancedTrace>,
    ) {
        if intra.trace.objs.is_empty() {
            return;
        }
        let start = self.seg.first_node(&intra.trace.objs);
        let end = self.seg.last_node(&intra.trace.objs);
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => return,
        };

        let inter = InterSlicer::new(self.module, self.seg, self.cg, self.api);
        let call_traces = self.cg.upper_call_traces(self.seg.node(start).func);

        let mut backwards = BTreeSet::new();
        if inter.needs_backward(start) {
            for call_trace in &call_traces {
                let mut trace = call_trace.clone();
                let mut cur = Vec::new();
                inter.backward(start, &mut trace, &mut cur, &mut backwards);
            }
        }
        let mut forwards = BTreeSet::new();
        if inter.needs_forward(end) {
            for call_trace in &call_traces {
                let mut trace = call_trace.clone();
                let mut cur = Vec::new();
                inter.forward(end, &mut trace, &mut cur, &mut forwards);
            }
        }

        let glue = |backward: Option<&Vec<SegObj>>, forward: Option<&Vec<SegObj>>| {
            let mut combined: Vec<SegObj> = match backward {
                Some(b) => {
                    let mut rev = b.clone();
                    rev.reverse();
                    rev.extend(intra.trace.objs.iter().skip(1).copied());
                    rev
                }
                None => intra.trace.objs.clone(),
            };
            if let Some(f) = forward {
                combined.extend(f.iter().skip(1).copied());
            }
            combined
        };

        let mut combinations: Vec<Vec<SegObj>> = Vec::new();
        match (backwards.is_empty(), forwards.is_empty()) {
            (false, false) => {
                for b in &backwards {
                    for f in &forwards {
                        combinations.push(glue(Some(b), Some(f)));
                    }
                }
            }
            (false, true) => {
                for b in &backwards {
                    combinations.push(glue(Some(b), None));
                }
            }
            (true, false) => {
                for f in &forwards {
                    combinations.push(glue(None, Some(f)));
                }
            }
            (true, true) => {
                insert_unique(arena, out, intra.clone());
                return;
            }
        }

        for combined in combinations {
            let inputs = self.find_inputs(&combined, false);
            let outputs = self.find_outputs(&combined, false, false);
            let input_candidates: Vec<InputNode> = if inputs.is_empty() {
                vec![intra.input.clone()]
            } else {
                inputs
            };
            let output_candidates: Vec<OutputNode> = if outputs.is_empty() {
                vec![intra.output.clone()]
            } else {
                outputs
            };
            for input in &input_candidates {
                for output in &output_candidates {
                    if !Self::io_compatible(&input.kind, &output.kind) {
                        continue;
                    }
                    let window = match trim_window(&combined, input, output) {
                        Some(w) => w,
                        None => continue,
                    };
                    let candidate = EnhancedTrace::new(
                        SegTrace::new(window, intra.trace.blocks.clone()),
                        input.clone(),
                        output.clone(),
                        intra.cond,
                    );
                    insert_unique(arena, out, candidate);
                }
            }
        }
    }
}

/// `arg_<i>[:<offsets>]` name of a raw argument value, looked up through the
/// owning graph's common and pseudo argument lists.
fn argument_name(
    module: &ModuleIr,
    seg: &SegModule,
    node: SegNodeId,
    value: crate::shared::models::ir::ValueId,
) -> String {
    let func = seg.node(node).func;
    if let Some(graph) = seg.graph(func) {
        for (i, arg) in graph.common_args.iter().enumerate() {
            if seg.node(*arg).dbg_value == Some(value) {
                return format!("arg_{}", i);
            }
        }
        for arg in &graph.pseudo_args {
            if let SegNodeKind::PseudoArgument { index, path } = &seg.node(*arg).kind {
                if path.base == value {
                    let offsets: Vec<String> =
                        path.offsets.iter().map(|o| o.to_string()).collect();
                    return format!("arg_{}:{}", index, offsets.join("_"));
                }
            }
        }
    }
    format!("arg_{}", module.value(value).name)
}

/// Sub-sequence between the input's and the output's anchor nodes.
fn trim_window(trace: &[SegObj], input: &InputNode, output: &OutputNode) -> Option<Vec<SegObj>> {
    let start = input.used_node?;
    let end = output.used_node?;
    let start_idx = trace.iter().position(|o| o.as_node() == Some(start))?;
    let end_idx = trace.iter().rposition(|o| o.as_node() == Some(end))?;
    if start_idx > end_idx {
        return None;
    }
    Some(trace[start_idx..=end_idx].to_vec())
}

/// Last conditional comparison dominating `bb`: walks predecessors until a
/// conditional branch terminator is found.
pub fn find_last_icmp(module: &ModuleIr, bb: BlockId) -> Vec<InstId> {
    let mut icmps = BTreeSet::new();
    let mut worklist = vec![bb];
    let mut handled = BTreeSet::new();
    while let Some(cur) = worklist.pop() {
        if !handled.insert(cur) {
            continue;
        }
        let block = module.block(cur);
        let terminator = block.insts.last().copied();
        let mut descend = true;
        if let Some(term) = terminator {
            if module.inst(term).opcode == Opcode::CondBr {
                if let Some(cond) = module.inst(term).operands.first() {
                    if let ValueKind::Inst(cond_inst) = module.value(*cond).kind {
                        if matches!(module.inst(cond_inst).opcode, Opcode::Icmp(_)) {
                            icmps.insert(cond_inst);
                            descend = false;
                        }
                    }
                }
            }
        }
        if descend {
            worklist.extend(block.preds.iter().copied());
        }
    }
    icmps.into_iter().collect()
}

fn dedup_inputs(inputs: Vec<InputNode>) -> Vec<InputNode> {
    let mut out: Vec<InputNode> = Vec::new();
    for input in inputs {
        if !out.iter().any(|i| *i == input) {
            out.push(input);
        }
    }
    out
}

fn dedup_outputs(outputs: Vec<OutputNode>) -> Vec<OutputNode> {
    let mut out: Vec<OutputNode> = Vec::new();
    for output in outputs {
        if !out.iter().any(|o| *o == output) {
            out.push(output);
        }
    }
    out
}

/// Structural tree equality with children as multisets.
pub fn conditions_equal(arena: &CondArena, a: CondId, b: CondId) -> bool {
    if arena.kind(a) != arena.kind(b) {
        return false;
    }
    if let (CondKind::Var(n1), CondKind::Var(n2)) = (arena.kind(a), arena.kind(b)) {
        return n1 == n2;
    }
    let ca = arena.children(a);
    let cb = arena.children(b);
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
            if conditions_equal(arena, *x, *y) {
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

/// Full enhanced-trace equality used for duplicate suppression.
pub fn traces_equal(arena: &CondArena, a: &EnhancedTrace, b: &EnhancedTrace) -> bool {
    a.trace == b.trace && a.same_io_anchors(b) && conditions_equal(arena, a.cond, b.cond)
}

fn insert_unique(arena: &CondArena, out: &mut Vec<EnhancedTrace>, candidate: EnhancedTrace) {
    if !out.iter().any(|t| traces_equal(arena, t, &candidate)) {
        out.push(candidate);
    }
}

/// Among traces with equal endpoints, drop those whose object sequence is a
/// contiguous sub-sequence of another's.
pub fn filter_sub_traces(traces: &mut Vec<EnhancedTrace>) {
    let mut removed = vec![false; traces.len()];
    for i in 0..traces.len() {
        if removed[i] {
            continue;
        }
        for j in 0..traces.len() {
            if i == j || removed[j] {
                continue;
            }
            let same_endpoints = traces[i].input.kind == traces[j].input.kind
                && traces[i].output.kind == traces[j].output.kind;
            if !same_endpoints {
                continue;
            }
            if traces[i].trace.is_sub_trace_of(&traces[j].trace)
                && traces[i].trace.objs.len() < traces[j].trace.objs.len()
            {
                removed[i] = true;
                break;
            }
        }
    }
    let mut index = 0;
    traces.retain(|_| {
        let keep = !removed[index];
        index += 1;
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::graph_adapter::CfgIndex;
    use crate::features::slicing::IntraSlicer;
    use crate::features::smt::infrastructure::solver::BoundedSolver;
    use crate::shared::models::ir::{dbg, IcmpPred};
    use crate::shared::models::{OpcodeKind, PhiIncoming};

    /// An indirect-target probe returning either 0 or -EINVAL guarded by an
    /// API result: ret phi(0, -22), with -22 guarded by `icmp ne %call, 0`.
    struct Fixture {
        module: ModuleIr,
        seg: SegModule,
        err_const: SegNodeId,
        phi: SegNodeId,
        ret: SegNodeId,
    }

    fn fixture() -> Fixture {
        let mut m = ModuleIr::new();
        let api = m.add_declaration("regmap_read");
        let f = m.add_function("after.patch.probe", "driver/x.c");
        let entry = m.add_block(f, "entry");
        let then_bb = m.add_block(f, "if.then");
        let end = m.add_block(f, "if.end");
        m.add_edge(entry, then_bb);
        m.add_edge(entry, end);
        m.add_edge(then_bb, end);
        m.mark_address_taken(f);
        // one non-call user so the probe counts as an indirect target
        let holder = m.add_function("after.patch.init", "driver/x.c");
        let hb = m.add_block(holder, "entry");
        let g = m.add_global("ops", "ptr");
        let gv = m.global_value(g);
        let fv = m.func_value(f);
        m.add_inst(hb, Opcode::Store, vec![fv, gv], "void", None);

        let av = m.func_value(api);
        let call = m.add_inst(entry, Opcode::Call, vec![av], "i32", dbg("driver/x.c", 10));
        let call_v = m.inst(call).value;
        let zero = m.const_int(0, "i32");
        let icmp = m.add_inst(
            entry,
            Opcode::Icmp(IcmpPred::Ne),
            vec![call_v, zero],
            "i1",
            dbg("driver/x.c", 11),
        );
        let icmp_v = m.inst(icmp).value;
        let tv = m.block_value(then_bb);
        let ev = m.block_value(end);
        m.add_inst(entry, Opcode::CondBr, vec![icmp_v, tv, ev], "void", dbg("driver/x.c", 11));

        let e22 = m.const_int(-22, "i32");
        let phi_inst = m.add_inst(end, Opcode::Phi, vec![e22, zero], "i32", dbg("driver/x.c", 13));
        m.set_phi_blocks(phi_inst, vec![then_bb, entry]);
        let phi_v = m.inst(phi_inst).value;
        let ret_inst = m.add_inst(end, Opcode::Ret, vec![phi_v], "void", dbg("driver/x.c", 13));

        let mut seg = SegModule::new();
        // API call output
        let site = seg.add_site(
            f,
            call,
            SegSiteKind::Call {
                callee: Some(api),
                callee_value: None,
                indirect: false,
                common_inputs: vec![],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );
        let call_n = seg.add_node(f, SegNodeKind::CallSiteCommonOutput { site }, Some(call_v), "i32");
        if let SegSiteKind::Call { common_output, .. } = &mut seg.sites[site.index()].kind {
            *common_output = Some(call_n);
        }
        let zero_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");
        let icmp_op = seg.add_node(f, SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
        let icmp_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(icmp_v), "i1");
        seg.connect(icmp_op, call_n);
        seg.connect(icmp_op, zero_n);
        seg.connect(icmp_n, icmp_op);

        let err_const = seg.add_node(f, SegNodeKind::SimpleOperand, Some(e22), "i32");
        seg.set_block(err_const, then_bb);
        let phi = seg.add_node(
            f,
            SegNodeKind::Phi {
                incomings: vec![
                    PhiIncoming { value: err_const, block: then_bb },
                    PhiIncoming { value: zero_n, block: entry },
                ],
            },
            Some(phi_v),
            "i32",
        );
        seg.connect(phi, err_const);
        seg.connect(phi, zero_n);
        let ret = seg.add_node(f, SegNodeKind::CommonReturn, None, "i32");
        seg.connect(ret, phi);
        seg.add_site(f, ret_inst, SegSiteKind::Return { returned: Some(phi) });

        Fixture {
            module: m,
            seg,
            err_const,
            phi,
            ret,
        }
    }

    fn run_intra(fx: &Fixture) -> (CondArena, Vec<EnhancedTrace>) {
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let mut cfg = CfgIndex::new();
        let mut slicer = IntraSlicer::new(&fx.module, &fx.seg);
        let mut solver = BoundedSolver::new();
        let mut cb = ConditionBuilder::new(
            &fx.module, &fx.seg, &cg, &api, &mut cfg, &mut slicer, &mut solver,
        );
        let mut builder = TraceBuilder::new(&fx.module, &fx.seg, &cg, &api, &mut cb);

        let mut arena = CondArena::new();
        let trace = SegTrace::new(
            vec![
                SegObj::Node(fx.err_const),
                SegObj::Node(fx.phi),
                SegObj::Node(fx.ret),
            ],
            vec![],
        );
        let mut traces = BTreeSet::new();
        traces.insert(trace);
        let mut out = Vec::new();
        builder.intra_enhanced(&mut arena, &traces, &mut out);
        (arena, out)
    }

    #[test]
    fn test_error_code_input_discovered() {
        let fx = fixture();
        let (_, out) = run_intra(&fx);
        assert!(!out.is_empty());
        let trace = &out[0];
        match &trace.input.kind {
            InputKind::ErrorCode { cause, code } => {
                assert_eq!(*code, -22);
                assert!(
                    matches!(&**cause, InputKind::ArgRetOfApi { api, .. } if api == "regmap_read")
                );
            }
            other => panic!("expected error-code input, got {:?}", other),
        }
        assert!(matches!(&trace.output.kind, OutputKind::IndirectRet { func } if func.contains("probe")));
    }

    #[test]
    fn test_condition_mentions_guard() {
        let fx = fixture();
        let (arena, out) = run_intra(&fx);
        let trace = &out[0];
        // the guard `call != 0` survives I/O pruning (the call is an API)
        assert!(!arena.obtain_nodes(trace.cond).is_empty());
    }

    #[test]
    fn test_io_compatibility_table() {
        let error = InputKind::ErrorCode {
            cause: Box::new(InputKind::ArgRetOfApi { api: "k".into(), index: -1 }),
            code: -22,
        };
        let ret = OutputKind::IndirectRet { func: "f".into() };
        let sens = OutputKind::SensitiveOp { opcode: "div".into(), operand_index: 1 };
        assert!(TraceBuilder::<BoundedSolver>::io_compatible(&error, &ret));
        assert!(!TraceBuilder::<BoundedSolver>::io_compatible(&error, &sens));
        let global = InputKind::GlobalVarIn { global: "g".into() };
        assert!(TraceBuilder::<BoundedSolver>::io_compatible(&global, &sens));
        assert!(!TraceBuilder::<BoundedSolver>::io_compatible(&global, &ret));
    }

    #[test]
    fn test_find_last_icmp_walks_predecessors() {
        let fx = fixture();
        let f = fx.module.function_by_name("after.patch.probe").unwrap();
        let then_bb = fx.module.func(f).blocks[1];
        let icmps = find_last_icmp(&fx.module, then_bb);
        assert_eq!(icmps.len(), 1);
        assert!(matches!(
            fx.module.inst(icmps[0]).opcode,
            Opcode::Icmp(IcmpPred::Ne)
        ));
    }
}
