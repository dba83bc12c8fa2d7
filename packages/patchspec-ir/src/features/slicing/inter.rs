//! Inter-procedural value-flow slicing
//!
//! Extends intra slices across calls. Backward traversal may leave an
//! argument toward a caller's call site (popping the call trace) or descend
//! from a call-site output into the callee's return; forward traversal is
//! symmetric. Crossings push explicit call-site / return-site objects into
//! the trace; the call-context matcher prunes invalid interleavings.

use super::context::match_def_use_context;
use crate::features::graph_adapter::{ApiClassifier, CallGraphIndex};
use crate::shared::models::ir::{FuncId, ModuleIr, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegObj, SegSiteId, SegSiteKind};
use std::collections::BTreeSet;

pub struct InterSlicer<'a> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    cg: &'a CallGraphIndex,
    api: &'a ApiClassifier<'a>,
}

impl<'a> InterSlicer<'a> {
    pub fn new(
        module: &'a ModuleIr,
        seg: &'a SegModule,
        cg: &'a CallGraphIndex,
        api: &'a ApiClassifier<'a>,
    ) -> Self {
        Self { module, seg, cg, api }
    }

    fn is_excopy(&self, node: SegNodeId) -> bool {
        self.seg
            .resolved_name(self.module, node)
            .map(crate::shared::utils::is_excopy_name)
            .unwrap_or(false)
    }

    fn const_int_of(&self, node: SegNodeId) -> Option<i64> {
        let value = self.seg.node(node).dbg_value?;
        match self.module.value(value).kind {
            ValueKind::ConstInt(c) => Some(c),
            _ => None,
        }
    }

    /// Arguments still extend backward unless the function is an indirect
    /// target; call-site outputs extend into their callee unless the callee
    /// is an API or has no graph.
    pub fn needs_backward(&self, node: SegNodeId) -> bool {
        let n = self.seg.node(node);
        if n.is_argument() {
            return !self.cg.is_indirect_target(n.func);
        }
        if n.is_call_site_output() {
            let site = match n.owning_call_site() {
                Some(s) => s,
                None => return false,
            };
            let callee = match self.seg.site(site).called_function() {
                Some(c) => c,
                None => return false,
            };
            if !self.seg.has_graph(callee) {
                return false;
            }
            return !self.api.is_api(callee);
        }
        false
    }

    /// Returns extend into callers unless the function is an indirect
    /// target; pseudo inputs extend into non-API callees; a node consumed as
    /// a call's common input stops only when every callee is an API.
    pub fn needs_forward(&self, node: SegNodeId) -> bool {
        let n = self.seg.node(node);
        if n.is_return() {
            return !self.cg.is_indirect_target(n.func);
        }
        if let SegNodeKind::CallSitePseudoInput { site, .. } = &n.kind {
            let callee = match self.seg.site(*site).called_function() {
                Some(c) => c,
                None => return false,
            };
            if !self.seg.has_graph(callee) {
                return false;
            }
            return !self.api.is_api(callee);
        }

        let mut is_common_input = false;
        let mut non_api_callee = false;
        for &site in &n.use_sites {
            let s = self.seg.site(site);
            if s.common_input_index(node).is_none() {
                continue;
            }
            is_common_input = true;
            if let Some(callee) = s.called_function() {
                if self.seg.has_graph(callee) && !self.api.is_api(callee) {
                    non_api_callee = true;
                }
            }
        }
        !is_common_input || non_api_callee
    }

    fn call_sites(&self, caller: FuncId, callee: FuncId) -> Vec<SegSiteId> {
        let graph = match self.seg.graph(caller) {
            Some(g) => g,
            None => return Vec::new(),
        };
        graph
            .sites
            .iter()
            .copied()
            .filter(|s| self.seg.site(*s).called_function() == Some(callee))
            .collect()
    }

    fn pseudo_input_of(&self, site: SegSiteId, index: u32) -> Option<SegNodeId> {
        match &self.seg.site(site).kind {
            SegSiteKind::Call { pseudo_inputs, .. } => pseudo_inputs
                .iter()
                .copied()
                .find(|n| matches!(self.seg.node(*n).kind, SegNodeKind::CallSitePseudoInput { index: i, .. } if i == index)),
            _ => None,
        }
    }

    fn pseudo_output_of(&self, site: SegSiteId, index: u32) -> Option<SegNodeId> {
        match &self.seg.site(site).kind {
            SegSiteKind::Call { pseudo_outputs, .. } => pseudo_outputs
                .iter()
                .copied()
                .find(|n| matches!(self.seg.node(*n).kind, SegNodeKind::CallSitePseudoOutput { index: i, .. } if i == index)),
            _ => None,
        }
    }

    fn common_input_of(&self, site: SegSiteId, index: u32) -> Option<SegNodeId> {
        match &self.seg.site(site).kind {
            SegSiteKind::Call { common_inputs, .. } => {
                common_inputs.get(index as usize).copied()
            }
            _ => None,
        }
    }

    // ──────────────────────────────────────────────────────────────────
    // Backward
    // ──────────────────────────────────────────────────────────────────

    pub fn backward(
        &self,
        node: SegNodeId,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        if !match_def_use_context(self.seg, cur) {
            return;
        }
        if cur.contains(&SegObj::Node(node)) {
            return;
        }
        if self.is_excopy(node) {
            out.insert(cur.clone());
            return;
        }

        cur.push(SegObj::Node(node));
        let n_kind = self.seg.node(node).kind.clone();
        let children = self.seg.node(node).children.clone();
        let is_phi = matches!(n_kind, SegNodeKind::Phi { .. });
        let is_opcode = self.seg.node(node).is_opcode();
        let is_common_return = matches!(n_kind, SegNodeKind::CommonReturn);

        let mut seen = BTreeSet::new();
        for child in &children {
            let child = *child;
            if !seen.insert(child) {
                continue;
            }
            // success codes flowing into a phi are not tracked
            if is_phi && self.const_int_of(child) == Some(0) {
                continue;
            }
            if is_opcode && self.const_int_of(child).is_some() {
                continue;
            }
            let ret_site = if is_common_return {
                self.seg.find_return_site(self.seg.node(node).func, Some(child))
            } else {
                None
            };
            if let Some(site) = ret_site {
                cur.push(SegObj::Site(site));
            }
            self.backward(child, call_trace, cur, out);
            if ret_site.is_some() {
                cur.pop();
            }
        }

        if children.is_empty() && !self.needs_backward(node) {
            out.insert(cur.clone());
            cur.pop();
            return;
        }

        match &n_kind {
            SegNodeKind::PseudoArgument { index, .. } => {
                self.cross_argument_backward(node, *index, call_trace, cur, out);
            }
            SegNodeKind::CommonArgument { index } => {
                self.cross_argument_backward(node, *index, call_trace, cur, out);
            }
            SegNodeKind::CallSiteCommonOutput { site } => {
                self.descend_output_backward(*site, None, call_trace, cur, out);
            }
            SegNodeKind::CallSitePseudoOutput { site, index, .. } => {
                self.descend_output_backward(*site, Some(*index), call_trace, cur, out);
            }
            _ => {
                if children.is_empty() {
                    out.insert(cur.clone());
                }
            }
        }
        cur.pop();
    }

    /// Leave an argument toward the caller's matching call-site input.
    fn cross_argument_backward(
        &self,
        node: SegNodeId,
        index: u32,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        let callee = self.seg.node(node).func;
        call_trace.pop();
        if call_trace.is_empty() {
            out.insert(cur.clone());
            call_trace.push(callee);
            return;
        }
        let caller = *call_trace.last().expect("non-empty");
        let is_pseudo = matches!(self.seg.node(node).kind, SegNodeKind::PseudoArgument { .. });

        for site in self.call_sites(caller, callee) {
            let input = if is_pseudo {
                self.pseudo_input_of(site, index)
            } else {
                self.common_input_of(site, index)
            };
            let input = match input {
                Some(i) => i,
                None => continue,
            };
            cur.push(SegObj::Site(site));
            self.backward(input, call_trace, cur, out);
            cur.pop();
        }
        call_trace.push(callee);
    }

    /// Descend from a call-site output into the callee's return.
    fn descend_output_backward(
        &self,
        site: SegSiteId,
        pseudo_index: Option<u32>,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        let callee = match self.seg.site(site).called_function() {
            Some(c) => c,
            None => {
                out.insert(cur.clone());
                return;
            }
        };
        let graph = match self.seg.graph(callee) {
            Some(g) => g,
            None => {
                // API: the trace bottoms out here
                out.insert(cur.clone());
                return;
            }
        };
        let target = match pseudo_index {
            None => graph.common_return,
            Some(idx) => graph.pseudo_returns.iter().copied().find(|n| {
                matches!(self.seg.node(*n).kind, SegNodeKind::PseudoReturn { index, .. } if index == idx)
            }),
        };
        let target = match target {
            Some(t) => t,
            None => {
                out.insert(cur.clone());
                return;
            }
        };
        call_trace.push(callee);
        self.backward(target, call_trace, cur, out);
        call_trace.pop();
    }

    // ──────────────────────────────────────────────────────────────────
    // Forward
    // ──────────────────────────────────────────────────────────────────

    pub fn forward(
        &self,
        node: SegNodeId,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        if !match_def_use_context(self.seg, cur) {
            return;
        }
        if cur.contains(&SegObj::Node(node)) {
            return;
        }
        if self.is_excopy(node) || matches!(self.seg.node(node).kind, SegNodeKind::Region) {
            out.insert(cur.clone());
            return;
        }

        cur.push(SegObj::Node(node));
        let n_kind = self.seg.node(node).kind.clone();
        let func = self.seg.node(node).func;

        let parents: BTreeSet<SegNodeId> =
            self.seg.node(node).parents.iter().copied().collect();
        let has_parent = !parents.is_empty();
        for parent in &parents {
            let parent = *parent;
            let ret_site = if matches!(self.seg.node(parent).kind, SegNodeKind::CommonReturn) {
                self.seg.find_return_site(func, Some(node))
            } else {
                None
            };
            if let Some(site) = ret_site {
                cur.push(SegObj::Site(site));
            }
            self.forward(parent, call_trace, cur, out);
            if ret_site.is_some() {
                cur.pop();
            }
        }

        if !has_parent && !self.needs_forward(node) {
            out.insert(cur.clone());
            cur.pop();
            return;
        }

        let mut crossed = false;
        match &n_kind {
            SegNodeKind::CommonReturn => {
                crossed = true;
                self.ascend_return_forward(node, None, call_trace, cur, out);
            }
            SegNodeKind::PseudoReturn { index, .. } => {
                crossed = true;
                self.ascend_return_forward(node, Some(*index), call_trace, cur, out);
            }
            SegNodeKind::CallSitePseudoInput { site, index, .. } => {
                crossed = true;
                self.descend_input_forward(*site, *index, call_trace, cur, out);
            }
            _ => {
                // a common input of some call site flows into the callee's
                // matching argument
                for &site in &self.seg.node(node).use_sites {
                    let s = self.seg.site(site);
                    let index = match s.common_input_index(node) {
                        Some(i) => i,
                        None => continue,
                    };
                    crossed = true;
                    let callee = match s.called_function() {
                        Some(c) => c,
                        None => continue,
                    };
                    let graph = match self.seg.graph(callee) {
                        Some(g) => g,
                        None => {
                            out.insert(cur.clone());
                            continue;
                        }
                    };
                    let arg = match graph.common_args.get(index as usize) {
                        Some(a) => *a,
                        None => continue,
                    };
                    call_trace.push(callee);
                    cur.push(SegObj::Site(site));
                    self.forward(arg, call_trace, cur, out);
                    cur.pop();
                    call_trace.pop();
                }
            }
        }

        if !crossed && !has_parent {
            out.insert(cur.clone());
        }
        cur.pop();
    }

    /// Leave a return node toward the caller's call-site output.
    fn ascend_return_forward(
        &self,
        node: SegNodeId,
        pseudo_index: Option<u32>,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        let callee = self.seg.node(node).func;
        call_trace.pop();
        if call_trace.is_empty() {
            out.insert(cur.clone());
            call_trace.push(callee);
            return;
        }
        let caller = *call_trace.last().expect("non-empty");

        for site in self.call_sites(caller, callee) {
            let output = match (pseudo_index, &self.seg.site(site).kind) {
                (None, SegSiteKind::Call { common_output, .. }) => *common_output,
                (Some(idx), _) => self.pseudo_output_of(site, idx),
                _ => None,
            };
            if let Some(output) = output {
                self.forward(output, call_trace, cur, out);
            }
        }
        call_trace.push(callee);
    }

    /// Descend from a call-site pseudo input into the callee's pseudo
    /// argument.
    fn descend_input_forward(
        &self,
        site: SegSiteId,
        index: u32,
        call_trace: &mut Vec<FuncId>,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        let callee = match self.seg.site(site).called_function() {
            Some(c) => c,
            None => {
                out.insert(cur.clone());
                return;
            }
        };
        let graph = match self.seg.graph(callee) {
            Some(g) => g,
            None => {
                out.insert(cur.clone());
                return;
            }
        };
        let arg = graph.pseudo_args.iter().copied().find(|n| {
            matches!(self.seg.node(*n).kind, SegNodeKind::PseudoArgument { index: i, .. } if i == index)
        });
        let arg = match arg {
            Some(a) => a,
            None => {
                out.insert(cur.clone());
                return;
            }
        };
        call_trace.push(callee);
        cur.push(SegObj::Site(site));
        self.forward(arg, call_trace, cur, out);
        cur.pop();
        call_trace.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::Opcode;

    /// caller passes its argument into callee; callee returns it
    struct Fixture {
        module: ModuleIr,
        seg: SegModule,
        caller: FuncId,
        callee: FuncId,
        caller_arg: SegNodeId,
        callee_arg: SegNodeId,
        callee_ret: SegNodeId,
        cs_output: SegNodeId,
        site: SegSiteId,
    }

    fn fixture() -> Fixture {
        let mut m = ModuleIr::new();
        let caller = m.add_function("before.patch.caller", "a.c");
        let callee = m.add_function("before.patch.callee", "a.c");
        let cb = m.add_block(caller, "entry");
        let _eb = m.add_block(callee, "entry");
        let x = m.add_argument(caller, "x", "i32");
        let y = m.add_argument(callee, "y", "i32");
        let fv = m.func_value(callee);
        let call = m.add_inst(cb, Opcode::Call, vec![fv, x], "i32", None);

        let mut seg = SegModule::new();
        let caller_arg = seg.add_node(caller, SegNodeKind::CommonArgument { index: 0 }, Some(x), "i32");
        let callee_arg = seg.add_node(callee, SegNodeKind::CommonArgument { index: 0 }, Some(y), "i32");
        let callee_ret = seg.add_node(callee, SegNodeKind::CommonReturn, None, "i32");
        seg.connect(callee_ret, callee_arg);

        let site = seg.add_site(
            caller,
            call,
            SegSiteKind::Call {
                callee: Some(callee),
                callee_value: None,
                indirect: false,
                common_inputs: vec![caller_arg],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );
        let cs_output = seg.add_node(caller, SegNodeKind::CallSiteCommonOutput { site }, None, "i32");
        if let SegSiteKind::Call { common_output, .. } = &mut seg.sites[site.index()].kind {
            *common_output = Some(cs_output);
        }
        // a return site inside the callee
        let ret_inst = {
            let eb = m.func(callee).blocks[0];
            let yv = m.func(callee).args[0];
            m.add_inst(eb, Opcode::Ret, vec![yv], "void", None)
        };
        seg.add_site(callee, ret_inst, SegSiteKind::Return { returned: Some(callee_arg) });

        Fixture {
            module: m,
            seg,
            caller,
            callee,
            caller_arg,
            callee_arg,
            callee_ret,
            cs_output,
            site,
        }
    }

    #[test]
    fn test_backward_descends_into_callee() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let slicer = InterSlicer::new(&fx.module, &fx.seg, &cg, &api);

        let mut out = BTreeSet::new();
        let mut cur = Vec::new();
        let mut trace = vec![fx.caller];
        slicer.backward(fx.cs_output, &mut trace, &mut cur, &mut out);

        // output → common return → (return site) → callee arg, then across
        // the boundary to the caller's input
        assert!(out.iter().any(|p| {
            p.contains(&SegObj::Node(fx.cs_output))
                && p.contains(&SegObj::Node(fx.callee_ret))
                && p.contains(&SegObj::Node(fx.callee_arg))
        }));
    }

    #[test]
    fn test_forward_ascends_to_caller() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let slicer = InterSlicer::new(&fx.module, &fx.seg, &cg, &api);

        let mut out = BTreeSet::new();
        let mut cur = Vec::new();
        let mut trace = vec![fx.caller, fx.callee];
        slicer.forward(fx.callee_arg, &mut trace, &mut cur, &mut out);

        assert!(out.iter().any(|p| p.contains(&SegObj::Node(fx.cs_output))));
    }

    #[test]
    fn test_forward_enters_callee_from_common_input() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let slicer = InterSlicer::new(&fx.module, &fx.seg, &cg, &api);

        let mut out = BTreeSet::new();
        let mut cur = Vec::new();
        let mut trace = vec![fx.caller];
        slicer.forward(fx.caller_arg, &mut trace, &mut cur, &mut out);

        // caller arg → (call site) → callee arg → common return ...
        assert!(out.iter().any(|p| {
            p.contains(&SegObj::Site(fx.site)) && p.contains(&SegObj::Node(fx.callee_arg))
        }));
    }

    #[test]
    fn test_needs_rules() {
        let fx = fixture();
        let cg = CallGraphIndex::build(&fx.module, "asan.");
        let api = ApiClassifier::new(&fx.module, "");
        let slicer = InterSlicer::new(&fx.module, &fx.seg, &cg, &api);

        // arguments of directly-called functions keep extending backward
        assert!(slicer.needs_backward(fx.callee_arg));
        // the call-site output of a defined callee descends into it
        assert!(slicer.needs_backward(fx.cs_output));
        // returns of directly-called functions extend forward
        assert!(slicer.needs_forward(fx.callee_ret));
    }
}
