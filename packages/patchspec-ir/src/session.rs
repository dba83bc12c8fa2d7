//! Analysis session
//!
//! Owns the module image and every cache the pipeline mutates, and runs the
//! phases in their fixed order: patch projection, node matching, per-side
//! slicing and trace building, ordering, classification, abstraction.
//! Nothing here is global; tests allocate a fresh session per case.

use crate::config::AnalysisConfig;
use crate::features::condition::{CondArena, ConditionBuilder};
use crate::features::enhanced_trace::{
    filter_sub_traces, update_trace_order, EnhancedTrace, TraceBuilder,
};
use crate::features::graph_adapter::{ApiClassifier, CallGraphIndex, CfgIndex};
use crate::features::node_resolution::resolve_values;
use crate::features::patch_projection::{PatchProjector, ProjectionState};
use crate::features::slicing::{normalize_phi_duplicates, IntraSlicer, SegTrace};
use crate::features::smt::infrastructure::solver::BoundedSolver;
use crate::features::spec_abstraction::{PeerTable, SpecAbstractor, SpecSet};
use crate::features::trace_diff::TraceDiffer;
use crate::shared::models::ir::ModuleIr;
use crate::shared::models::{Result, SegModule, SegNodeId};
use crate::shared::utils::clean_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// On-disk form of the adapter input: the IR plus its symbolic expression
/// graphs, as produced by the external loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleImage {
    pub ir: ModuleIr,
    pub seg: SegModule,
}

pub struct Session {
    pub module: ModuleIr,
    pub seg: SegModule,
    pub config: AnalysisConfig,
}

impl Session {
    pub fn new(image: ModuleImage, config: AnalysisConfig) -> Self {
        let ModuleImage { ir: mut module, mut seg } = image;
        PatchProjector::prepare(&mut module);
        normalize_phi_duplicates(&module, &mut seg);
        Self {
            module,
            seg,
            config,
        }
    }

    /// `Indirect Call: <file>:<name>;` per indirect-call target.
    pub fn dump_indirect_calls(&self) -> Vec<String> {
        let cg = CallGraphIndex::build(&self.module, &self.config.sanitizer_prefix);
        cg.indirect_targets()
            .map(|func| {
                let f = self.module.func(func);
                format!("Indirect Call: {}:{};", f.source_file, f.name)
            })
            .collect()
    }

    /// Dot edges over the acyclic call relation, indirect targets annotated.
    pub fn dump_call_graph(&self) -> Vec<String> {
        let cg = CallGraphIndex::build(&self.module, &self.config.sanitizer_prefix);
        let label = |func| {
            let f = self.module.func(func);
            let suffix = if cg.is_indirect_target(func) {
                " (Indirect)"
            } else {
                ""
            };
            format!("{}:{}{}", f.source_file, f.name, suffix)
        };
        let mut edges = Vec::new();
        for (caller, callees) in &cg.caller_to_callees {
            if self.module.func(*caller).source_file.is_empty() {
                continue;
            }
            for callee in callees {
                if self.module.func(*callee).source_file.is_empty() {
                    continue;
                }
                edges.push(format!("\"{}\" -> \"{}\";", label(*caller), label(*callee)));
            }
        }
        edges
    }

    /// The whole inference pipeline: C2 → C3 → per-side C4/C5/C6 → C7 → C8.
    pub fn infer_patch_spec(&mut self, patch_text: &str, peers: &PeerTable) -> Result<SpecSet> {
        // Phase 1: line diff → IR diff
        info!("phase 1: projecting patch onto IR");
        let mut proj = ProjectionState::new();
        let mut projector = PatchProjector::new(&self.module, patch_text)?;
        let changes = projector.project(&mut proj);

        let mut cg = CallGraphIndex::build(&self.module, &self.config.sanitizer_prefix);
        let api = ApiClassifier::new(&self.module, self.config.ignored_function_substr.clone());
        let mut cfg = CfgIndex::new();

        // Phase 2: value diff → node diff → value-flow diff
        info!("phase 2: matching SEG nodes and slicing value flows");
        let mut differ = TraceDiffer::new(&self.module, &self.seg);
        differ.match_ab_seg_nodes(&mut proj);

        let removed_nodes = resolve_values(&self.module, &self.seg, &changes.removed_values);
        let added_nodes = resolve_values(&self.module, &self.seg, &changes.added_values);

        let mut slicer = IntraSlicer::new(&self.module, &self.seg);
        let mut solver =
            BoundedSolver::with_limits(self.config.smt_branch_budget, self.config.smt_timeout);
        let mut arena = CondArena::new();

        let before_slices =
            Self::slice_side(&differ, &proj, &mut slicer, &removed_nodes, true);
        let after_slices = Self::slice_side(&differ, &proj, &mut slicer, &added_nodes, false);

        // Phase 2b: enhanced traces per side
        let (mut before_traces, mut after_traces) = {
            let mut cb = ConditionBuilder::new(
                &self.module,
                &self.seg,
                &cg,
                &api,
                &mut cfg,
                &mut slicer,
                &mut solver,
            );
            let mut builder = TraceBuilder::new(&self.module, &self.seg, &cg, &api, &mut cb);
            let mut before_traces = Vec::new();
            builder.intra_enhanced(&mut arena, &before_slices, &mut before_traces);
            let mut after_traces = Vec::new();
            builder.intra_enhanced(&mut arena, &after_slices, &mut after_traces);
            (before_traces, after_traces)
        };
        filter_sub_traces(&mut before_traces);
        filter_sub_traces(&mut after_traces);
        update_trace_order(&self.module, &self.seg, &mut cg, &mut cfg, &mut before_traces);
        update_trace_order(&self.module, &self.seg, &mut cg, &mut cfg, &mut after_traces);

        // intra classification decides which traces get the inter extension
        let intra_outcome = differ.classify(
            &mut proj,
            &arena,
            &mut slicer,
            &mut solver,
            &before_traces,
            &after_traces,
        );
        let intra_unchanged_before: BTreeSet<usize> =
            intra_outcome.unchanged.iter().map(|(b, _)| *b).collect();
        let intra_unchanged_after: BTreeSet<usize> =
            intra_outcome.unchanged.iter().map(|(_, a)| *a).collect();

        // Phase 2c: extend the changed traces across calls
        let (mut before_inter, mut after_inter) = {
            let mut cb = ConditionBuilder::new(
                &self.module,
                &self.seg,
                &cg,
                &api,
                &mut cfg,
                &mut slicer,
                &mut solver,
            );
            let mut builder = TraceBuilder::new(&self.module, &self.seg, &cg, &api, &mut cb);
            let mut before_inter: Vec<EnhancedTrace> = Vec::new();
            for (idx, trace) in before_traces.iter().enumerate() {
                if intra_unchanged_before.contains(&idx) {
                    continue;
                }
                builder.inter_extend(&mut arena, trace, &mut before_inter);
            }
            let mut after_inter: Vec<EnhancedTrace> = Vec::new();
            for (idx, trace) in after_traces.iter().enumerate() {
                if intra_unchanged_after.contains(&idx) {
                    continue;
                }
                builder.inter_extend(&mut arena, trace, &mut after_inter);
            }
            (before_inter, after_inter)
        };
        update_trace_order(&self.module, &self.seg, &mut cg, &mut cfg, &mut before_inter);
        update_trace_order(&self.module, &self.seg, &mut cg, &mut cfg, &mut after_inter);

        // Phase 3: classify and abstract
        info!("phase 3: classifying traces and abstracting specs");
        let outcome = differ.classify(
            &mut proj,
            &arena,
            &mut slicer,
            &mut solver,
            &before_inter,
            &after_inter,
        );

        let abstractor = SpecAbstractor::new(&self.module, &self.seg, &cg, &api);
        let specs = abstractor.build_specs(
            &mut proj,
            &mut differ,
            &mut arena,
            &mut slicer,
            &mut solver,
            &before_inter,
            &after_inter,
            &outcome,
            peers,
        );
        Ok(specs)
    }

    /// Stage 1 + 2 of the intra slicing: changed-node criteria first, then a
    /// closure round over every node the discovered traces touch.
    fn slice_side(
        differ: &TraceDiffer,
        proj: &ProjectionState,
        slicer: &mut IntraSlicer,
        changed_nodes: &BTreeSet<SegNodeId>,
        before_side: bool,
    ) -> BTreeSet<SegTrace> {
        let criteria = differ.slicing_criteria(proj, changed_nodes, before_side);
        let mut processed = criteria.clone();
        let mut traces = BTreeSet::new();
        for criterion in &criteria {
            traces.extend(slicer.value_flow(*criterion));
        }
        let fresh = differ.closure_criteria(&traces, &mut processed);
        for criterion in fresh {
            traces.extend(slicer.value_flow(criterion));
        }
        info!(
            side = if before_side { "before" } else { "after" },
            criteria = criteria.len(),
            traces = traces.len(),
            "intra slicing done"
        );
        traces
    }

    /// Matched-value bookkeeping summary, mirroring the statistics block the
    /// projection phase reports.
    pub fn describe(&self) -> String {
        let funcs = self
            .module
            .func_ids()
            .filter(|f| !self.module.func(*f).is_declaration)
            .count();
        format!(
            "module: {} functions ({} defined), {} SEG graphs",
            self.module.functions.len(),
            funcs,
            self.seg.graphs.len()
        )
    }
}

/// Cleaned display name used by several dump surfaces.
pub fn display_name(module: &ModuleIr, func: crate::shared::models::ir::FuncId) -> String {
    clean_name(&module.func(func).name)
}
