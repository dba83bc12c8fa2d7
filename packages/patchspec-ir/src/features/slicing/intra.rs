//! Intra-procedural value-flow slicing
//!
//! Backward slices follow operands, forward slices follow users; both detect
//! cycles with the current path, terminate at external-copy markers (and
//! region nodes going forward), skip constant operands of opcode nodes, and
//! memoise completed sub-paths per start node so repeated entries reuse
//! cached tails.

use super::domain::SegTrace;
use super::related_bbs::collect_related_blocks;
use crate::shared::models::ir::{ModuleIr, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegObj};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Duplicate constant incomings of every phi are cloned into fresh simple
/// operand nodes (with the incoming block attached) so downstream analyses
/// can tell the arms apart. Run once before any slicing.
pub fn normalize_phi_duplicates(module: &ModuleIr, seg: &mut SegModule) {
    let phi_nodes: Vec<SegNodeId> = (0..seg.nodes.len() as u32)
        .map(SegNodeId)
        .filter(|n| matches!(seg.node(*n).kind, SegNodeKind::Phi { .. }))
        .collect();

    for phi in phi_nodes {
        loop {
            let dup_pos = {
                let incomings = match &seg.node(phi).kind {
                    SegNodeKind::Phi { incomings } => incomings,
                    _ => unreachable!(),
                };
                let mut seen = BTreeSet::new();
                let mut found = None;
                for (pos, inc) in incomings.iter().enumerate() {
                    if !seen.insert(inc.value) {
                        let is_const = seg.node(inc.value).dbg_value.is_some_and(|v| {
                            matches!(module.value(v).kind, ValueKind::ConstInt(_))
                        });
                        if is_const {
                            found = Some(pos);
                            break;
                        }
                    }
                }
                found
            };
            match dup_pos {
                Some(pos) => {
                    seg.clone_phi_constant(phi, pos);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SliceStats {
    pub backward_cache_hits: u64,
    pub forward_cache_hits: u64,
}

pub struct IntraSlicer<'a> {
    module: &'a ModuleIr,
    seg: &'a SegModule,
    backward_cache: FxHashMap<SegNodeId, BTreeSet<Vec<SegObj>>>,
    forward_cache: FxHashMap<SegNodeId, BTreeSet<Vec<SegObj>>>,
    visited_traces: BTreeSet<Vec<SegObj>>,
    stats: SliceStats,
}

impl<'a> IntraSlicer<'a> {
    pub fn new(module: &'a ModuleIr, seg: &'a SegModule) -> Self {
        Self {
            module,
            seg,
            backward_cache: FxHashMap::default(),
            forward_cache: FxHashMap::default(),
            visited_traces: BTreeSet::new(),
            stats: SliceStats::default(),
        }
    }

    pub fn stats(&self) -> SliceStats {
        self.stats
    }

    fn is_excopy(&self, node: SegNodeId) -> bool {
        self.seg
            .resolved_name(self.module, node)
            .map(crate::shared::utils::is_excopy_name)
            .unwrap_or(false)
    }

    fn is_const_operand(&self, node: SegNodeId) -> bool {
        self.seg.node(node).dbg_value.is_some_and(|v| {
            matches!(
                self.module.value(v).kind,
                ValueKind::ConstInt(_) | ValueKind::ConstNull
            )
        })
    }

    /// All backward def–use paths from `node` (criterion first).
    pub fn backward(&mut self, node: SegNodeId) -> BTreeSet<Vec<SegObj>> {
        let mut out = BTreeSet::new();
        let mut cur = Vec::new();
        self.backward_rec(node, &mut cur, &mut out);
        out
    }

    fn backward_rec(
        &mut self,
        node: SegNodeId,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        if cur.contains(&SegObj::Node(node)) {
            return; // def-use cycle
        }
        if let Some(cached) = self.backward_cache.get(&node) {
            self.stats.backward_cache_hits += 1;
            for tail in cached.clone() {
                let mut path = cur.clone();
                path.extend(tail);
                out.insert(path);
            }
            return;
        }

        if self.is_excopy(node) {
            out.insert(cur.clone());
            self.backward_cache
                .insert(node, BTreeSet::from([Vec::new()]));
            return;
        }

        cur.push(SegObj::Node(node));
        let children = self.seg.node(node).children.clone();
        if children.is_empty() {
            self.backward_cache
                .insert(node, BTreeSet::from([vec![SegObj::Node(node)]]));
            out.insert(cur.clone());
            cur.pop();
            return;
        }

        let mut local: BTreeSet<Vec<SegObj>> = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let node_is_opcode = self.seg.node(node).is_opcode();
        for child in children {
            if !seen.insert(child) {
                continue;
            }
            // constants feeding an opcode are inputs, not data sources
            if node_is_opcode && self.is_const_operand(child) {
                continue;
            }
            self.backward_rec(child, cur, out);
            if let Some(tails) = self.backward_cache.get(&child) {
                for tail in tails.clone() {
                    let mut path = vec![SegObj::Node(node)];
                    path.extend(tail);
                    local.insert(path);
                }
            }
        }

        self.backward_cache.insert(node, local);
        cur.pop();
    }

    /// All forward use paths from `node` (criterion first).
    pub fn forward(&mut self, node: SegNodeId) -> BTreeSet<Vec<SegObj>> {
        let mut out = BTreeSet::new();
        let mut cur = Vec::new();
        self.forward_rec(node, &mut cur, &mut out);
        out
    }

    fn forward_rec(
        &mut self,
        node: SegNodeId,
        cur: &mut Vec<SegObj>,
        out: &mut BTreeSet<Vec<SegObj>>,
    ) {
        if cur.contains(&SegObj::Node(node)) {
            return;
        }
        if let Some(cached) = self.forward_cache.get(&node) {
            self.stats.forward_cache_hits += 1;
            for tail in cached.clone() {
                let mut path = cur.clone();
                path.extend(tail);
                out.insert(path);
            }
            return;
        }

        if self.is_excopy(node) || matches!(self.seg.node(node).kind, SegNodeKind::Region) {
            out.insert(cur.clone());
            self.forward_cache.insert(node, BTreeSet::from([Vec::new()]));
            return;
        }

        cur.push(SegObj::Node(node));
        let parents: BTreeSet<SegNodeId> = self.seg.node(node).parents.iter().copied().collect();
        if parents.is_empty() {
            self.forward_cache
                .insert(node, BTreeSet::from([vec![SegObj::Node(node)]]));
            out.insert(cur.clone());
            cur.pop();
            return;
        }

        let mut local: BTreeSet<Vec<SegObj>> = BTreeSet::new();
        for parent in parents {
            self.forward_rec(parent, cur, out);
            if let Some(tails) = self.forward_cache.get(&parent) {
                for tail in tails.clone() {
                    let mut path = vec![SegObj::Node(node)];
                    path.extend(tail);
                    local.insert(path);
                }
            }
        }
        self.forward_cache.insert(node, local);
        cur.pop();
    }

    /// Full intra slices through `criterion`: every backward path reversed
    /// and glued to every forward path, with related blocks attached.
    /// Duplicate traces (reachable from several criteria) are suppressed.
    pub fn value_flow(&mut self, criterion: SegNodeId) -> BTreeSet<SegTrace> {
        let backwards = self.backward(criterion);
        let forwards = self.forward(criterion);

        let mut traces = BTreeSet::new();
        for forward in &forwards {
            if forward.is_empty() {
                continue;
            }
            for backward in &backwards {
                let mut combined: Vec<SegObj> = backward.clone();
                combined.reverse();
                combined.extend(forward.iter().skip(1).copied());
                if combined.is_empty() {
                    continue;
                }
                if self.visited_traces.contains(&combined) {
                    continue;
                }
                self.visited_traces.insert(combined.clone());
                for blocks in collect_related_blocks(self.module, self.seg, &combined) {
                    traces.insert(SegTrace::new(combined.clone(), blocks));
                }
            }
        }
        traces
    }
}
