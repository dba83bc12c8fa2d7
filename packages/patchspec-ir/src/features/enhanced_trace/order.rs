//! Output ordering
//!
//! Traces are grouped by their input node; within a group the output sites
//! are topologically sorted under inter-procedural reachability and assigned
//! 1-based priorities. Two sites with a reachability ordering get strictly
//! increasing priorities; mutually unreachable sites share one.

use super::domain::EnhancedTrace;
use crate::features::graph_adapter::{CallGraphIndex, CfgIndex};
use crate::shared::models::ir::{InstId, ModuleIr};
use crate::shared::models::SegModule;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

pub fn update_trace_order(
    module: &ModuleIr,
    seg: &SegModule,
    cg: &mut CallGraphIndex,
    cfg: &mut CfgIndex,
    traces: &mut [EnhancedTrace],
) {
    // group trace indices by input node
    let mut groups: BTreeMap<_, Vec<usize>> = BTreeMap::new();
    for (idx, trace) in traces.iter().enumerate() {
        if let Some(input_node) = trace.input.used_node {
            groups.entry(input_node).or_default().push(idx);
        }
    }

    for (_input, members) in groups {
        let mut sites = BTreeSet::new();
        for &idx in &members {
            if let Some(site) = traces[idx].output.used_site {
                sites.insert(seg.site(site).inst);
            }
        }
        if sites.is_empty() {
            continue;
        }
        let orders = site_orders(module, cg, cfg, &sites);
        for &idx in &members {
            if let Some(site) = traces[idx].output.used_site {
                if let Some(order) = orders.get(&seg.site(site).inst) {
                    traces[idx].output_order = *order;
                }
            }
        }
    }
}

/// 1-based priorities for a set of site instructions (P6: a reachability
/// ordering implies a non-decreasing priority ordering).
pub fn site_orders(
    module: &ModuleIr,
    cg: &mut CallGraphIndex,
    cfg: &mut CfgIndex,
    sites: &BTreeSet<InstId>,
) -> BTreeMap<InstId, u32> {
    let site_list: Vec<InstId> = sites.iter().copied().collect();

    // reachability digraph
    let mut edges: BTreeMap<InstId, Vec<InstId>> = BTreeMap::new();
    let mut reaches = |cg: &mut CallGraphIndex, cfg: &mut CfgIndex, a: InstId, b: InstId| {
        cg.reachable_inter(module, cfg, a, b)
    };
    for &a in &site_list {
        for &b in &site_list {
            if a >= b {
                continue;
            }
            let ab = reaches(cg, cfg, a, b);
            let ba = reaches(cg, cfg, b, a);
            if ab && !ba {
                edges.entry(a).or_default().push(b);
            } else if ba && !ab {
                edges.entry(b).or_default().push(a);
            }
        }
    }

    // Kahn topological sort
    let mut indegree: BTreeMap<InstId, usize> = site_list.iter().map(|s| (*s, 0)).collect();
    for targets in edges.values() {
        for t in targets {
            *indegree.get_mut(t).expect("site list is closed") += 1;
        }
    }
    let mut queue: VecDeque<InstId> = site_list
        .iter()
        .filter(|s| indegree[s] == 0)
        .copied()
        .collect();
    let mut topo = Vec::new();
    while let Some(inst) = queue.pop_front() {
        topo.push(inst);
        for t in edges.get(&inst).cloned().unwrap_or_default() {
            let d = indegree.get_mut(&t).expect("site list is closed");
            *d -= 1;
            if *d == 0 {
                queue.push_back(t);
            }
        }
    }
    if topo.len() != site_list.len() {
        warn!("reachability cycle among output sites; residue keeps insertion order");
        for s in &site_list {
            if !topo.contains(s) {
                topo.push(*s);
            }
        }
    }

    // assign priorities: bump when any site of the current tier reaches the
    // next one
    let mut orders = BTreeMap::new();
    let mut priority = 1u32;
    let mut tier: Vec<InstId> = Vec::new();
    for (i, &inst) in topo.iter().enumerate() {
        if i == 0 {
            tier.push(inst);
            orders.insert(inst, priority);
            continue;
        }
        let ordered_after = tier.iter().any(|&prev| {
            reaches(cg, cfg, prev, inst) || reaches(cg, cfg, inst, prev)
        });
        if ordered_after {
            priority += 1;
            tier.clear();
        }
        tier.push(inst);
        orders.insert(inst, priority);
    }
    orders
}
