//! Call-context matching
//!
//! A trace that crosses function boundaries is valid only when every crossing
//! re-binds the same (call site, callee) pair: descents and ascents must pair
//! up stack-wise, and an indirect call site observed twice must resolve to
//! the same callee both times.

use crate::shared::models::{SegModule, SegNode, SegObj, SegSiteId, SegSiteKind};
use rustc_hash::FxHashMap;
use crate::shared::models::ir::FuncId;

fn is_indirect_site(seg: &SegModule, site: SegSiteId) -> bool {
    matches!(
        &seg.site(site).kind,
        SegSiteKind::Call { indirect: true, .. }
    )
}

/// Bind an indirect site to a callee; a second, different binding breaks the
/// context.
fn bind_indirect(
    seg: &SegModule,
    bindings: &mut FxHashMap<SegSiteId, FuncId>,
    site: SegSiteId,
    callee: FuncId,
) -> bool {
    if !is_indirect_site(seg, site) {
        return true;
    }
    match bindings.get(&site) {
        Some(bound) => *bound == callee,
        None => {
            bindings.insert(site, callee);
            true
        }
    }
}

pub fn match_def_use_context(seg: &SegModule, trace: &[SegObj]) -> bool {
    if trace.len() < 2 {
        return true;
    }

    let mut stack: Vec<SegSiteId> = Vec::new();
    let mut bindings: FxHashMap<SegSiteId, FuncId> = FxHashMap::default();

    for window in trace.windows(2) {
        let (cur, next) = (window[0], window[1]);
        if seg.func_of(cur) == seg.func_of(next) {
            continue;
        }

        let cur_node = cur.as_node().map(|n| seg.node(n));
        let next_node = next.as_node().map(|n| seg.node(n));

        // backward descent: call-site output → return node of the callee
        if let (Some(c), Some(n)) = (&cur_node, &next_node) {
            if c.is_call_site_output() && n.is_return() {
                if let Some(site) = c.owning_call_site() {
                    stack.push(site);
                    if !bind_indirect(seg, &mut bindings, site, n.func) {
                        return false;
                    }
                }
                continue;
            }
        }

        // backward ascent: argument → the caller's call site
        if let (Some(c), SegObj::Site(site)) = (&cur_node, next) {
            if c.is_argument() && matches!(seg.site(site).kind, SegSiteKind::Call { .. }) {
                if !bind_indirect(seg, &mut bindings, site, c.func) {
                    return false;
                }
                if let Some(top) = stack.last() {
                    if *top == site {
                        stack.pop();
                    } else {
                        return false;
                    }
                }
                continue;
            }
        }

        // forward ascent: return node → call-site output in the caller
        if let (Some(c), Some(n)) = (&cur_node, &next_node) {
            if c.is_return() && n.is_call_site_output() {
                if let Some(site) = n.owning_call_site() {
                    if !bind_indirect(seg, &mut bindings, site, c.func) {
                        return false;
                    }
                    if let Some(top) = stack.last() {
                        if *top == site {
                            stack.pop();
                        } else {
                            return false;
                        }
                    }
                }
                continue;
            }
        }

        // forward descent: call site → argument of the callee
        if let (SegObj::Site(site), Some(n)) = (cur, &next_node) {
            if matches!(seg.site(site).kind, SegSiteKind::Call { .. }) && is_arg(n) {
                if !bind_indirect(seg, &mut bindings, site, n.func) {
                    return false;
                }
                stack.push(site);
            }
        }
    }
    true
}

fn is_arg(node: &SegNode) -> bool {
    node.is_argument()
}
