//! Value → SEG node resolution
//!
//! Maps the added/removed/matched IR values onto SEG nodes: returns resolve
//! to the returned value's node, loads to the load-mem node, stores to the
//! store-mem node when the graph carries one, arguments to their argument
//! node, metadata recurses, functions are skipped, and everything else is
//! looked up in the SEG of every function containing a use.

use crate::shared::models::ir::{InstId, ModuleIr, Opcode, ValueId, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind};
use std::collections::BTreeSet;
use tracing::warn;

/// Resolve a set of IR values to SEG nodes. Functions without a SEG are
/// skipped with a warning (IrMissing is never fatal).
pub fn resolve_values(
    module: &ModuleIr,
    seg: &SegModule,
    values: &BTreeSet<ValueId>,
) -> BTreeSet<SegNodeId> {
    let mut nodes = BTreeSet::new();
    for &value in values {
        resolve_one(module, seg, value, &mut nodes);
    }
    nodes
}

fn resolve_one(
    module: &ModuleIr,
    seg: &SegModule,
    value: ValueId,
    nodes: &mut BTreeSet<SegNodeId>,
) {
    match &module.value(value).kind {
        ValueKind::Inst(inst) => resolve_inst(module, seg, *inst, nodes),
        ValueKind::Argument { func, .. } => {
            if !seg.has_graph(*func) {
                warn!(func = %module.func(*func).name, "no SEG for argument's function");
                return;
            }
            if let Some(node) = seg.find_node(*func, value) {
                nodes.insert(node);
            }
        }
        ValueKind::Function(_) => {}
        ValueKind::Metadata(wrapped) => resolve_one(module, seg, *wrapped, nodes),
        _ => {
            // constants, globals: look up in every function using the value
            for func in module.funcs_using(value) {
                if let Some(node) = seg.find_node(func, value) {
                    nodes.insert(node);
                }
            }
        }
    }
}

fn resolve_inst(module: &ModuleIr, seg: &SegModule, inst: InstId, nodes: &mut BTreeSet<SegNodeId>) {
    let func = module.func_of_inst(inst);
    if !seg.has_graph(func) {
        warn!(func = %module.func(func).name, "no SEG for changed function; skipped");
        return;
    }
    let ir = module.inst(inst);
    match ir.opcode {
        Opcode::Ret => {
            let returned = match ir.operands.first() {
                Some(v) => *v,
                None => return,
            };
            if matches!(module.value(returned).kind, ValueKind::ConstInt(_)) {
                return;
            }
            if let Some(node) = seg.find_node(func, returned) {
                nodes.insert(node);
            }
        }
        Opcode::Load => {
            if let Some(node) = seg.find_node(func, ir.value) {
                nodes.insert(node);
            }
        }
        Opcode::Store => {
            // the store-mem node models the written memory; omitted when the
            // graph has none for this store
            let store_node = seg.graph(func).and_then(|g| {
                g.nodes.iter().copied().find(|n| {
                    matches!(seg.node(*n).kind, SegNodeKind::StoreMem { store: Some(s) } if s == inst)
                })
            });
            if let Some(node) = store_node {
                nodes.insert(node);
            }
        }
        _ => {
            if let Some(node) = seg.find_node(func, ir.value) {
                nodes.insert(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::{BinOp, Opcode};
    use crate::shared::models::SegNodeKind;

    #[test]
    fn test_ret_resolves_to_returned_value_node() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let x = m.add_argument(f, "x", "i32");
        let one = m.const_int(1, "i32");
        let add = m.add_inst(bb, Opcode::BinOp(BinOp::Add), vec![x, one], "i32", None);
        let add_v = m.inst(add).value;
        let ret = m.add_inst(bb, Opcode::Ret, vec![add_v], "void", None);

        let mut seg = SegModule::new();
        let add_node = seg.add_node(f, SegNodeKind::SimpleOperand, Some(add_v), "i32");

        let mut values = BTreeSet::new();
        values.insert(m.inst(ret).value);
        let nodes = resolve_values(&m, &seg, &values);
        assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec![add_node]);
    }

    #[test]
    fn test_constant_return_skipped() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let zero = m.const_int(0, "i32");
        let ret = m.add_inst(bb, Opcode::Ret, vec![zero], "void", None);

        let mut seg = SegModule::new();
        seg.add_graph(f);

        let mut values = BTreeSet::new();
        values.insert(m.inst(ret).value);
        assert!(resolve_values(&m, &seg, &values).is_empty());
    }

    #[test]
    fn test_missing_graph_never_panics() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let x = m.add_argument(f, "x", "i32");
        m.add_inst(bb, Opcode::Ret, vec![x], "void", None);

        let seg = SegModule::new();
        let mut values = BTreeSet::new();
        values.insert(x);
        assert!(resolve_values(&m, &seg, &values).is_empty());
    }

    #[test]
    fn test_store_resolves_to_store_mem_node() {
        let mut m = ModuleIr::new();
        let f = m.add_function("before.patch.f", "a.c");
        let bb = m.add_block(f, "entry");
        let p = m.add_argument(f, "p", "ptr");
        let v = m.add_argument(f, "v", "i32");
        let store = m.add_inst(bb, Opcode::Store, vec![v, p], "void", None);

        let mut seg = SegModule::new();
        let sm = seg.add_node(f, SegNodeKind::StoreMem { store: Some(store) }, None, "i32");

        let mut values = BTreeSet::new();
        values.insert(m.inst(store).value);
        let nodes = resolve_values(&m, &seg, &values);
        assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec![sm]);
    }
}
