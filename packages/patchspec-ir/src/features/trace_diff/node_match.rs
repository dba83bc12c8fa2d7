//! Cross-build SEG node and site matching
//!
//! Structural matching between the before/after variants: kind, cleaned
//! type, argument indices, access-path shape, and (for value-carrying
//! operand nodes) the matched-IR relation established by the patch
//! projector. Successful instruction comparisons extend that relation, so
//! repeated queries stay O(1).

use crate::features::patch_projection::domain::ProjectionState;
use crate::features::patch_projection::ValueMatcher;
use crate::shared::models::ir::{ModuleIr, ValueKind};
use crate::shared::models::{SegModule, SegNodeId, SegNodeKind, SegSiteId};
use crate::shared::utils::{clean_name_patch, clean_type};

/// Kind/type/index/access-path comparison, no value identity involved.
pub fn nodes_structurally_matched(seg: &SegModule, n1: SegNodeId, n2: SegNodeId) -> bool {
    if n1 == n2 {
        return true;
    }
    let a = seg.node(n1);
    let b = seg.node(n2);
    if a.kind.tag() != b.kind.tag() {
        return false;
    }
    if !a.ty.is_empty() && !b.ty.is_empty() && clean_type(&a.ty) != clean_type(&b.ty) {
        return false;
    }
    if let (SegNodeKind::CommonArgument { index: i1 }, SegNodeKind::CommonArgument { index: i2 }) =
        (&a.kind, &b.kind)
    {
        if i1 != i2 {
            return false;
        }
    }
    match (a.access_path(), b.access_path()) {
        (Some(p1), Some(p2)) if !p1.same_shape(p2) => return false,
        _ => {}
    }
    true
}

/// Full cross-variant node match; may extend the matched-value relation
/// through instruction comparison.
pub fn patch_nodes_matched(
    module: &ModuleIr,
    seg: &SegModule,
    proj: &mut ProjectionState,
    n1: SegNodeId,
    n2: SegNodeId,
) -> bool {
    if n1 == n2 {
        return true;
    }
    let a = seg.node(n1);
    let b = seg.node(n2);

    let f1 = clean_name_patch(&module.func(a.func).name);
    let f2 = clean_name_patch(&module.func(b.func).name);
    if f1 != f2 {
        return false;
    }

    if !nodes_structurally_matched(seg, n1, n2) {
        return false;
    }

    // call-site instructions behind pseudo inputs/outputs must line up with
    // the matched-IR relation
    if let (Some(s1), Some(s2)) = (a.owning_call_site(), b.owning_call_site()) {
        let i1 = seg.site(s1).inst;
        let i2 = seg.site(s2).inst;
        let v1 = module.inst(i1).value;
        let v2 = module.inst(i2).value;
        if let Some(partner) = proj.matched_values.partner(v1) {
            if partner != v2 {
                return false;
            }
        }
        let c1 = seg.site(s1).called_function();
        let c2 = seg.site(s2).called_function();
        if let (Some(c1), Some(c2)) = (c1, c2) {
            if clean_name_patch(&module.func(c1).name) != clean_name_patch(&module.func(c2).name)
            {
                return false;
            }
        }
    }

    if a.is_operand() {
        if let (Some(v1), Some(v2)) = (a.dbg_value, b.dbg_value) {
            if v1 == v2 {
                return true;
            }
            // pseudo nodes are identified by site + access path alone
            if matches!(
                a.kind,
                SegNodeKind::PseudoArgument { .. }
                    | SegNodeKind::PseudoReturn { .. }
                    | SegNodeKind::CallSitePseudoInput { .. }
                    | SegNodeKind::CallSitePseudoOutput { .. }
            ) {
                return true;
            }
            if a.func != b.func {
                let matcher = ValueMatcher::new(module);
                if !matcher.values_match(proj, v1, v2, false) {
                    return false;
                }
            } else {
                return false;
            }
        }
    }
    true
}

/// Cross-variant site match, resolving through the matched-IR relation
/// first and instruction structure second.
pub fn patch_sites_matched(
    module: &ModuleIr,
    seg: &SegModule,
    proj: &mut ProjectionState,
    s1: SegSiteId,
    s2: SegSiteId,
) -> bool {
    if s1 == s2 {
        return true;
    }
    let a = seg.site(s1);
    let b = seg.site(s2);

    let f1 = clean_name_patch(&module.func(a.func).name);
    let f2 = clean_name_patch(&module.func(b.func).name);
    if f1 != f2 {
        return false;
    }
    if a.kind.tag() != b.kind.tag() {
        return false;
    }

    let v1 = module.inst(a.inst).value;
    let v2 = module.inst(b.inst).value;
    if let Some(partner) = proj.matched_values.partner(v1) {
        return partner == v2;
    }
    if let Some(partner) = proj.matched_values.partner(v2) {
        return partner == v1;
    }

    let matcher = ValueMatcher::new(module);
    matcher.insts_match(proj, a.inst, b.inst, false)
}

/// Optional-site comparison used for I/O anchors: both absent is a match.
pub fn optional_sites_matched(
    module: &ModuleIr,
    seg: &SegModule,
    proj: &mut ProjectionState,
    s1: Option<SegSiteId>,
    s2: Option<SegSiteId>,
) -> bool {
    match (s1, s2) {
        (None, None) => true,
        (Some(s1), Some(s2)) => patch_sites_matched(module, seg, proj, s1, s2),
        _ => false,
    }
}

/// Helper mirroring the dbg-value classification used in several matchers.
pub fn dbg_is_const(module: &ModuleIr, seg: &SegModule, node: SegNodeId) -> bool {
    seg.node(node)
        .dbg_value
        .is_some_and(|v| matches!(module.value(v).kind, ValueKind::ConstInt(_) | ValueKind::ConstNull))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::Opcode;

    fn ab_module() -> (ModuleIr, SegModule, SegNodeId, SegNodeId) {
        let mut m = ModuleIr::new();
        let fb = m.add_function("before.patch.f", "a.c");
        let fa = m.add_function("after.patch.f", "a.c");
        let xb = m.add_argument(fb, "x", "i32");
        let xa = m.add_argument(fa, "x", "i32");

        let mut seg = SegModule::new();
        let nb = seg.add_node(fb, SegNodeKind::CommonArgument { index: 0 }, Some(xb), "i32");
        let na = seg.add_node(fa, SegNodeKind::CommonArgument { index: 0 }, Some(xa), "i32");
        (m, seg, nb, na)
    }

    #[test]
    fn test_cross_variant_arguments_match() {
        let (m, seg, nb, na) = ab_module();
        let mut proj = ProjectionState::new();
        assert!(patch_nodes_matched(&m, &seg, &mut proj, nb, na));
    }

    #[test]
    fn test_index_mismatch_rejected() {
        let (mut m, mut seg, nb, _na) = ab_module();
        let fa = m.function_by_name("after.patch.f").unwrap();
        let y = m.add_argument(fa, "y", "i32");
        let wrong = seg.add_node(fa, SegNodeKind::CommonArgument { index: 1 }, Some(y), "i32");
        let mut proj = ProjectionState::new();
        assert!(!patch_nodes_matched(&m, &seg, &mut proj, nb, wrong));
    }

    #[test]
    fn test_other_function_rejected() {
        let (mut m, mut seg, nb, _na) = ab_module();
        let other = m.add_function("after.patch.g", "a.c");
        let z = m.add_argument(other, "z", "i32");
        let zn = seg.add_node(other, SegNodeKind::CommonArgument { index: 0 }, Some(z), "i32");
        let mut proj = ProjectionState::new();
        assert!(!patch_nodes_matched(&m, &seg, &mut proj, nb, zn));
    }

    #[test]
    fn test_sites_match_through_matched_irs() {
        let mut m = ModuleIr::new();
        let callee = m.add_declaration("kfree");
        let fb = m.add_function("before.patch.f", "a.c");
        let fa = m.add_function("after.patch.f", "a.c");
        let bb = m.add_block(fb, "entry");
        let ba = m.add_block(fa, "entry");
        let cv1 = m.func_value(callee);
        let cv2 = m.func_value(callee);
        let i1 = m.add_inst(bb, Opcode::Call, vec![cv1], "void", None);
        let i2 = m.add_inst(ba, Opcode::Call, vec![cv2], "void", None);

        let mut seg = SegModule::new();
        let s1 = seg.add_site(
            fb,
            i1,
            crate::shared::models::SegSiteKind::Call {
                callee: Some(callee),
                callee_value: None,
                indirect: false,
                common_inputs: vec![],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );
        let s2 = seg.add_site(
            fa,
            i2,
            crate::shared::models::SegSiteKind::Call {
                callee: Some(callee),
                callee_value: None,
                indirect: false,
                common_inputs: vec![],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );

        let mut proj = ProjectionState::new();
        proj.matched_values.insert(m.inst(i1).value, m.inst(i2).value);
        assert!(patch_sites_matched(&m, &seg, &mut proj, s1, s2));
    }
}
