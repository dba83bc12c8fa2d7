//! Sensitive-operation sinks
//!
//! Scans a trace's nodes for uses at sensitive sites: divisor operands,
//! dereferenced pointers, and the length argument of memcpy-style APIs.

use super::domain::{OutputKind, OutputNode};
use crate::shared::models::ir::{ModuleIr, ValueId};
use crate::shared::models::{SegModule, SegObj, SegSiteKind};
use crate::shared::utils::clean_name;

/// memcpy-style length argument position
const MEMCPY_LENGTH_ARG: u32 = 2;

pub fn find_sensitive_outputs(
    module: &ModuleIr,
    seg: &SegModule,
    trace: &[SegObj],
) -> Vec<OutputNode> {
    let mut outputs = Vec::new();
    for obj in trace {
        let node = match obj.as_node() {
            Some(n) => n,
            None => continue,
        };
        if seg.node(node).is_opcode() {
            continue;
        }
        let func_name = clean_name(&module.func(seg.node(node).func).name);
        for &site_id in &seg.node(node).use_sites {
            let site = seg.site(site_id);
            match &site.kind {
                SegSiteKind::Div { denominator } if *denominator == node => {
                    let mut output = OutputNode::new(
                        OutputKind::SensitiveOp {
                            opcode: "div".to_string(),
                            operand_index: 1,
                        },
                        func_name.clone(),
                    );
                    output.used_node = Some(node);
                    output.used_site = Some(site_id);
                    outputs.push(output);
                }
                SegSiteKind::Dereference { pointer } if *pointer == node => {
                    let mut output = OutputNode::new(
                        OutputKind::SensitiveOp {
                            opcode: "deref".to_string(),
                            operand_index: -1,
                        },
                        func_name.clone(),
                    );
                    output.used_node = Some(node);
                    output.used_site = Some(site_id);
                    outputs.push(output);
                }
                SegSiteKind::Call { callee, .. } => {
                    let callee = match callee {
                        Some(c) => *c,
                        None => continue,
                    };
                    let callee_name = &module.func(callee).name;
                    let memcpy_like = module.func(callee).is_intrinsic
                        && callee_name.starts_with("llvm.memcpy")
                        || callee_name == "__memcpy";
                    if !memcpy_like {
                        continue;
                    }
                    if arg_position(module, seg, site_id, node) == Some(MEMCPY_LENGTH_ARG) {
                        let mut output = OutputNode::new(
                            OutputKind::SensitiveApi {
                                api: callee_name.clone(),
                                arg_index: MEMCPY_LENGTH_ARG,
                            },
                            func_name.clone(),
                        );
                        output.used_node = Some(node);
                        output.used_site = Some(site_id);
                        outputs.push(output);
                    }
                }
                _ => {}
            }
        }
    }
    outputs
}

/// Which call argument position carries this node's value.
fn arg_position(
    module: &ModuleIr,
    seg: &SegModule,
    site: crate::shared::models::SegSiteId,
    node: crate::shared::models::SegNodeId,
) -> Option<u32> {
    let value: ValueId = seg.node(node).dbg_value?;
    let inst = seg.site(site).inst;
    let operands = &module.inst(inst).operands;
    // operand 0 is the callee
    operands
        .iter()
        .skip(1)
        .position(|op| *op == value)
        .map(|p| p as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::{BinOp, Opcode};
    use crate::shared::models::SegNodeKind;

    #[test]
    fn test_divisor_is_sensitive() {
        let mut m = ModuleIr::new();
        let f = m.add_function("after.patch.calc", "a.c");
        let bb = m.add_block(f, "entry");
        let num = m.add_argument(f, "num", "i32");
        let den = m.add_argument(f, "den", "i32");
        let div = m.add_inst(bb, Opcode::BinOp(BinOp::SDiv), vec![num, den], "i32", None);

        let mut seg = SegModule::new();
        let den_n = seg.add_node(f, SegNodeKind::CommonArgument { index: 1 }, Some(den), "i32");
        let _site = seg.add_site(f, div, SegSiteKind::Div { denominator: den_n });

        let outputs = find_sensitive_outputs(&m, &seg, &[SegObj::Node(den_n)]);
        assert_eq!(outputs.len(), 1);
        assert_eq!(
            outputs[0].kind,
            OutputKind::SensitiveOp {
                opcode: "div".to_string(),
                operand_index: 1
            }
        );
        assert_eq!(outputs[0].node_func, "calc");
    }

    #[test]
    fn test_memcpy_length_argument() {
        let mut m = ModuleIr::new();
        let f = m.add_function("after.patch.copy", "a.c");
        let bb = m.add_block(f, "entry");
        let memcpy = m.add_declaration("__memcpy");
        let dst = m.add_argument(f, "dst", "ptr");
        let src = m.add_argument(f, "src", "ptr");
        let len = m.add_argument(f, "len", "i64");
        let mv = m.func_value(memcpy);
        let call = m.add_inst(bb, Opcode::Call, vec![mv, dst, src, len], "void", None);

        let mut seg = SegModule::new();
        let len_n = seg.add_node(f, SegNodeKind::CommonArgument { index: 2 }, Some(len), "i64");
        let _site = seg.add_site(
            f,
            call,
            SegSiteKind::Call {
                callee: Some(memcpy),
                callee_value: None,
                indirect: false,
                common_inputs: vec![len_n],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );

        let outputs = find_sensitive_outputs(&m, &seg, &[SegObj::Node(len_n)]);
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            &outputs[0].kind,
            OutputKind::SensitiveApi { api, arg_index: 2 } if api == "__memcpy"
        ));
    }
}
