//! In-memory module images for the end-to-end scenarios
//!
//! Each builder produces both patch variants of a small driver function plus
//! the SEG the external builder would derive for them, following the SEG
//! conventions the analyses expect (an instruction's operand node has its
//! opcode node as first child; loads carry their instruction as debug value).

// each test target compiles its own copy and uses a subset of the fixtures
#![allow(dead_code)]

use patchspec_ir::shared::models::ir::{dbg, FuncId, IcmpPred, InstId, ModuleIr, Opcode, ValueId};
use patchspec_ir::shared::models::{
    PhiIncoming, SegModule, SegNodeId, SegNodeKind, SegSiteId, SegSiteKind,
};
use patchspec_ir::ModuleImage;

pub const SRC: &str = "driver/x.c";

/// Mark a function as an indirect-call target: address taken plus one
/// non-call user (a store into an ops table).
pub fn make_indirect(m: &mut ModuleIr, func: FuncId, holder_name: &str) {
    m.mark_address_taken(func);
    let holder = m.add_function(holder_name, SRC);
    let bb = m.add_block(holder, "entry");
    let table = m.add_global(format!("{}_ops", holder_name.replace('.', "_")), "ptr");
    let tv = m.global_value(table);
    let fv = m.func_value(func);
    m.add_inst(bb, Opcode::Store, vec![fv, tv], "void", None);
}

/// `load p; call <callee>(load)` at one line; returns (load inst, call inst).
pub fn load_and_call(
    m: &mut ModuleIr,
    bb: patchspec_ir::shared::models::ir::BlockId,
    pointer: ValueId,
    callee: FuncId,
    line: u32,
) -> (InstId, InstId) {
    let load = m.add_inst(bb, Opcode::Load, vec![pointer], "ptr", dbg(SRC, line));
    let load_v = m.inst(load).value;
    let cv = m.func_value(callee);
    let call = m.add_inst(bb, Opcode::Call, vec![cv, load_v], "void", dbg(SRC, line));
    (load, call)
}

/// SEG for one variant of the teardown/release shape: argument node, one
/// load-mem node per load, one call site per call consuming the load.
pub fn seg_arg_loads_calls(
    m: &ModuleIr,
    seg: &mut SegModule,
    func: FuncId,
    pointer: ValueId,
    loads_calls: &[(InstId, InstId, FuncId)],
) -> (SegNodeId, Vec<SegNodeId>, Vec<SegSiteId>) {
    let arg = seg.add_node(func, SegNodeKind::CommonArgument { index: 0 }, Some(pointer), "ptr");
    let mut load_nodes = Vec::new();
    let mut sites = Vec::new();
    for (load, call, callee) in loads_calls {
        let load_v = m.inst(*load).value;
        let node = seg.add_node(func, SegNodeKind::LoadMem { load: *load }, Some(load_v), "ptr");
        seg.connect(node, arg);
        let site = seg.add_site(
            func,
            *call,
            SegSiteKind::Call {
                callee: Some(*callee),
                callee_value: None,
                indirect: false,
                common_inputs: vec![node],
                common_output: None,
                pseudo_inputs: vec![],
                pseudo_outputs: vec![],
            },
        );
        load_nodes.push(node);
        sites.push(site);
    }
    (arg, load_nodes, sites)
}

/// Scenario 1: pre-patch `probe` always returns 0; the patch inserts
/// `if (bad) return -EINVAL;`.
pub fn error_code_image() -> ModuleImage {
    let mut m = ModuleIr::new();

    // before variant: return 0
    let fb = m.add_function("before.patch.probe", SRC);
    let eb = m.add_block(fb, "entry");
    let _bad_b = m.add_argument(fb, "bad", "i32");
    let zero_b = m.const_int(0, "i32");
    let ret_b = m.add_inst(eb, Opcode::Ret, vec![zero_b], "void", dbg(SRC, 12));
    make_indirect(&mut m, fb, "before.patch.init");

    // after variant: if (bad) return -EINVAL; return 0
    let fa = m.add_function("after.patch.probe", SRC);
    let entry = m.add_block(fa, "entry");
    let then_bb = m.add_block(fa, "if.then");
    let end_bb = m.add_block(fa, "if.end");
    m.add_edge(entry, then_bb);
    m.add_edge(entry, end_bb);
    m.add_edge(then_bb, end_bb);
    let bad_a = m.add_argument(fa, "bad", "i32");
    let zero_a = m.const_int(0, "i32");
    let icmp = m.add_inst(entry, Opcode::Icmp(IcmpPred::Ne), vec![bad_a, zero_a], "i1", dbg(SRC, 11));
    let icmp_v = m.inst(icmp).value;
    let tv = m.block_value(then_bb);
    let ev = m.block_value(end_bb);
    m.add_inst(entry, Opcode::CondBr, vec![icmp_v, tv, ev], "void", dbg(SRC, 11));
    let ev2 = m.block_value(end_bb);
    m.add_inst(then_bb, Opcode::Br, vec![ev2], "void", dbg(SRC, 12));
    let e22 = m.const_int(-22, "i32");
    let phi = m.add_inst(end_bb, Opcode::Phi, vec![e22, zero_a], "i32", dbg(SRC, 12));
    m.set_phi_blocks(phi, vec![then_bb, entry]);
    let phi_v = m.inst(phi).value;
    let ret_a = m.add_inst(end_bb, Opcode::Ret, vec![phi_v], "void", dbg(SRC, 13));
    make_indirect(&mut m, fa, "after.patch.init");

    let mut seg = SegModule::new();
    // before graph: return of the zero constant
    let zero_b_n = seg.add_node(fb, SegNodeKind::SimpleOperand, Some(zero_b), "i32");
    let ret_b_n = seg.add_node(fb, SegNodeKind::CommonReturn, None, "i32");
    seg.connect(ret_b_n, zero_b_n);
    seg.add_site(fb, ret_b, SegSiteKind::Return { returned: Some(zero_b_n) });

    // after graph
    let bad_n = seg.add_node(fa, SegNodeKind::CommonArgument { index: 0 }, Some(bad_a), "i32");
    let zero_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(zero_a), "i32");
    let icmp_op = seg.add_node(fa, SegNodeKind::Opcode(patchspec_ir::shared::models::OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
    let icmp_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(icmp_v), "i1");
    seg.connect(icmp_op, bad_n);
    seg.connect(icmp_op, zero_n);
    seg.connect(icmp_n, icmp_op);

    let e22_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(e22), "i32");
    seg.set_block(e22_n, then_bb);
    let phi_n = seg.add_node(
        fa,
        SegNodeKind::Phi {
            incomings: vec![
                PhiIncoming { value: e22_n, block: then_bb },
                PhiIncoming { value: zero_n, block: entry },
            ],
        },
        Some(phi_v),
        "i32",
    );
    seg.connect(phi_n, e22_n);
    seg.connect(phi_n, zero_n);
    let ret_n = seg.add_node(fa, SegNodeKind::CommonReturn, None, "i32");
    seg.connect(ret_n, phi_n);
    seg.add_site(fa, ret_a, SegSiteKind::Return { returned: Some(phi_n) });

    ModuleImage { ir: m, seg }
}

/// Scenario 3: `mutex_unlock(p); kfree(p);` swapped to `kfree(p);
/// mutex_unlock(p);`.
pub fn order_swap_image() -> ModuleImage {
    let mut m = ModuleIr::new();
    let unlock = m.add_declaration("mutex_unlock");
    let kfree = m.add_declaration("kfree");

    let fb = m.add_function("before.patch.teardown", SRC);
    let eb = m.add_block(fb, "entry");
    let p_b = m.add_argument(fb, "p", "ptr");
    let (lb1, cb1) = load_and_call(&mut m, eb, p_b, unlock, 5);
    let (lb2, cb2) = load_and_call(&mut m, eb, p_b, kfree, 6);
    m.add_inst(eb, Opcode::Ret, vec![], "void", dbg(SRC, 7));
    make_indirect(&mut m, fb, "before.patch.init");

    let fa = m.add_function("after.patch.teardown", SRC);
    let ea = m.add_block(fa, "entry");
    let p_a = m.add_argument(fa, "p", "ptr");
    let (la1, ca1) = load_and_call(&mut m, ea, p_a, kfree, 5);
    let (la2, ca2) = load_and_call(&mut m, ea, p_a, unlock, 6);
    m.add_inst(ea, Opcode::Ret, vec![], "void", dbg(SRC, 7));
    make_indirect(&mut m, fa, "after.patch.init");

    let mut seg = SegModule::new();
    seg_arg_loads_calls(&m, &mut seg, fb, p_b, &[(lb1, cb1, unlock), (lb2, cb2, kfree)]);
    seg_arg_loads_calls(&m, &mut seg, fa, p_a, &[(la1, ca1, kfree), (la2, ca2, unlock)]);

    ModuleImage { ir: m, seg }
}

/// Scenario 4: `if (d != 0) r = n / d;` loses its guard.
pub fn sensitive_op_image() -> ModuleImage {
    let mut m = ModuleIr::new();

    // before: guarded division
    let fb = m.add_function("before.patch.calc", SRC);
    let entry_b = m.add_block(fb, "entry");
    let then_b = m.add_block(fb, "if.then");
    let end_b = m.add_block(fb, "if.end");
    m.add_edge(entry_b, then_b);
    m.add_edge(entry_b, end_b);
    m.add_edge(then_b, end_b);
    let n_b = m.add_argument(fb, "n", "i32");
    let d_b = m.add_argument(fb, "d", "i32");
    let zero_b = m.const_int(0, "i32");
    let icmp_b = m.add_inst(entry_b, Opcode::Icmp(IcmpPred::Ne), vec![d_b, zero_b], "i1", dbg(SRC, 5));
    let icmp_b_v = m.inst(icmp_b).value;
    let tv = m.block_value(then_b);
    let ev = m.block_value(end_b);
    m.add_inst(entry_b, Opcode::CondBr, vec![icmp_b_v, tv, ev], "void", dbg(SRC, 5));
    let div_b = m.add_inst(
        then_b,
        Opcode::BinOp(patchspec_ir::shared::models::ir::BinOp::SDiv),
        vec![n_b, d_b],
        "i32",
        dbg(SRC, 6),
    );
    let ev2 = m.block_value(end_b);
    m.add_inst(then_b, Opcode::Br, vec![ev2], "void", dbg(SRC, 6));
    m.add_inst(end_b, Opcode::Ret, vec![], "void", dbg(SRC, 7));
    make_indirect(&mut m, fb, "before.patch.init");

    // after: unguarded division, result returned
    let fa = m.add_function("after.patch.calc", SRC);
    let entry_a = m.add_block(fa, "entry");
    let n_a = m.add_argument(fa, "n", "i32");
    let d_a = m.add_argument(fa, "d", "i32");
    let div_a = m.add_inst(
        entry_a,
        Opcode::BinOp(patchspec_ir::shared::models::ir::BinOp::SDiv),
        vec![n_a, d_a],
        "i32",
        dbg(SRC, 5),
    );
    let div_a_v = m.inst(div_a).value;
    let ret_a = m.add_inst(entry_a, Opcode::Ret, vec![div_a_v], "void", dbg(SRC, 6));
    make_indirect(&mut m, fa, "after.patch.init");

    let mut seg = SegModule::new();
    use patchspec_ir::shared::models::OpcodeKind;

    // before graph
    let n_b_n = seg.add_node(fb, SegNodeKind::CommonArgument { index: 0 }, Some(n_b), "i32");
    let d_b_n = seg.add_node(fb, SegNodeKind::CommonArgument { index: 1 }, Some(d_b), "i32");
    let zero_b_n = seg.add_node(fb, SegNodeKind::SimpleOperand, Some(zero_b), "i32");
    let icmp_b_op = seg.add_node(fb, SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
    let icmp_b_n = seg.add_node(fb, SegNodeKind::SimpleOperand, Some(icmp_b_v), "i1");
    seg.connect(icmp_b_op, d_b_n);
    seg.connect(icmp_b_op, zero_b_n);
    seg.connect(icmp_b_n, icmp_b_op);
    let div_b_op = seg.add_node(
        fb,
        SegNodeKind::Opcode(OpcodeKind::Binary(patchspec_ir::shared::models::ir::BinOp::SDiv)),
        None,
        "i32",
    );
    let div_b_v = m.inst(div_b).value;
    let div_b_n = seg.add_node(fb, SegNodeKind::SimpleOperand, Some(div_b_v), "i32");
    seg.connect(div_b_op, n_b_n);
    seg.connect(div_b_op, d_b_n);
    seg.connect(div_b_n, div_b_op);
    seg.add_site(fb, div_b, SegSiteKind::Div { denominator: d_b_n });

    // after graph
    let n_a_n = seg.add_node(fa, SegNodeKind::CommonArgument { index: 0 }, Some(n_a), "i32");
    let d_a_n = seg.add_node(fa, SegNodeKind::CommonArgument { index: 1 }, Some(d_a), "i32");
    let div_a_op = seg.add_node(
        fa,
        SegNodeKind::Opcode(OpcodeKind::Binary(patchspec_ir::shared::models::ir::BinOp::SDiv)),
        None,
        "i32",
    );
    let div_a_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(div_a_v), "i32");
    seg.connect(div_a_op, n_a_n);
    seg.connect(div_a_op, d_a_n);
    seg.connect(div_a_n, div_a_op);
    let ret_a_n = seg.add_node(fa, SegNodeKind::CommonReturn, None, "i32");
    seg.connect(ret_a_n, div_a_n);
    seg.add_site(fa, div_a, SegSiteKind::Div { denominator: d_a_n });
    seg.add_site(fa, ret_a, SegSiteKind::Return { returned: Some(div_a_n) });

    ModuleImage { ir: m, seg }
}

/// One `return bad ? -EINVAL : 0` variant; `swap` reverses the phi arms.
fn probe_variant(m: &mut ModuleIr, seg: &mut SegModule, name: &str, swap: bool) -> FuncId {
    let f = m.add_function(name, SRC);
    let entry = m.add_block(f, "entry");
    let then_bb = m.add_block(f, "if.then");
    let end_bb = m.add_block(f, "if.end");
    m.add_edge(entry, then_bb);
    m.add_edge(entry, end_bb);
    m.add_edge(then_bb, end_bb);
    let bad = m.add_argument(f, "bad", "i32");
    let zero = m.const_int(0, "i32");
    let icmp = m.add_inst(entry, Opcode::Icmp(IcmpPred::Ne), vec![bad, zero], "i1", dbg(SRC, 11));
    let icmp_v = m.inst(icmp).value;
    let tv = m.block_value(then_bb);
    let ev = m.block_value(end_bb);
    m.add_inst(entry, Opcode::CondBr, vec![icmp_v, tv, ev], "void", dbg(SRC, 11));
    let ev2 = m.block_value(end_bb);
    m.add_inst(then_bb, Opcode::Br, vec![ev2], "void", dbg(SRC, 12));
    let e22 = m.const_int(-22, "i32");
    let (ops, blocks) = if swap {
        (vec![zero, e22], vec![entry, then_bb])
    } else {
        (vec![e22, zero], vec![then_bb, entry])
    };
    let phi = m.add_inst(end_bb, Opcode::Phi, ops, "i32", dbg(SRC, 12));
    m.set_phi_blocks(phi, blocks);
    let phi_v = m.inst(phi).value;
    let ret = m.add_inst(end_bb, Opcode::Ret, vec![phi_v], "void", dbg(SRC, 13));

    use patchspec_ir::shared::models::OpcodeKind;
    let bad_n = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(bad), "i32");
    let zero_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");
    let icmp_op = seg.add_node(f, SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)), None, "i1");
    let icmp_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(icmp_v), "i1");
    seg.connect(icmp_op, bad_n);
    seg.connect(icmp_op, zero_n);
    seg.connect(icmp_n, icmp_op);
    let e22_n = seg.add_node(f, SegNodeKind::SimpleOperand, Some(e22), "i32");
    seg.set_block(e22_n, then_bb);
    let incomings = if swap {
        vec![
            PhiIncoming { value: zero_n, block: entry },
            PhiIncoming { value: e22_n, block: then_bb },
        ]
    } else {
        vec![
            PhiIncoming { value: e22_n, block: then_bb },
            PhiIncoming { value: zero_n, block: entry },
        ]
    };
    let phi_n = seg.add_node(f, SegNodeKind::Phi { incomings }, Some(phi_v), "i32");
    seg.connect(phi_n, e22_n);
    seg.connect(phi_n, zero_n);
    let ret_n = seg.add_node(f, SegNodeKind::CommonReturn, None, "i32");
    seg.connect(ret_n, phi_n);
    seg.add_site(f, ret, SegSiteKind::Return { returned: Some(phi_n) });
    f
}

/// Scenario 6: both variants return `bad ? -EINVAL : 0`, with the phi arms
/// listed in opposite order.
pub fn phi_reshuffle_image() -> ModuleImage {
    let mut m = ModuleIr::new();
    let mut seg = SegModule::new();
    let fb = probe_variant(&mut m, &mut seg, "before.patch.probe", false);
    let fa = probe_variant(&mut m, &mut seg, "after.patch.probe", true);
    make_indirect(&mut m, fb, "before.patch.init");
    make_indirect(&mut m, fa, "after.patch.init");
    ModuleImage { ir: m, seg }
}

/// Scenario 5: both variants are byte-for-byte the same shape; a diff that
/// touches nothing must leave every instruction matched and emit nothing.
pub fn identical_probe_image() -> ModuleImage {
    let mut m = ModuleIr::new();
    let mut seg = SegModule::new();
    let fb = probe_variant(&mut m, &mut seg, "before.patch.probe", false);
    let fa = probe_variant(&mut m, &mut seg, "after.patch.probe", false);
    make_indirect(&mut m, fb, "before.patch.init");
    make_indirect(&mut m, fa, "after.patch.init");
    ModuleImage { ir: m, seg }
}

/// Scenario 2: unconditional `kfree(p)` gains a `p != NULL` guard.
pub fn cond_tightened_image() -> ModuleImage {
    let mut m = ModuleIr::new();
    let kfree = m.add_declaration("kfree");

    let fb = m.add_function("before.patch.release", SRC);
    let eb = m.add_block(fb, "entry");
    let p_b = m.add_argument(fb, "p", "ptr");
    let (lb, cb) = load_and_call(&mut m, eb, p_b, kfree, 5);
    m.add_inst(eb, Opcode::Ret, vec![], "void", dbg(SRC, 6));
    make_indirect(&mut m, fb, "before.patch.init");

    let fa = m.add_function("after.patch.release", SRC);
    let entry = m.add_block(fa, "entry");
    let then_bb = m.add_block(fa, "if.then");
    let end_bb = m.add_block(fa, "if.end");
    m.add_edge(entry, then_bb);
    m.add_edge(entry, end_bb);
    m.add_edge(then_bb, end_bb);
    let p_a = m.add_argument(fa, "p", "ptr");
    let null = m.const_null("ptr");
    let icmp = m.add_inst(entry, Opcode::Icmp(IcmpPred::Ne), vec![p_a, null], "i1", dbg(SRC, 5));
    let icmp_v = m.inst(icmp).value;
    let tv = m.block_value(then_bb);
    let ev = m.block_value(end_bb);
    m.add_inst(entry, Opcode::CondBr, vec![icmp_v, tv, ev], "void", dbg(SRC, 5));
    let (la, ca) = load_and_call(&mut m, then_bb, p_a, kfree, 6);
    let ev2 = m.block_value(end_bb);
    m.add_inst(then_bb, Opcode::Br, vec![ev2], "void", dbg(SRC, 6));
    m.add_inst(end_bb, Opcode::Ret, vec![], "void", dbg(SRC, 7));
    make_indirect(&mut m, fa, "after.patch.init");

    let mut seg = SegModule::new();
    seg_arg_loads_calls(&m, &mut seg, fb, p_b, &[(lb, cb, kfree)]);
    let (arg_a, _loads, _sites) =
        seg_arg_loads_calls(&m, &mut seg, fa, p_a, &[(la, ca, kfree)]);

    // guard: icmp ne p, null
    let null_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(null), "ptr");
    let icmp_op = seg.add_node(
        fa,
        SegNodeKind::Opcode(patchspec_ir::shared::models::OpcodeKind::Icmp(IcmpPred::Ne)),
        None,
        "i1",
    );
    let icmp_n = seg.add_node(fa, SegNodeKind::SimpleOperand, Some(icmp_v), "i1");
    seg.connect(icmp_op, arg_a);
    seg.connect(icmp_op, null_n);
    seg.connect(icmp_n, icmp_op);

    ModuleImage { ir: m, seg }
}
