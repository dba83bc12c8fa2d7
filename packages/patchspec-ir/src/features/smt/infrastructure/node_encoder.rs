//! SEG node → SMT term encoding
//!
//! Every SEG node gets a stable integer variable; opcode nodes additionally
//! get a defining equation over their operand variables. Comparison nodes are
//! encoded as `var = 1 ⇔ cmp(pred, lhs, rhs)` so condition trees can assert
//! `var = 1` for a taken branch.

use super::super::domain::term::SmtTerm;
use crate::shared::models::ir::ValueKind;
use crate::shared::models::{ModuleIr, OpcodeKind, SegModule, SegNodeId, SegNodeKind};

/// Stable symbol for a node's integer variable.
pub fn symbol_for(node: SegNodeId) -> String {
    format!("n{}", node.0)
}

/// The integer variable standing for a node's value.
pub fn expr_for_node(node: SegNodeId) -> SmtTerm {
    SmtTerm::var(symbol_for(node))
}

/// Operand term: constants fold to literals, everything else to its variable.
pub fn operand_term(module: &ModuleIr, seg: &SegModule, node: SegNodeId) -> SmtTerm {
    if let Some(value) = seg.node(node).dbg_value {
        match module.value(value).kind {
            ValueKind::ConstInt(c) => return SmtTerm::int(c),
            ValueKind::ConstNull => return SmtTerm::int(0),
            _ => {}
        }
    }
    expr_for_node(node)
}

/// Defining equation of an opcode node over its operands; `None` for operand
/// nodes (they have no defining equation of their own).
pub fn encode_opcode(module: &ModuleIr, seg: &SegModule, node: SegNodeId) -> Option<SmtTerm> {
    let n = seg.node(node);
    let opcode = match &n.kind {
        SegNodeKind::Opcode(op) => *op,
        _ => return None,
    };
    let child = |i: usize| n.children.get(i).map(|c| operand_term(module, seg, *c));
    match opcode {
        OpcodeKind::Binary(op) => {
            let lhs = child(0)?;
            let rhs = child(1)?;
            Some(SmtTerm::eq(
                expr_for_node(node),
                SmtTerm::binop(op, lhs, rhs),
            ))
        }
        OpcodeKind::Icmp(pred) => {
            let lhs = child(0)?;
            let rhs = child(1)?;
            Some(encode_compare_terms(node, pred, lhs, rhs))
        }
        // value-preserving approximations: the result carries its first
        // operand's value
        OpcodeKind::Cast
        | OpcodeKind::Gep
        | OpcodeKind::Select
        | OpcodeKind::Concat
        | OpcodeKind::ExtractElement
        | OpcodeKind::InsertElement => {
            let src = child(0)?;
            Some(SmtTerm::eq(expr_for_node(node), src))
        }
    }
}

/// `var(icmp) = 1 ⇔ pred(lhs, rhs)`
pub fn encode_compare_terms(
    node: SegNodeId,
    pred: crate::shared::models::ir::IcmpPred,
    lhs: SmtTerm,
    rhs: SmtTerm,
) -> SmtTerm {
    SmtTerm::iff(
        SmtTerm::eq(expr_for_node(node), SmtTerm::int(1)),
        SmtTerm::cmp(pred, lhs, rhs),
    )
}

/// The boolean assertion for a taken comparison: `var(icmp) = 1`.
pub fn taken_term(node: SegNodeId) -> SmtTerm {
    SmtTerm::eq(expr_for_node(node), SmtTerm::int(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::smt::domain::term::SmtVerdict;
    use crate::features::smt::infrastructure::solver::{BoundedSolver, SmtSolver};
    use crate::shared::models::ir::IcmpPred;
    use crate::shared::models::SegNodeKind;

    #[test]
    fn test_icmp_encoding_forces_operand() {
        let mut module = ModuleIr::new();
        let f = module.add_function("before.patch.f", "a.c");
        let arg = module.add_argument(f, "bad", "i32");
        let zero = module.const_int(0, "i32");

        let mut seg = SegModule::new();
        let argn = seg.add_node(f, SegNodeKind::CommonArgument { index: 0 }, Some(arg), "i32");
        let zn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(zero), "i32");
        let icmp = seg.add_node(
            f,
            SegNodeKind::Opcode(OpcodeKind::Icmp(IcmpPred::Ne)),
            None,
            "i1",
        );
        seg.connect(icmp, argn);
        seg.connect(icmp, zn);

        let defining = encode_opcode(&module, &seg, icmp).unwrap();

        // taken icmp plus bad = 0 is contradictory
        let mut solver = BoundedSolver::new();
        solver.add(defining);
        solver.add(taken_term(icmp));
        solver.add(SmtTerm::eq(expr_for_node(argn), SmtTerm::int(0)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_constant_operand_folds() {
        let mut module = ModuleIr::new();
        let f = module.add_function("before.patch.f", "a.c");
        let c = module.const_int(3, "i32");
        let mut seg = SegModule::new();
        let cn = seg.add_node(f, SegNodeKind::SimpleOperand, Some(c), "i32");
        assert_eq!(operand_term(&module, &seg, cn), SmtTerm::int(3));
    }
}
