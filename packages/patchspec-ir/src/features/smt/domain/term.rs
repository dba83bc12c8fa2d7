//! SMT term language
//!
//! Small first-order fragment shared by the condition engine and the spec
//! side files: integer variables/constants, comparisons, arithmetic, and the
//! boolean connectives the condition trees compile into.

use crate::shared::models::ir::{BinOp, IcmpPred};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SmtTerm {
    IntVar(String),
    IntConst(i64),
    BoolConst(bool),
    /// Integer equality
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    /// Integer comparison under a predicate
    Cmp(IcmpPred, Box<SmtTerm>, Box<SmtTerm>),
    /// Integer arithmetic
    BinOp(BinOp, Box<SmtTerm>, Box<SmtTerm>),
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Xor(Box<SmtTerm>, Box<SmtTerm>),
    Iff(Box<SmtTerm>, Box<SmtTerm>),
}

impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::IntVar(name.into())
    }

    pub fn int(value: i64) -> Self {
        SmtTerm::IntConst(value)
    }

    pub fn eq(lhs: SmtTerm, rhs: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmp(pred: IcmpPred, lhs: SmtTerm, rhs: SmtTerm) -> Self {
        SmtTerm::Cmp(pred, Box::new(lhs), Box::new(rhs))
    }

    pub fn binop(op: BinOp, lhs: SmtTerm, rhs: SmtTerm) -> Self {
        SmtTerm::BinOp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn not(term: SmtTerm) -> Self {
        SmtTerm::Not(Box::new(term))
    }

    pub fn xor(lhs: SmtTerm, rhs: SmtTerm) -> Self {
        SmtTerm::Xor(Box::new(lhs), Box::new(rhs))
    }

    pub fn iff(lhs: SmtTerm, rhs: SmtTerm) -> Self {
        SmtTerm::Iff(Box::new(lhs), Box::new(rhs))
    }

    /// n-ary conjunction; empty becomes `true`, singleton unwraps.
    pub fn and(mut terms: Vec<SmtTerm>) -> Self {
        match terms.len() {
            0 => SmtTerm::BoolConst(true),
            1 => terms.remove(0),
            _ => SmtTerm::And(terms),
        }
    }

    /// n-ary disjunction; empty becomes `false`, singleton unwraps.
    pub fn or(mut terms: Vec<SmtTerm>) -> Self {
        match terms.len() {
            0 => SmtTerm::BoolConst(false),
            1 => terms.remove(0),
            _ => SmtTerm::Or(terms),
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            SmtTerm::BoolConst(_)
                | SmtTerm::Eq(..)
                | SmtTerm::Cmp(..)
                | SmtTerm::And(_)
                | SmtTerm::Or(_)
                | SmtTerm::Not(_)
                | SmtTerm::Xor(..)
                | SmtTerm::Iff(..)
        )
    }

    /// All integer variable names, in first-occurrence order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            SmtTerm::IntVar(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            SmtTerm::IntConst(_) | SmtTerm::BoolConst(_) => {}
            SmtTerm::Eq(a, b)
            | SmtTerm::Cmp(_, a, b)
            | SmtTerm::BinOp(_, a, b)
            | SmtTerm::Xor(a, b)
            | SmtTerm::Iff(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            SmtTerm::And(terms) | SmtTerm::Or(terms) => {
                for t in terms {
                    t.collect_variables(out);
                }
            }
            SmtTerm::Not(t) => t.collect_variables(out),
        }
    }
}

impl fmt::Display for SmtTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", super::super::infrastructure::smtlib::print_term(self))
    }
}

/// Outcome of a satisfiability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtVerdict {
    Sat,
    Unsat,
    /// Budget or timeout exhausted; callers must treat this conservatively
    Unknown,
}

impl SmtVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtVerdict::Sat => "sat",
            SmtVerdict::Unsat => "unsat",
            SmtVerdict::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_or_unwrap() {
        assert_eq!(SmtTerm::and(vec![]), SmtTerm::BoolConst(true));
        assert_eq!(SmtTerm::or(vec![]), SmtTerm::BoolConst(false));
        let v = SmtTerm::var("x");
        assert_eq!(SmtTerm::and(vec![v.clone()]), v);
    }

    #[test]
    fn test_variables_dedup_in_order() {
        let t = SmtTerm::and(vec![
            SmtTerm::eq(SmtTerm::var("a"), SmtTerm::var("b")),
            SmtTerm::cmp(IcmpPred::Slt, SmtTerm::var("a"), SmtTerm::int(4)),
        ]);
        assert_eq!(t.variables(), vec!["a", "b"]);
    }
}
