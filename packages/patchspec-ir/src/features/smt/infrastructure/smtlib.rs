//! SMT-LIB2 printing and parsing
//!
//! Prints the assertion stack as a self-contained script and parses the same
//! subset back. The spec side files (`*.smt`) round-trip through this module;
//! satisfiability must be preserved across the round trip.
//!
//! Bitwise operators have no Int-sorted builtin, so they print as declared
//! uninterpreted functions (`bvand`, `bvshl`, ...) and parse back to the
//! corresponding `BinOp`.

use super::super::domain::term::SmtTerm;
use crate::shared::models::ir::{BinOp, IcmpPred};
use crate::shared::models::{PatchSpecError, Result};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Print a full script: declarations, assertions, `(check-sat)`.
pub fn print_script(assertions: &[SmtTerm]) -> String {
    let mut vars = BTreeSet::new();
    let mut funcs = BTreeSet::new();
    for term in assertions {
        collect_decls(term, &mut vars, &mut funcs);
    }

    let mut out = String::new();
    for func in &funcs {
        let _ = writeln!(out, "(declare-fun {} (Int Int) Int)", func);
    }
    for var in &vars {
        let _ = writeln!(out, "(declare-const {} Int)", var);
    }
    for term in assertions {
        let _ = writeln!(out, "(assert {})", print_term(term));
    }
    out.push_str("(check-sat)\n");
    out
}

fn collect_decls(term: &SmtTerm, vars: &mut BTreeSet<String>, funcs: &mut BTreeSet<&'static str>) {
    match term {
        SmtTerm::IntVar(name) => {
            vars.insert(name.clone());
        }
        SmtTerm::IntConst(_) | SmtTerm::BoolConst(_) => {}
        SmtTerm::BinOp(op, a, b) => {
            if let Some(f) = uninterpreted_name(*op) {
                funcs.insert(f);
            }
            collect_decls(a, vars, funcs);
            collect_decls(b, vars, funcs);
        }
        SmtTerm::Eq(a, b) | SmtTerm::Cmp(_, a, b) | SmtTerm::Xor(a, b) | SmtTerm::Iff(a, b) => {
            collect_decls(a, vars, funcs);
            collect_decls(b, vars, funcs);
        }
        SmtTerm::And(ts) | SmtTerm::Or(ts) => {
            for t in ts {
                collect_decls(t, vars, funcs);
            }
        }
        SmtTerm::Not(t) => collect_decls(t, vars, funcs),
    }
}

fn uninterpreted_name(op: BinOp) -> Option<&'static str> {
    match op {
        BinOp::And => Some("bvand"),
        BinOp::Or => Some("bvor"),
        BinOp::Xor => Some("bvxor"),
        BinOp::Shl => Some("bvshl"),
        BinOp::LShr => Some("bvlshr"),
        BinOp::AShr => Some("bvashr"),
        _ => None,
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::SDiv | BinOp::UDiv => "div",
        BinOp::SRem | BinOp::URem => "mod",
        BinOp::And => "bvand",
        BinOp::Or => "bvor",
        BinOp::Xor => "bvxor",
        BinOp::Shl => "bvshl",
        BinOp::LShr => "bvlshr",
        BinOp::AShr => "bvashr",
    }
}

pub fn print_term(term: &SmtTerm) -> String {
    match term {
        SmtTerm::IntVar(name) => name.clone(),
        SmtTerm::IntConst(c) => {
            if *c < 0 {
                format!("(- {})", -c)
            } else {
                format!("{}", c)
            }
        }
        SmtTerm::BoolConst(b) => format!("{}", b),
        SmtTerm::Eq(a, b) => format!("(= {} {})", print_term(a), print_term(b)),
        SmtTerm::Cmp(pred, a, b) => match pred {
            IcmpPred::Eq => format!("(= {} {})", print_term(a), print_term(b)),
            IcmpPred::Ne => format!("(distinct {} {})", print_term(a), print_term(b)),
            _ => format!("({} {} {})", pred.symbol(), print_term(a), print_term(b)),
        },
        SmtTerm::BinOp(op, a, b) => {
            format!("({} {} {})", binop_symbol(*op), print_term(a), print_term(b))
        }
        SmtTerm::And(ts) => nary("and", ts),
        SmtTerm::Or(ts) => nary("or", ts),
        SmtTerm::Not(t) => format!("(not {})", print_term(t)),
        SmtTerm::Xor(a, b) => format!("(xor {} {})", print_term(a), print_term(b)),
        SmtTerm::Iff(a, b) => format!("(= {} {})", print_term(a), print_term(b)),
    }
}

fn nary(op: &str, terms: &[SmtTerm]) -> String {
    let mut out = format!("({}", op);
    for t in terms {
        out.push(' ');
        out.push_str(&print_term(t));
    }
    out.push(')');
    out
}

// ──────────────────────────────────────────────────────────────────────────
// Parsing
// ──────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
                tokens.push(c.to_string());
            }
            ';' => {
                // comment to end of line
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

fn parse_sexp(tokens: &[String], pos: &mut usize) -> Result<Sexp> {
    if *pos >= tokens.len() {
        return Err(PatchSpecError::spec_malformed("unexpected end of SMT input"));
    }
    let tok = &tokens[*pos];
    *pos += 1;
    if tok == "(" {
        let mut items = Vec::new();
        while *pos < tokens.len() && tokens[*pos] != ")" {
            items.push(parse_sexp(tokens, pos)?);
        }
        if *pos >= tokens.len() {
            return Err(PatchSpecError::spec_malformed("unbalanced SMT parenthesis"));
        }
        *pos += 1; // consume ')'
        Ok(Sexp::List(items))
    } else if tok == ")" {
        Err(PatchSpecError::spec_malformed("stray closing parenthesis"))
    } else {
        Ok(Sexp::Atom(tok.clone()))
    }
}

/// Parse a script produced by [`print_script`]; returns the asserted terms.
pub fn parse_script(input: &str) -> Result<Vec<SmtTerm>> {
    let tokens = tokenize(input);
    let mut pos = 0;
    let mut assertions = Vec::new();
    while pos < tokens.len() {
        let sexp = parse_sexp(&tokens, &mut pos)?;
        let items = match sexp {
            Sexp::List(items) => items,
            Sexp::Atom(a) => {
                return Err(PatchSpecError::spec_malformed(format!(
                    "top-level atom in SMT script: {}",
                    a
                )))
            }
        };
        match items.first() {
            Some(Sexp::Atom(head)) if head == "assert" => {
                let body = items.get(1).ok_or_else(|| {
                    PatchSpecError::spec_malformed("assert without a body")
                })?;
                assertions.push(term_from_sexp(body)?);
            }
            Some(Sexp::Atom(head))
                if head == "declare-const"
                    || head == "declare-fun"
                    || head == "set-logic"
                    || head == "check-sat" => {}
            Some(Sexp::Atom(head)) => {
                return Err(PatchSpecError::spec_malformed(format!(
                    "unsupported SMT command: {}",
                    head
                )))
            }
            _ => return Err(PatchSpecError::spec_malformed("empty SMT command")),
        }
    }
    Ok(assertions)
}

fn binop_from_symbol(sym: &str) -> Option<BinOp> {
    match sym {
        "+" => Some(BinOp::Add),
        "-" => Some(BinOp::Sub),
        "*" => Some(BinOp::Mul),
        "div" => Some(BinOp::SDiv),
        "mod" => Some(BinOp::SRem),
        "bvand" => Some(BinOp::And),
        "bvor" => Some(BinOp::Or),
        "bvxor" => Some(BinOp::Xor),
        "bvshl" => Some(BinOp::Shl),
        "bvlshr" => Some(BinOp::LShr),
        "bvashr" => Some(BinOp::AShr),
        _ => None,
    }
}

fn term_from_sexp(sexp: &Sexp) -> Result<SmtTerm> {
    match sexp {
        Sexp::Atom(a) => {
            if a == "true" {
                Ok(SmtTerm::BoolConst(true))
            } else if a == "false" {
                Ok(SmtTerm::BoolConst(false))
            } else if let Ok(n) = a.parse::<i64>() {
                Ok(SmtTerm::IntConst(n))
            } else {
                Ok(SmtTerm::IntVar(a.clone()))
            }
        }
        Sexp::List(items) => {
            let head = match items.first() {
                Some(Sexp::Atom(h)) => h.as_str(),
                _ => return Err(PatchSpecError::spec_malformed("non-atomic operator")),
            };
            let args: Vec<SmtTerm> = items[1..]
                .iter()
                .map(term_from_sexp)
                .collect::<Result<_>>()?;
            match head {
                "and" => Ok(SmtTerm::and(args)),
                "or" => Ok(SmtTerm::or(args)),
                "not" => {
                    let [a] = take_args::<1>(args, "not")?;
                    Ok(SmtTerm::not(a))
                }
                "xor" => {
                    let [a, b] = take_args::<2>(args, "xor")?;
                    Ok(SmtTerm::xor(a, b))
                }
                "=" => {
                    let [a, b] = take_args::<2>(args, "=")?;
                    if a.is_bool() && b.is_bool() {
                        Ok(SmtTerm::iff(a, b))
                    } else {
                        Ok(SmtTerm::eq(a, b))
                    }
                }
                "distinct" => {
                    let [a, b] = take_args::<2>(args, "distinct")?;
                    Ok(SmtTerm::cmp(IcmpPred::Ne, a, b))
                }
                "<" => cmp_from(IcmpPred::Slt, args),
                "<=" => cmp_from(IcmpPred::Sle, args),
                ">" => cmp_from(IcmpPred::Sgt, args),
                ">=" => cmp_from(IcmpPred::Sge, args),
                "-" if args.len() == 1 => {
                    // unary negation of a literal
                    match &args[0] {
                        SmtTerm::IntConst(c) => Ok(SmtTerm::IntConst(-c)),
                        other => Ok(SmtTerm::binop(
                            BinOp::Sub,
                            SmtTerm::int(0),
                            other.clone(),
                        )),
                    }
                }
                sym => {
                    if let Some(op) = binop_from_symbol(sym) {
                        let [a, b] = take_args::<2>(args, sym)?;
                        Ok(SmtTerm::binop(op, a, b))
                    } else {
                        Err(PatchSpecError::spec_malformed(format!(
                            "unsupported SMT operator: {}",
                            sym
                        )))
                    }
                }
            }
        }
    }
}

fn cmp_from(pred: IcmpPred, args: Vec<SmtTerm>) -> Result<SmtTerm> {
    let [a, b] = take_args::<2>(args, pred.symbol())?;
    Ok(SmtTerm::cmp(pred, a, b))
}

fn take_args<const N: usize>(args: Vec<SmtTerm>, op: &str) -> Result<[SmtTerm; N]> {
    args.try_into().map_err(|_| {
        PatchSpecError::spec_malformed(format!("wrong arity for SMT operator {}", op))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::smt::infrastructure::solver::{BoundedSolver, SmtSolver};
    use crate::features::smt::domain::term::SmtVerdict;

    fn roundtrip(terms: Vec<SmtTerm>) -> Vec<SmtTerm> {
        parse_script(&print_script(&terms)).expect("roundtrip")
    }

    #[test]
    fn test_roundtrip_simple() {
        let t = SmtTerm::and(vec![
            SmtTerm::cmp(IcmpPred::Ne, SmtTerm::var("bad"), SmtTerm::int(0)),
            SmtTerm::eq(SmtTerm::var("v"), SmtTerm::int(1)),
        ]);
        let back = roundtrip(vec![t.clone()]);
        assert_eq!(back, vec![t]);
    }

    #[test]
    fn test_roundtrip_negative_constant() {
        let t = SmtTerm::eq(SmtTerm::var("code"), SmtTerm::int(-22));
        assert_eq!(roundtrip(vec![t.clone()]), vec![t]);
    }

    #[test]
    fn test_roundtrip_bitwise_as_uninterpreted() {
        let t = SmtTerm::eq(
            SmtTerm::var("r"),
            SmtTerm::binop(BinOp::And, SmtTerm::var("a"), SmtTerm::var("b")),
        );
        let script = print_script(&[t.clone()]);
        assert!(script.contains("(declare-fun bvand (Int Int) Int)"));
        assert_eq!(roundtrip(vec![t.clone()]), vec![t]);
    }

    #[test]
    fn test_roundtrip_preserves_satisfiability() {
        let original = vec![
            SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(1)),
            SmtTerm::cmp(IcmpPred::Ne, SmtTerm::var("x"), SmtTerm::int(1)),
        ];
        let mut before = BoundedSolver::new();
        for t in &original {
            before.add(t.clone());
        }
        let mut after = BoundedSolver::new();
        for t in roundtrip(original) {
            after.add(t);
        }
        assert_eq!(before.check(), SmtVerdict::Unsat);
        assert_eq!(after.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_script("(assert").is_err());
        assert!(parse_script("(frobnicate x)").is_err());
    }

    #[test]
    fn test_comments_are_skipped() {
        let script = "; header\n(declare-const x Int)\n(assert (= x 3)) ; tail\n(check-sat)\n";
        let terms = parse_script(script).unwrap();
        assert_eq!(terms, vec![SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(3))]);
    }
}
