//! Bounded in-process SMT backend
//!
//! Sound for Unsat, incomplete for Sat: the verdict is `Unsat` only when the
//! case analysis refutes every branch, and budget or timeout exhaustion
//! degrades to `Unknown`. Callers treat `Unknown` conservatively (no pruning,
//! no equivalence claims).
//!
//! The decision procedure enumerates the boolean atoms (comparisons and
//! integer equalities) up to a branch budget; each complete assignment is
//! checked for integer consistency with equality classes, constant folding,
//! and signed interval narrowing.

use super::super::domain::term::{SmtTerm, SmtVerdict};
use crate::shared::models::ir::{BinOp, IcmpPred};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Solver port exposed to the rest of the crate
pub trait SmtSolver {
    fn push(&mut self);
    fn pop(&mut self);
    fn add(&mut self, term: SmtTerm);
    fn check(&mut self) -> SmtVerdict;
    fn to_smt2(&self) -> String;
}

/// Run `body` inside a push/pop scope; the scope is released on every exit
/// path, panics included.
pub fn with_scope<S, R>(solver: &mut S, body: impl FnOnce(&mut S) -> R) -> R
where
    S: SmtSolver + ?Sized,
{
    struct Guard<'a, S: SmtSolver + ?Sized>(&'a mut S);
    impl<S: SmtSolver + ?Sized> Drop for Guard<'_, S> {
        fn drop(&mut self) {
            self.0.pop();
        }
    }

    solver.push();
    let mut guard = Guard(solver);
    body(guard.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SolverStats {
    pub checks: u64,
    pub sat: u64,
    pub unsat: u64,
    pub unknown: u64,
}

pub struct BoundedSolver {
    assertions: Vec<SmtTerm>,
    scope_marks: Vec<usize>,
    /// Maximum number of boolean atoms to case-split over
    branch_budget: usize,
    timeout: Duration,
    stats: SolverStats,
}

impl Default for BoundedSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedSolver {
    pub fn new() -> Self {
        Self::with_limits(18, Duration::from_millis(500))
    }

    pub fn with_limits(branch_budget: usize, timeout: Duration) -> Self {
        Self {
            assertions: Vec::new(),
            scope_marks: Vec::new(),
            branch_budget,
            timeout,
            stats: SolverStats::default(),
        }
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    pub fn assertions(&self) -> &[SmtTerm] {
        &self.assertions
    }
}

impl SmtSolver for BoundedSolver {
    fn push(&mut self) {
        self.scope_marks.push(self.assertions.len());
    }

    fn pop(&mut self) {
        if let Some(mark) = self.scope_marks.pop() {
            self.assertions.truncate(mark);
        }
    }

    fn add(&mut self, term: SmtTerm) {
        self.assertions.push(term);
    }

    fn check(&mut self) -> SmtVerdict {
        self.stats.checks += 1;
        let formula = SmtTerm::and(self.assertions.clone());
        let deadline = Instant::now() + self.timeout;

        let mut atoms = Vec::new();
        collect_atoms(&formula, &mut atoms);
        if atoms.len() > self.branch_budget {
            self.stats.unknown += 1;
            return SmtVerdict::Unknown;
        }

        let mut ctx = SearchCtx {
            atoms: &atoms,
            deadline,
            exhausted: false,
        };
        let verdict = match ctx.search(&formula, &mut Vec::new()) {
            Some(true) => SmtVerdict::Sat,
            Some(false) => {
                if ctx.exhausted {
                    SmtVerdict::Unknown
                } else {
                    SmtVerdict::Unsat
                }
            }
            None => SmtVerdict::Unknown,
        };
        match verdict {
            SmtVerdict::Sat => self.stats.sat += 1,
            SmtVerdict::Unsat => self.stats.unsat += 1,
            SmtVerdict::Unknown => self.stats.unknown += 1,
        }
        verdict
    }

    fn to_smt2(&self) -> String {
        super::smtlib::print_script(&self.assertions)
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Atom collection
// ──────────────────────────────────────────────────────────────────────────

/// A boolean atom: integer equality or comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Eq(SmtTerm, SmtTerm),
    Cmp(IcmpPred, SmtTerm, SmtTerm),
}

fn collect_atoms(term: &SmtTerm, out: &mut Vec<Atom>) {
    match term {
        SmtTerm::Eq(a, b) => {
            let atom = Atom::Eq((**a).clone(), (**b).clone());
            if !out.contains(&atom) {
                out.push(atom);
            }
        }
        SmtTerm::Cmp(pred, a, b) => {
            let atom = Atom::Cmp(*pred, (**a).clone(), (**b).clone());
            if !out.contains(&atom) {
                out.push(atom);
            }
        }
        SmtTerm::And(ts) | SmtTerm::Or(ts) => {
            for t in ts {
                collect_atoms(t, out);
            }
        }
        SmtTerm::Not(t) => collect_atoms(t, out),
        SmtTerm::Xor(a, b) | SmtTerm::Iff(a, b) => {
            collect_atoms(a, out);
            collect_atoms(b, out);
        }
        SmtTerm::IntVar(_) | SmtTerm::IntConst(_) | SmtTerm::BoolConst(_) | SmtTerm::BinOp(..) => {}
    }
}

// ──────────────────────────────────────────────────────────────────────────
// Case-splitting search
// ──────────────────────────────────────────────────────────────────────────

struct SearchCtx<'a> {
    atoms: &'a [Atom],
    deadline: Instant,
    /// Set when a branch was abandoned without refutation
    exhausted: bool,
}

impl SearchCtx<'_> {
    /// Returns Some(true) if a consistent satisfying assignment exists,
    /// Some(false) if refuted (complete only when !self.exhausted),
    /// None on timeout.
    fn search(&mut self, formula: &SmtTerm, assignment: &mut Vec<Option<bool>>) -> Option<bool> {
        if Instant::now() > self.deadline {
            self.exhausted = true;
            return None;
        }
        assignment.resize(self.atoms.len(), None);

        match eval_formula(formula, self.atoms, assignment) {
            Some(false) => return Some(false),
            Some(true) => {
                if consistent(self.atoms, assignment) {
                    return Some(true);
                }
                // the boolean skeleton is satisfied but the theory refutes
                // this (partial) assignment only if it is total on used atoms
            }
            None => {}
        }

        let next = assignment.iter().position(|a| a.is_none());
        let next = match next {
            Some(i) => i,
            None => {
                // fully assigned: formula value decided above
                return Some(
                    eval_formula(formula, self.atoms, assignment) == Some(true)
                        && consistent(self.atoms, assignment),
                );
            }
        };

        for value in [true, false] {
            assignment[next] = Some(value);
            if !consistent(self.atoms, assignment) {
                assignment[next] = None;
                continue;
            }
            match self.search(formula, assignment) {
                Some(true) => {
                    assignment[next] = None;
                    return Some(true);
                }
                Some(false) => {}
                None => {
                    assignment[next] = None;
                    return None;
                }
            }
            assignment[next] = None;
        }
        Some(false)
    }
}

/// Three-valued evaluation of the boolean skeleton under a partial atom
/// assignment.
fn eval_formula(term: &SmtTerm, atoms: &[Atom], assignment: &[Option<bool>]) -> Option<bool> {
    match term {
        SmtTerm::BoolConst(b) => Some(*b),
        SmtTerm::Eq(a, b) => {
            let atom = Atom::Eq((**a).clone(), (**b).clone());
            lookup(atoms, assignment, &atom)
        }
        SmtTerm::Cmp(pred, a, b) => {
            let atom = Atom::Cmp(*pred, (**a).clone(), (**b).clone());
            lookup(atoms, assignment, &atom)
        }
        SmtTerm::And(ts) => {
            let mut all_true = true;
            for t in ts {
                match eval_formula(t, atoms, assignment) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => all_true = false,
                }
            }
            if all_true {
                Some(true)
            } else {
                None
            }
        }
        SmtTerm::Or(ts) => {
            let mut all_false = true;
            for t in ts {
                match eval_formula(t, atoms, assignment) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => all_false = false,
                }
            }
            if all_false {
                Some(false)
            } else {
                None
            }
        }
        SmtTerm::Not(t) => eval_formula(t, atoms, assignment).map(|b| !b),
        SmtTerm::Xor(a, b) => {
            let va = eval_formula(a, atoms, assignment)?;
            let vb = eval_formula(b, atoms, assignment)?;
            Some(va != vb)
        }
        SmtTerm::Iff(a, b) => {
            let va = eval_formula(a, atoms, assignment)?;
            let vb = eval_formula(b, atoms, assignment)?;
            Some(va == vb)
        }
        // bare integer terms in boolean position do not occur
        SmtTerm::IntVar(_) | SmtTerm::IntConst(_) | SmtTerm::BinOp(..) => Some(true),
    }
}

fn lookup(atoms: &[Atom], assignment: &[Option<bool>], atom: &Atom) -> Option<bool> {
    atoms
        .iter()
        .position(|a| a == atom)
        .and_then(|i| assignment.get(i).copied().flatten())
}

// ──────────────────────────────────────────────────────────────────────────
// Theory consistency
// ──────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TermInfo {
    parent: usize,
    constant: Option<i64>,
    lo: i64,
    hi: i64,
}

struct Theory {
    keys: FxHashMap<SmtTerm, usize>,
    infos: Vec<TermInfo>,
    neq: Vec<(usize, usize)>,
}

impl Theory {
    fn new() -> Self {
        Self {
            keys: FxHashMap::default(),
            infos: Vec::new(),
            neq: Vec::new(),
        }
    }

    fn intern(&mut self, term: &SmtTerm) -> usize {
        if let Some(&id) = self.keys.get(term) {
            return id;
        }
        let id = self.infos.len();
        self.infos.push(TermInfo {
            parent: id,
            constant: match term {
                SmtTerm::IntConst(c) => Some(*c),
                _ => None,
            },
            lo: i64::MIN,
            hi: i64::MAX,
        });
        self.keys.insert(term.clone(), id);
        id
    }

    fn find(&mut self, id: usize) -> usize {
        let mut root = id;
        while self.infos[root].parent != root {
            root = self.infos[root].parent;
        }
        let mut cur = id;
        while self.infos[cur].parent != cur {
            let next = self.infos[cur].parent;
            self.infos[cur].parent = root;
            cur = next;
        }
        root
    }

    /// Union two classes; false on contradiction.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return true;
        }
        let (ca, cb) = (self.infos[ra].constant, self.infos[rb].constant);
        if let (Some(x), Some(y)) = (ca, cb) {
            if x != y {
                return false;
            }
        }
        let lo = self.infos[ra].lo.max(self.infos[rb].lo);
        let hi = self.infos[ra].hi.min(self.infos[rb].hi);
        self.infos[rb].parent = ra;
        self.infos[ra].constant = ca.or(cb);
        self.infos[ra].lo = lo;
        self.infos[ra].hi = hi;
        self.in_range(ra)
    }

    fn in_range(&mut self, id: usize) -> bool {
        let r = self.find(id);
        let info = &self.infos[r];
        if info.lo > info.hi {
            return false;
        }
        if let Some(c) = info.constant {
            if c < info.lo || c > info.hi {
                return false;
            }
        }
        true
    }

    fn constant_of(&mut self, id: usize) -> Option<i64> {
        let r = self.find(id);
        let info = &self.infos[r];
        if let Some(c) = info.constant {
            return Some(c);
        }
        if info.lo == info.hi && info.lo != i64::MIN {
            return Some(info.lo);
        }
        None
    }

    fn narrow(&mut self, id: usize, lo: Option<i64>, hi: Option<i64>) -> bool {
        let r = self.find(id);
        if let Some(l) = lo {
            self.infos[r].lo = self.infos[r].lo.max(l);
        }
        if let Some(h) = hi {
            self.infos[r].hi = self.infos[r].hi.min(h);
        }
        self.in_range(r)
    }
}

/// Resolve an integer term to a theory id, folding constant arithmetic.
fn resolve(theory: &mut Theory, term: &SmtTerm) -> usize {
    if let SmtTerm::BinOp(op, a, b) = term {
        let ia = resolve(theory, a);
        let ib = resolve(theory, b);
        if let (Some(x), Some(y)) = (theory.constant_of(ia), theory.constant_of(ib)) {
            if let Some(folded) = fold_binop(*op, x, y) {
                return theory.intern(&SmtTerm::IntConst(folded));
            }
        }
    }
    theory.intern(term)
}

fn fold_binop(op: BinOp, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        BinOp::Add => lhs.checked_add(rhs),
        BinOp::Sub => lhs.checked_sub(rhs),
        BinOp::Mul => lhs.checked_mul(rhs),
        BinOp::SDiv => lhs.checked_div(rhs),
        BinOp::SRem => lhs.checked_rem(rhs),
        BinOp::UDiv => {
            if rhs == 0 {
                None
            } else {
                Some(((lhs as u64) / (rhs as u64)) as i64)
            }
        }
        BinOp::URem => {
            if rhs == 0 {
                None
            } else {
                Some(((lhs as u64) % (rhs as u64)) as i64)
            }
        }
        BinOp::Shl => lhs.checked_shl(rhs.try_into().ok()?),
        BinOp::LShr => Some(((lhs as u64) >> (rhs as u64 & 63)) as i64),
        BinOp::AShr => Some(lhs >> (rhs & 63)),
        BinOp::And => Some(lhs & rhs),
        BinOp::Or => Some(lhs | rhs),
        BinOp::Xor => Some(lhs ^ rhs),
    }
}

/// Check whether the literals induced by the (partial) assignment are
/// consistent in the integer theory. Sound: returns false only on a definite
/// contradiction.
fn consistent(atoms: &[Atom], assignment: &[Option<bool>]) -> bool {
    let mut theory = Theory::new();

    // equalities first so classes are settled before comparisons narrow them
    for (atom, value) in atoms.iter().zip(assignment.iter()) {
        let value = match value {
            Some(v) => *v,
            None => continue,
        };
        if let Atom::Eq(a, b) = atom {
            let ia = resolve(&mut theory, a);
            let ib = resolve(&mut theory, b);
            if value {
                if !theory.union(ia, ib) {
                    return false;
                }
            } else {
                theory.neq.push((ia, ib));
            }
        }
    }

    // then comparisons
    for (atom, value) in atoms.iter().zip(assignment.iter()) {
        let value = match value {
            Some(v) => *v,
            None => continue,
        };
        if let Atom::Cmp(pred, a, b) = atom {
            let pred = if value { *pred } else { pred.inverse() };
            let ia = resolve(&mut theory, a);
            let ib = resolve(&mut theory, b);
            if !apply_cmp(&mut theory, pred, ia, ib) {
                return false;
            }
        }
    }

    // disequalities last
    for (ia, ib) in theory.neq.clone() {
        let ra = theory.find(ia);
        let rb = theory.find(ib);
        if ra == rb {
            return false;
        }
        if let (Some(x), Some(y)) = (theory.constant_of(ia), theory.constant_of(ib)) {
            if x == y {
                return false;
            }
        }
    }

    true
}

fn apply_cmp(theory: &mut Theory, pred: IcmpPred, ia: usize, ib: usize) -> bool {
    let ca = theory.constant_of(ia);
    let cb = theory.constant_of(ib);

    if let (Some(x), Some(y)) = (ca, cb) {
        return pred.eval(x, y);
    }

    match pred {
        IcmpPred::Eq => theory.union(ia, ib),
        IcmpPred::Ne => {
            if theory.find(ia) == theory.find(ib) {
                return false;
            }
            theory.neq.push((ia, ib));
            true
        }
        // signed bounds against a known constant
        IcmpPred::Slt => bound(theory, ia, ib, ca, cb, -1, 1),
        IcmpPred::Sle => bound(theory, ia, ib, ca, cb, 0, 0),
        IcmpPred::Sgt => bound(theory, ib, ia, cb, ca, -1, 1),
        IcmpPred::Sge => bound(theory, ib, ia, cb, ca, 0, 0),
        // unsigned orders are only decided on constants; otherwise neutral
        IcmpPred::Ugt | IcmpPred::Uge | IcmpPred::Ult | IcmpPred::Ule => true,
    }
}

/// Enforce `a <= b + hi_off` / `a + lo_off < b` style bounds when one side is
/// constant. `lhs op rhs` with op ∈ {<, <=} after normalization.
fn bound(
    theory: &mut Theory,
    lhs: usize,
    rhs: usize,
    lhs_const: Option<i64>,
    rhs_const: Option<i64>,
    hi_off: i64,
    _lo_adj: i64,
) -> bool {
    if let Some(c) = rhs_const {
        // lhs < c  (hi_off = -1)  or  lhs <= c (hi_off = 0)
        return theory.narrow(lhs, None, c.checked_add(hi_off));
    }
    if let Some(c) = lhs_const {
        // c < rhs  or  c <= rhs
        return theory.narrow(rhs, c.checked_sub(hi_off), None);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ir::IcmpPred;

    fn var(name: &str) -> SmtTerm {
        SmtTerm::var(name)
    }

    #[test]
    fn test_trivial_sat() {
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(0)));
        assert_eq!(solver.check(), SmtVerdict::Sat);
    }

    #[test]
    fn test_conflict_is_unsat() {
        let mut solver = BoundedSolver::new();
        let c = SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(0));
        solver.add(c.clone());
        solver.add(SmtTerm::not(c));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_eq_vs_distinct_constants() {
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(1)));
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(2)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_xor_of_equivalent_is_unsat() {
        // (x != 0) xor (x != 0)
        let mut solver = BoundedSolver::new();
        let a = SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(0));
        solver.add(SmtTerm::xor(a.clone(), a));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_xor_of_different_atoms_is_sat() {
        let mut solver = BoundedSolver::new();
        let a = SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(0));
        let b = SmtTerm::cmp(IcmpPred::Ne, var("y"), SmtTerm::int(0));
        solver.add(SmtTerm::xor(a, b));
        assert_eq!(solver.check(), SmtVerdict::Sat);
    }

    #[test]
    fn test_interval_contradiction() {
        // x < 3 && x > 5
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::cmp(IcmpPred::Slt, var("x"), SmtTerm::int(3)));
        solver.add(SmtTerm::cmp(IcmpPred::Sgt, var("x"), SmtTerm::int(5)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_equality_propagates_through_classes() {
        // x = y && y = 4 && x != 4
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::eq(var("x"), var("y")));
        solver.add(SmtTerm::eq(var("y"), SmtTerm::int(4)));
        solver.add(SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(4)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_iff_links_icmp_var_to_comparison() {
        // v = 1 <-> (x == 0), v = 1, x = 7  => unsat
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::iff(
            SmtTerm::eq(var("v"), SmtTerm::int(1)),
            SmtTerm::cmp(IcmpPred::Eq, var("x"), SmtTerm::int(0)),
        ));
        solver.add(SmtTerm::eq(var("v"), SmtTerm::int(1)));
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(7)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_constant_folding_in_binop() {
        // x = 2 + 3 && x != 5
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::eq(
            var("x"),
            SmtTerm::binop(BinOp::Add, SmtTerm::int(2), SmtTerm::int(3)),
        ));
        solver.add(SmtTerm::cmp(IcmpPred::Ne, var("x"), SmtTerm::int(5)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
    }

    #[test]
    fn test_push_pop_restores_assertions() {
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(1)));
        solver.push();
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(2)));
        assert_eq!(solver.check(), SmtVerdict::Unsat);
        solver.pop();
        assert_eq!(solver.check(), SmtVerdict::Sat);
    }

    #[test]
    fn test_with_scope_pops_on_panic() {
        let mut solver = BoundedSolver::new();
        solver.add(SmtTerm::eq(var("x"), SmtTerm::int(1)));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_scope(&mut solver, |s| {
                s.add(SmtTerm::eq(SmtTerm::var("x"), SmtTerm::int(2)));
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert_eq!(solver.assertions().len(), 1);
    }

    #[test]
    fn test_budget_exhaustion_is_unknown() {
        let mut solver = BoundedSolver::with_limits(2, Duration::from_millis(500));
        for i in 0..8 {
            solver.add(SmtTerm::or(vec![
                SmtTerm::cmp(IcmpPred::Ne, var(&format!("a{}", i)), SmtTerm::int(0)),
                SmtTerm::cmp(IcmpPred::Ne, var(&format!("b{}", i)), SmtTerm::int(0)),
            ]));
        }
        assert_eq!(solver.check(), SmtVerdict::Unknown);
    }
}
