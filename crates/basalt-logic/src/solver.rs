//! Satisfiability for quantifier-free linear arithmetic
//!
//! [`SmtSolver`] keeps a stack of asserted formulas with push/pop and decides
//! their conjunction by enumerating implicants of the negation normal form.
//! Each implicant is a conjunction of Boolean literals and linear rows; rows
//! are checked by Fourier–Motzkin with branch and bound (see [`crate::fm`]).
//! Branches whose accumulated rows are already rationally infeasible are
//! pruned before descending into a disjunction.

use crate::fm::{rationally_feasible, LiaOutcome, LiaProblem};
use crate::interpolate::{self, ItpOptions, PartitionMask};
use crate::linear::{classify_atom, AtomKind, LinRow};
use crate::model::{Model, Value};
use crate::term::{Logic, Term, TermNode};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

/// Three-valued answer of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The solver gave up (non-linear atom or branch budget exhausted).
    Unknown,
}

impl SatResult {
    pub fn is_sat(self) -> bool {
        self == SatResult::Sat
    }

    pub fn is_unsat(self) -> bool {
        self == SatResult::Unsat
    }
}

/// Errors surfaced by the solver. Misuse (asking for a model after an unsat
/// answer) is a panic, not an error.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver gave up: {0}")]
    Incomplete(String),
    #[error("internal solver error: {0}")]
    Internal(String),
}

enum LastCheck {
    None,
    Sat(Model),
    Unsat,
}

/// Incremental solver over a shared term bank.
pub struct SmtSolver<'a> {
    logic: &'a Logic,
    assertions: Vec<Term>,
    frames: Vec<usize>,
    last: LastCheck,
}

impl<'a> SmtSolver<'a> {
    pub fn new(logic: &'a Logic) -> Self {
        SmtSolver {
            logic,
            assertions: Vec::new(),
            frames: Vec::new(),
            last: LastCheck::None,
        }
    }

    pub fn logic(&self) -> &'a Logic {
        self.logic
    }

    pub fn assert(&mut self, fla: Term) {
        self.assertions.push(fla);
        self.last = LastCheck::None;
    }

    pub fn push(&mut self) {
        self.frames.push(self.assertions.len());
    }

    pub fn pop(&mut self) {
        let mark = self.frames.pop().expect("pop without matching push");
        self.assertions.truncate(mark);
        self.last = LastCheck::None;
    }

    pub fn assertions(&self) -> &[Term] {
        &self.assertions
    }

    pub fn check(&mut self) -> SatResult {
        let fla = self.logic.mk_and(self.assertions.iter().copied());
        let nnf = self.logic.to_nnf(fla);
        trace!(assertions = self.assertions.len(), "checking satisfiability");
        let mut search = ImplicantSearch {
            logic: self.logic,
            incomplete: false,
        };
        match search.run(nnf) {
            Some(model) => {
                self.last = LastCheck::Sat(model);
                SatResult::Sat
            }
            None if search.incomplete => {
                self.last = LastCheck::None;
                SatResult::Unknown
            }
            None => {
                self.last = LastCheck::Unsat;
                SatResult::Unsat
            }
        }
    }

    /// Model of the last check. Panics unless the last check returned `Sat`.
    pub fn model(&self) -> &Model {
        match &self.last {
            LastCheck::Sat(model) => model,
            _ => panic!("model requested, but the last check was not satisfiable"),
        }
    }

    /// Craig interpolant of the last unsatisfiable check. The A-part is the
    /// set of assertions whose index is in `mask`; the B-part is the rest.
    /// Panics unless the last check returned `Unsat`.
    pub fn interpolant(
        &self,
        mask: &PartitionMask,
        options: ItpOptions,
    ) -> Result<Term, SolverError> {
        match &self.last {
            LastCheck::Unsat => {}
            _ => panic!("interpolant requested, but the last check was not unsatisfiable"),
        }
        let mut a = Vec::new();
        let mut b = Vec::new();
        for (i, &fla) in self.assertions.iter().enumerate() {
            if mask.contains(i) {
                a.push(self.logic.to_nnf(fla));
            } else {
                b.push(self.logic.to_nnf(fla));
            }
        }
        interpolate::interpolant(self.logic, &a, &b, options)
    }
}

/// One-shot satisfiability of a single formula.
pub fn check_formula(logic: &Logic, fla: Term) -> SatResult {
    let mut solver = SmtSolver::new(logic);
    solver.assert(fla);
    solver.check()
}

struct ImplicantSearch<'a> {
    logic: &'a Logic,
    incomplete: bool,
}

impl<'a> ImplicantSearch<'a> {
    fn run(&mut self, nnf: Term) -> Option<Model> {
        let work = vec![nnf];
        self.search(work, FxHashMap::default(), Vec::new())
    }

    fn search(
        &mut self,
        mut work: Vec<Term>,
        mut bools: FxHashMap<Term, bool>,
        mut rows: Vec<LinRow>,
    ) -> Option<Model> {
        while let Some(t) = work.pop() {
            match self.logic.node(t) {
                TermNode::True => continue,
                TermNode::False => return None,
                TermNode::And(args) => {
                    work.extend(args.iter().copied());
                }
                TermNode::Or(args) => {
                    if !rationally_feasible(self.logic, &rows) {
                        return None;
                    }
                    for &child in args.iter() {
                        let mut branch_work = work.clone();
                        branch_work.push(child);
                        if let Some(model) =
                            self.search(branch_work, bools.clone(), rows.clone())
                        {
                            return Some(model);
                        }
                    }
                    return None;
                }
                _ => match classify_atom(self.logic, t) {
                    Ok(AtomKind::BoolLit { var, positive }) => {
                        if let Some(&prev) = bools.get(&var) {
                            if prev != positive {
                                return None;
                            }
                        } else {
                            bools.insert(var, positive);
                        }
                    }
                    Ok(AtomKind::Linear(atom_rows)) => {
                        rows.extend(atom_rows);
                    }
                    Err(_) => {
                        self.incomplete = true;
                        return None;
                    }
                },
            }
        }
        // Full implicant collected; decide the linear part.
        let mut problem = LiaProblem::new(self.logic, rows);
        match problem.solve() {
            LiaOutcome::Sat(assign) => {
                let mut model = Model::new();
                for (var, positive) in bools {
                    model.insert(var, Value::Bool(positive));
                }
                for (var, value) in assign {
                    model.insert(var, Value::Num(value));
                }
                Some(model)
            }
            LiaOutcome::Unsat(_) => None,
            LiaOutcome::Unknown => {
                self.incomplete = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Sort;
    use num_bigint::BigInt;

    fn int_val(model: &Model, var: Term) -> BigInt {
        model.num(var).to_integer()
    }

    #[test]
    fn simple_bounds_are_sat() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(logic.mk_leq(logic.mk_int(3), x));
        solver.assert(logic.mk_lt(x, logic.mk_int(5)));
        assert!(solver.check().is_sat());
        let v = int_val(solver.model(), x);
        assert!(v >= BigInt::from(3) && v < BigInt::from(5));
    }

    #[test]
    fn conflicting_bounds_are_unsat() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(logic.mk_leq(logic.mk_int(5), x));
        solver.assert(logic.mk_lt(x, logic.mk_int(5)));
        assert!(solver.check().is_unsat());
    }

    #[test]
    fn disjunction_picks_a_feasible_branch() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let fla = logic.mk_or([
            logic.mk_and([logic.mk_eq(x, logic.mk_int(1)), logic.mk_lt(x, logic.mk_int(0))]),
            logic.mk_eq(x, logic.mk_int(7)),
        ]);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(fla);
        assert!(solver.check().is_sat());
        assert_eq!(int_val(solver.model(), x), BigInt::from(7));
    }

    #[test]
    fn model_satisfies_the_asserted_formula() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let fla = logic.mk_and([
            logic.mk_eq(y, logic.mk_add([x, logic.mk_int(1)])),
            logic.mk_leq(logic.mk_int(10), x),
        ]);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(fla);
        assert!(solver.check().is_sat());
        assert!(solver.model().holds(&logic, fla));
    }

    #[test]
    fn push_pop_restores_assertions() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(logic.mk_leq(logic.mk_int(0), x));
        assert!(solver.check().is_sat());
        solver.push();
        solver.assert(logic.mk_lt(x, logic.mk_int(0)));
        assert!(solver.check().is_unsat());
        solver.pop();
        assert!(solver.check().is_sat());
    }

    #[test]
    fn negated_equality_splits() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(logic.mk_eq(x, y));
        solver.assert(logic.mk_neq(x, y));
        assert!(solver.check().is_unsat());
    }

    #[test]
    fn boolean_structure_with_conflict() {
        let logic = Logic::new();
        let p = logic.mk_var("p", Sort::Bool);
        let q = logic.mk_var("q", Sort::Bool);
        let mut solver = SmtSolver::new(&logic);
        solver.assert(logic.mk_or([p, q]));
        solver.assert(logic.mk_not(p));
        solver.assert(logic.mk_not(q));
        assert!(solver.check().is_unsat());
    }

    mod random {
        use super::*;
        use proptest::prelude::*;

        fn eval_box(logic: &Logic, x: Term, y: Term, fla: Term) -> bool {
            for vx in -3i64..=3 {
                for vy in -3i64..=3 {
                    let mut model = Model::new();
                    model.insert(x, Value::from_int(vx));
                    model.insert(y, Value::from_int(vy));
                    if model.holds(logic, fla) {
                        return true;
                    }
                }
            }
            false
        }

        proptest! {
            /// Random conjunctions of two-variable bounds agree with direct
            /// evaluation over a small integer box.
            #[test]
            fn search_matches_enumeration(
                a in -3i64..=3, b in -3i64..=3, c in -3i64..=3,
                d in -3i64..=3, e in -3i64..=3
            ) {
                let logic = Logic::new();
                let x = logic.mk_var("x", Sort::Int);
                let y = logic.mk_var("y", Sort::Int);
                let in_box = logic.mk_and([
                    logic.mk_leq(logic.mk_int(-3), x),
                    logic.mk_leq(x, logic.mk_int(3)),
                    logic.mk_leq(logic.mk_int(-3), y),
                    logic.mk_leq(y, logic.mk_int(3)),
                ]);
                let fla = logic.mk_and([
                    logic.mk_leq(logic.mk_add([x, y]), logic.mk_int(a)),
                    logic.mk_leq(logic.mk_int(b), logic.mk_sub(x, y)),
                    logic.mk_or([
                        logic.mk_eq(x, logic.mk_int(c)),
                        logic.mk_lt(logic.mk_int(d), y),
                    ]),
                    logic.mk_neq(y, logic.mk_int(e)),
                ]);
                let expected = eval_box(&logic, x, y, fla);
                let got = check_formula(&logic, logic.mk_and([in_box, fla]));
                prop_assert_eq!(got.is_sat(), expected);
            }
        }
    }

    #[test]
    fn agrees_with_brute_force_on_small_box() {
        // Exhaustive cross-check of the search against direct evaluation on
        // the integer box [-2, 2]^2.
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let in_box = logic.mk_and([
            logic.mk_leq(logic.mk_int(-2), x),
            logic.mk_leq(x, logic.mk_int(2)),
            logic.mk_leq(logic.mk_int(-2), y),
            logic.mk_leq(y, logic.mk_int(2)),
        ]);
        let candidates = [
            logic.mk_lt(logic.mk_add([x, y]), logic.mk_int(-4)),
            logic.mk_eq(logic.mk_add([x, y]), logic.mk_int(4)),
            logic.mk_and([logic.mk_lt(x, y), logic.mk_lt(y, x)]),
            logic.mk_or([
                logic.mk_eq(x, logic.mk_int(3)),
                logic.mk_eq(y, logic.mk_int(-2)),
            ]),
        ];
        for fla in candidates {
            let mut brute_sat = false;
            for vx in -2i64..=2 {
                for vy in -2i64..=2 {
                    let mut model = Model::new();
                    model.insert(x, Value::from_int(vx));
                    model.insert(y, Value::from_int(vy));
                    if model.holds(&logic, fla) {
                        brute_sat = true;
                    }
                }
            }
            let result = check_formula(&logic, logic.mk_and([in_box, fla]));
            assert_eq!(result.is_sat(), brute_sat, "disagreement on {}", logic.pp(fla));
        }
    }
}
