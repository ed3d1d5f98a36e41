//! Solver facade used by the reachability engines
//!
//! A facade owns a preamble (initially the transition formula of its level)
//! that queries are checked against. Three modes share the contract:
//!
//! - `SingleUse` rebuilds the underlying solver for every query;
//! - `Incremental` pushes the query, and pops when the model or the
//!   interpolant has been extracted;
//! - `IncrementalWithRestarts` additionally consolidates the accumulated
//!   preamble into a single formula after a bounded number of pushes, which
//!   caps solver state growth while amortising the learning cost.
//!
//! The partition mask tracks one bit per preamble insertion, so the A-part
//! of an interpolation query is always the accumulated preamble and the
//! B-part the query itself.

use crate::error::VerifierError;
use basalt_logic::{
    ItpOptions, Logic, Model, PartitionMask, SatResult, SmtSolver, Strength, Term,
};
use tracing::trace;

/// Answer of a facade query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeMode {
    SingleUse,
    Incremental,
    IncrementalWithRestarts,
}

pub struct SolverFacade<'a> {
    logic: &'a Logic,
    mode: FacadeMode,
    strength: Strength,
    simplify: u8,
    /// Preamble formulas, kept for rebuilds.
    components: Vec<Term>,
    solver: SmtSolver<'a>,
    mask: PartitionMask,
    inserted: usize,
    pushed: bool,
    levels: usize,
    restart_limit: usize,
    last: Option<Reachability>,
}

impl<'a> SolverFacade<'a> {
    pub fn new(logic: &'a Logic, mode: FacadeMode, preamble: Term, restart_limit: usize) -> Self {
        let mut facade = SolverFacade {
            logic,
            mode,
            strength: Strength::McMillan,
            simplify: 4,
            components: vec![preamble],
            solver: SmtSolver::new(logic),
            mask: PartitionMask::new(),
            inserted: 0,
            pushed: false,
            levels: 0,
            restart_limit,
            last: None,
        };
        facade.solver.assert(preamble);
        facade.mask.set(facade.inserted);
        facade.inserted += 1;
        facade
    }

    /// Interpolation strength of `last_interpolant`; the engines default to
    /// the strong mode.
    pub fn set_strength(&mut self, strength: Strength) {
        self.strength = strength;
    }

    /// Check `preamble ∧ query`.
    pub fn check_consistent(&mut self, query: Term) -> Result<Reachability, VerifierError> {
        match self.mode {
            FacadeMode::SingleUse => {
                self.solver = SmtSolver::new(self.logic);
                self.mask = PartitionMask::new();
                self.inserted = 0;
                let preamble = self.logic.mk_and(self.components.iter().copied());
                self.solver.assert(preamble);
                self.mask.set(self.inserted);
                self.inserted += 1;
                self.solver.assert(query);
                self.inserted += 1;
            }
            FacadeMode::Incremental => {
                assert!(!self.pushed, "query while a previous query is pending");
                self.solver.push();
                self.pushed = true;
                self.solver.assert(query);
                self.inserted += 1;
            }
            FacadeMode::IncrementalWithRestarts => {
                self.levels += 1;
                if self.levels > self.restart_limit {
                    trace!(levels = self.levels, "consolidating facade preamble");
                    self.rebuild();
                }
                assert!(!self.pushed, "query while a previous query is pending");
                self.solver.push();
                self.pushed = true;
                self.solver.assert(query);
                self.inserted += 1;
            }
        }
        match self.solver.check() {
            SatResult::Sat => {
                self.last = Some(Reachability::Reachable);
                Ok(Reachability::Reachable)
            }
            SatResult::Unsat => {
                self.last = Some(Reachability::Unreachable);
                Ok(Reachability::Unreachable)
            }
            SatResult::Unknown => {
                self.last = None;
                if self.pushed {
                    self.solver.pop();
                    self.pushed = false;
                    self.inserted -= 1;
                }
                Err(VerifierError::SolverUnknown(
                    "facade consistency check".into(),
                ))
            }
        }
    }

    /// Conjoin `fla` to the preamble.
    pub fn strengthen(&mut self, fla: Term) {
        assert!(!self.pushed, "strengthen while a query is pending");
        self.components.push(fla);
        match self.mode {
            FacadeMode::SingleUse => {}
            FacadeMode::Incremental | FacadeMode::IncrementalWithRestarts => {
                self.solver.assert(fla);
                self.mask.set(self.inserted);
                self.inserted += 1;
                if self.mode == FacadeMode::IncrementalWithRestarts {
                    self.levels += 1;
                }
            }
        }
    }

    /// Model of the last query. Only valid right after a `Reachable` answer;
    /// anything else is a programming fault.
    pub fn last_model(&mut self) -> Model {
        if self.last != Some(Reachability::Reachable) {
            panic!("model requested from a facade whose last query was not reachable");
        }
        let model = self.solver.model().clone();
        self.finish_query();
        model
    }

    /// Interpolant of the last query: `preamble ⇒ I` and `I ∧ query` unsat.
    /// Only valid right after an `Unreachable` answer.
    pub fn last_interpolant(&mut self) -> Result<Term, VerifierError> {
        if self.last != Some(Reachability::Unreachable) {
            panic!("interpolant requested from a facade whose last query was not unreachable");
        }
        let options = ItpOptions {
            strength: self.strength,
            simplify: self.simplify,
        };
        let itp = self.solver.interpolant(&self.mask, options)?;
        self.finish_query();
        Ok(itp)
    }

    fn finish_query(&mut self) {
        self.last = None;
        if self.pushed {
            self.solver.pop();
            self.pushed = false;
            self.inserted -= 1;
        }
    }

    fn rebuild(&mut self) {
        let consolidated = self.logic.mk_and(self.components.iter().copied());
        self.solver = SmtSolver::new(self.logic);
        self.mask = PartitionMask::new();
        self.inserted = 0;
        self.levels = 0;
        self.solver.assert(consolidated);
        self.mask.set(self.inserted);
        self.inserted += 1;
        self.components.clear();
        self.components.push(consolidated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_logic::Sort;

    fn facade_fixture(logic: &Logic, mode: FacadeMode) -> (SolverFacade<'_>, Term, Term) {
        let x = logic.mk_var("x", Sort::Int);
        let x1 = logic.mk_var_versioned("x", 1, Sort::Int);
        let step = logic.mk_eq(x1, logic.mk_add([x, logic.mk_int(1)]));
        let facade = SolverFacade::new(logic, mode, step, 100);
        (facade, x, x1)
    }

    #[test]
    fn all_modes_agree_on_reachability() {
        for mode in [
            FacadeMode::SingleUse,
            FacadeMode::Incremental,
            FacadeMode::IncrementalWithRestarts,
        ] {
            let logic = Logic::new();
            let (mut facade, x, x1) = facade_fixture(&logic, mode);
            // x = 0 and x1 = 1 is consistent with the step relation.
            let good = logic.mk_and([
                logic.mk_eq(x, logic.mk_int(0)),
                logic.mk_eq(x1, logic.mk_int(1)),
            ]);
            assert_eq!(
                facade.check_consistent(good).unwrap(),
                Reachability::Reachable
            );
            let model = facade.last_model();
            assert!(model.holds(&logic, good));

            // x = 0 and x1 = 5 is not.
            let bad = logic.mk_and([
                logic.mk_eq(x, logic.mk_int(0)),
                logic.mk_eq(x1, logic.mk_int(5)),
            ]);
            assert_eq!(
                facade.check_consistent(bad).unwrap(),
                Reachability::Unreachable
            );
            let itp = facade.last_interpolant().unwrap();
            // preamble implies the interpolant, interpolant refutes the query
            assert!(basalt_logic::check_formula(
                &logic,
                logic.mk_and([
                    logic.mk_eq(x1, logic.mk_add([x, logic.mk_int(1)])),
                    logic.mk_not(itp)
                ])
            )
            .is_unsat());
            assert!(basalt_logic::check_formula(&logic, logic.mk_and([itp, bad])).is_unsat());
        }
    }

    #[test]
    fn strengthen_narrows_the_preamble() {
        for mode in [
            FacadeMode::SingleUse,
            FacadeMode::Incremental,
            FacadeMode::IncrementalWithRestarts,
        ] {
            let logic = Logic::new();
            let (mut facade, x, _) = facade_fixture(&logic, mode);
            let query = logic.mk_eq(x, logic.mk_int(3));
            assert_eq!(
                facade.check_consistent(query).unwrap(),
                Reachability::Reachable
            );
            facade.last_model();
            facade.strengthen(logic.mk_leq(x, logic.mk_int(0)));
            assert_eq!(
                facade.check_consistent(query).unwrap(),
                Reachability::Unreachable
            );
            facade.last_interpolant().unwrap();
        }
    }

    #[test]
    fn restart_consolidation_preserves_answers() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let preamble = logic.mk_leq(logic.mk_int(0), x);
        let mut facade =
            SolverFacade::new(&logic, FacadeMode::IncrementalWithRestarts, preamble, 3);
        for round in 0..10 {
            let query = logic.mk_eq(x, logic.mk_int(-1 - round));
            assert_eq!(
                facade.check_consistent(query).unwrap(),
                Reachability::Unreachable,
            );
            facade.last_interpolant().unwrap();
        }
    }
}
