//! Bounded reachability with interpolant learning
//!
//! The checker answers "is some state satisfying `F` reachable in exactly
//! `k` steps from `Init`", recursing through a layered frame `R[k]` of
//! conjunctive over-approximations of the states reachable in exactly `k`
//! steps. A satisfiable step query is generalised by model-based projection
//! and pursued one level down; an unsatisfiable one strengthens the frame
//! with an interpolant.

use crate::error::VerifierError;
use crate::mbp::ModelBasedProjection;
use crate::time::TimeMachine;
use crate::transys::TransitionSystem;
use basalt_logic::{ItpOptions, Logic, Model, PartitionMask, SatResult, SmtSolver, Strength, Term};
use tracing::trace;

/// Growable sequence of per-depth over-approximations; unwritten entries
/// read as `true`.
pub struct RFrame<'a> {
    logic: &'a Logic,
    frames: Vec<Term>,
}

impl<'a> RFrame<'a> {
    pub fn new(logic: &'a Logic) -> Self {
        RFrame {
            logic,
            frames: Vec::new(),
        }
    }

    pub fn get(&mut self, k: usize) -> Term {
        let top = self.logic.term_true();
        if k >= self.frames.len() {
            self.frames.resize(k + 1, top);
        }
        self.frames[k]
    }

    pub fn insert(&mut self, fla: Term, k: usize) {
        let current = self.get(k);
        self.frames[k] = self.logic.mk_and([current, fla]);
    }
}

/// Outcome of a single-depth query.
pub enum Reached {
    Reachable,
    /// Unreachable, with an interpolant excluding the target at this depth.
    Unreachable(Term),
}

/// Outcome of a depth-range query.
pub enum BoundedReach {
    ReachableAt(usize),
    /// Unreachable across the range; carries the interpolant of the last
    /// depth checked.
    Unreachable(Term),
}

pub struct ReachabilityChecker<'a, 'b> {
    logic: &'a Logic,
    tm: &'b TimeMachine<'a>,
    system: &'b TransitionSystem,
    frame: RFrame<'a>,
}

impl<'a, 'b> ReachabilityChecker<'a, 'b> {
    pub fn new(logic: &'a Logic, tm: &'b TimeMachine<'a>, system: &'b TransitionSystem) -> Self {
        ReachabilityChecker {
            logic,
            tm,
            system,
            frame: RFrame::new(logic),
        }
    }

    /// Is a state satisfying `formula` reachable in exactly `k` steps?
    pub fn reachable(&mut self, k: usize, formula: Term) -> Result<Reached, VerifierError> {
        let logic = self.logic;
        let itp_options = ItpOptions {
            strength: Strength::Farkas,
            simplify: 4,
        };
        if k == 0 {
            let mut solver = SmtSolver::new(logic);
            solver.assert(self.system.init());
            solver.assert(formula);
            return match solver.check() {
                SatResult::Sat => Ok(Reached::Reachable),
                SatResult::Unsat => {
                    let itp = solver.interpolant(&PartitionMask::single(0), itp_options)?;
                    Ok(Reached::Unreachable(itp))
                }
                SatResult::Unknown => Err(VerifierError::SolverUnknown(
                    "initial-state reachability".into(),
                )),
            };
        }
        // Match the pattern R[k-1]_0, Tr_0, F_1.
        let versioned = self.tm.shift(formula, 1);
        loop {
            let mut solver = SmtSolver::new(logic);
            solver.assert(self.frame.get(k - 1));
            solver.assert(self.system.transition());
            solver.assert(versioned);
            match solver.check() {
                SatResult::Sat => {
                    let model = solver.model().clone();
                    let g = self.generalize(&model, self.system.transition(), versioned);
                    trace!(depth = k, "step query reachable, descending");
                    match self.reachable(k - 1, g)? {
                        Reached::Reachable => return Ok(Reached::Reachable),
                        Reached::Unreachable(itp) => {
                            self.frame.insert(itp, k - 1);
                        }
                    }
                }
                SatResult::Unsat => {
                    // Interpolant of R[k-1] ∧ Tr against F_1, shifted back.
                    let mut mask = PartitionMask::new();
                    mask.set(0);
                    mask.set(1);
                    let step_itp = solver.interpolant(&mask, itp_options)?;
                    let step_itp = self.tm.shift(step_itp, -1);

                    // Interpolant of Init against F, when they conflict too.
                    let mut init_solver = SmtSolver::new(logic);
                    init_solver.assert(self.system.init());
                    init_solver.assert(formula);
                    return match init_solver.check() {
                        SatResult::Unsat => {
                            let init_itp =
                                init_solver.interpolant(&PartitionMask::single(0), itp_options)?;
                            Ok(Reached::Unreachable(logic.mk_or([step_itp, init_itp])))
                        }
                        SatResult::Sat => Ok(Reached::Unreachable(step_itp)),
                        SatResult::Unknown => Err(VerifierError::SolverUnknown(
                            "initial-state interpolation query".into(),
                        )),
                    };
                }
                SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown("step reachability".into()))
                }
            }
        }
    }

    /// Check depths `from..=to`, returning the first reachable depth or the
    /// interpolant of the last unreachable one.
    pub fn check_reachability(
        &mut self,
        from: usize,
        to: usize,
        formula: Term,
    ) -> Result<BoundedReach, VerifierError> {
        let mut last_itp = self.logic.term_false();
        for depth in from..=to {
            match self.reachable(depth, formula)? {
                Reached::Reachable => return Ok(BoundedReach::ReachableAt(depth)),
                Reached::Unreachable(itp) => last_itp = itp,
            }
        }
        Ok(BoundedReach::Unreachable(last_itp))
    }

    /// Project a satisfied step formula down to the version-0 state
    /// variables.
    pub fn generalize(&self, model: &Model, transition: Term, formula: Term) -> Term {
        let conj = self.logic.mk_and([transition, formula]);
        ModelBasedProjection::new(self.logic).keep_only(conj, self.system.state_vars(), model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_logic::Sort;

    /// Counter: x starts at 0 and increments by one each step.
    fn counter(logic: &Logic) -> TransitionSystem {
        let tm = TimeMachine::new(logic);
        let x = logic.mk_var("x", Sort::Int);
        let x1 = tm.var_version(x, 1);
        TransitionSystem::new(
            logic,
            vec![x],
            vec![],
            logic.mk_eq(x, logic.mk_int(0)),
            logic.mk_eq(x1, logic.mk_add([x, logic.mk_int(1)])),
            logic.term_false(),
        )
        .unwrap()
    }

    #[test]
    fn zero_step_reachability_is_init() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let system = counter(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let mut checker = ReachabilityChecker::new(&logic, &tm, &system);
        assert!(matches!(
            checker.reachable(0, logic.mk_eq(x, logic.mk_int(0))).unwrap(),
            Reached::Reachable
        ));
        match checker.reachable(0, logic.mk_eq(x, logic.mk_int(1))).unwrap() {
            Reached::Unreachable(itp) => {
                // The interpolant separates Init from x = 1.
                assert!(basalt_logic::check_formula(
                    &logic,
                    logic.mk_and([itp, logic.mk_eq(x, logic.mk_int(1))])
                )
                .is_unsat());
            }
            Reached::Reachable => panic!("x = 1 is not initial"),
        }
    }

    #[test]
    fn counter_reaches_three_in_three_steps() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let system = counter(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let target = logic.mk_eq(x, logic.mk_int(3));
        let mut checker = ReachabilityChecker::new(&logic, &tm, &system);
        assert!(matches!(
            checker.reachable(3, target).unwrap(),
            Reached::Reachable
        ));
        assert!(matches!(
            checker.reachable(2, target).unwrap(),
            Reached::Unreachable(_)
        ));
    }

    #[test]
    fn range_query_reports_first_depth() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let system = counter(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let target = logic.mk_eq(x, logic.mk_int(2));
        let mut checker = ReachabilityChecker::new(&logic, &tm, &system);
        match checker.check_reachability(0, 4, target).unwrap() {
            BoundedReach::ReachableAt(depth) => assert_eq!(depth, 2),
            BoundedReach::Unreachable(_) => panic!("x = 2 reachable at depth 2"),
        }
    }
}
