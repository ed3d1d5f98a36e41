//! Plain k-induction
//!
//! Three interleaved incremental checks per depth `k`: the BMC base case
//! `Init ∧ Tr⁰…ᵏ⁻¹ ∧ Bad_k`, forward induction (a chain of ¬Bad states must
//! not reach Bad) and backward induction (a chain of ¬Init states must not
//! start in Init). A satisfiable base case is a counterexample of length
//! `k`; either induction closing proves safety.

use crate::engine::{poll_deadline, Engine};
use crate::error::VerifierError;
use crate::induction::{kinductive_to_inductive, verify_kinductive};
use crate::options::Options;
use crate::result::VerificationResult;
use crate::time::TimeMachine;
use crate::transys::TransitionSystem;
use basalt_logic::{Logic, SatResult, SmtSolver, Term};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Kind<'a> {
    logic: &'a Logic,
    options: Options,
}

impl<'a> Kind<'a> {
    pub fn new(logic: &'a Logic, options: Options) -> Self {
        Kind { logic, options }
    }

    fn solve_system(
        &mut self,
        system: &TransitionSystem,
    ) -> Result<VerificationResult, VerifierError> {
        let logic = self.logic;
        let tm = TimeMachine::new(logic);
        let start = Instant::now();

        if basalt_logic::check_formula(logic, system.init()).is_unsat() {
            return Ok(self.safe_witness(system, &tm, logic.term_false(), 1));
        }

        let not_bad = logic.mk_not(system.bad());
        let not_init = logic.mk_not(system.init());

        // Base-case chain: Init ∧ Tr_0 ∧ … ∧ Tr_{k-1}, queried with Bad_k.
        let mut base = SmtSolver::new(logic);
        base.assert(system.init());
        // Forward chain: ¬Bad_0 ∧ Tr_0 ∧ ¬Bad_1 ∧ …, queried with Bad_{k+1}.
        let mut forward = SmtSolver::new(logic);
        forward.assert(not_bad);
        // Backward chain: Init_0 ∧ Tr_0 ∧ ¬Init_1 ∧ …, queried with ¬Init_{k+1}.
        let mut backward = SmtSolver::new(logic);
        backward.assert(system.init());

        for k in 0..=self.options.kind_max_depth {
            poll_deadline(start, &self.options)?;
            debug!(k, "k-induction round");

            base.push();
            base.assert(tm.shift(system.bad(), k as i32));
            match base.check() {
                SatResult::Sat => {
                    info!(k, "counterexample found");
                    return Ok(VerificationResult::unsafe_at(k as u64));
                }
                SatResult::Unsat => {}
                SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown("k-induction base case".into()))
                }
            }
            base.pop();
            base.assert(tm.shift(system.transition(), k as i32));

            forward.push();
            forward.assert(tm.shift(system.transition(), k as i32));
            forward.assert(tm.shift(system.bad(), (k + 1) as i32));
            match forward.check() {
                SatResult::Unsat => {
                    info!(k, "forward induction closed");
                    return Ok(self.safe_witness(system, &tm, not_bad, (k + 1) as u64));
                }
                SatResult::Sat => {}
                SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown("forward induction".into()))
                }
            }
            forward.pop();
            forward.assert(tm.shift(system.transition(), k as i32));
            forward.assert(tm.shift(not_bad, (k + 1) as i32));

            backward.push();
            backward.assert(tm.shift(system.transition(), k as i32));
            backward.assert(tm.shift(not_init, (k + 1) as i32));
            match backward.check() {
                SatResult::Unsat => {
                    info!(k, "backward induction closed");
                    // Bad states cannot be entered from a reachable chain;
                    // the safety argument dualises, but the invariant shape
                    // is the forward one.
                    return Ok(self.safe_witness(system, &tm, not_bad, (k + 1) as u64));
                }
                SatResult::Sat => {}
                SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown("backward induction".into()))
                }
            }
            backward.pop();
            backward.assert(tm.shift(system.transition(), k as i32));
            backward.assert(tm.shift(not_init, (k + 1) as i32));
        }
        Ok(VerificationResult::Unknown)
    }

    fn safe_witness(
        &self,
        system: &TransitionSystem,
        tm: &TimeMachine<'a>,
        candidate: Term,
        k: u64,
    ) -> VerificationResult {
        if !self.options.compute_witness {
            return VerificationResult::safe();
        }
        let logic = self.logic;
        let lifted = kinductive_to_inductive(
            logic,
            tm,
            system.transition(),
            system.state_vars(),
            candidate,
            k,
        );
        match verify_kinductive(logic, tm, system.init(), system.transition(), lifted, 1) {
            Ok(true) => VerificationResult::safe_with(lifted),
            _ => {
                warn!("invariant candidate failed the 1-induction re-check; dropping the witness");
                VerificationResult::safe()
            }
        }
    }
}

impl Engine for Kind<'_> {
    fn solve(&mut self, system: &TransitionSystem) -> Result<VerificationResult, VerifierError> {
        self.solve_system(system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_logic::Sort;

    #[test]
    fn inductive_property_closes_at_k_zero() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let system = TransitionSystem::new(
            &logic,
            vec![x],
            vec![],
            logic.mk_eq(x, logic.mk_int(0)),
            logic.mk_eq(tm.var_version(x, 1), logic.mk_add([x, logic.mk_int(1)])),
            logic.mk_lt(x, logic.mk_int(0)),
        )
        .unwrap();
        let mut engine = Kind::new(&logic, Options::default().witness());
        let result = engine.solve(&system).unwrap();
        assert!(result.is_safe());
        assert!(result.invariant().is_some());
    }

    #[test]
    fn base_case_counterexample_depth() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let system = TransitionSystem::new(
            &logic,
            vec![x],
            vec![],
            logic.mk_eq(x, logic.mk_int(0)),
            logic.mk_eq(tm.var_version(x, 1), logic.mk_add([x, logic.mk_int(1)])),
            logic.mk_eq(x, logic.mk_int(5)),
        )
        .unwrap();
        let mut engine = Kind::new(&logic, Options::default());
        let result = engine.solve(&system).unwrap();
        assert_eq!(result, VerificationResult::unsafe_at(5));
    }
}
