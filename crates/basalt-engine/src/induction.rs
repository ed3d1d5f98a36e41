//! k-induction utilities shared by the engines
//!
//! A k-inductive invariant `P` strengthens to the 1-inductive
//!
//! ```text
//! P(x₀) ∧ ⋀_{j=1..k-1} ¬∃x₁..x_j. Tr₀ ∧ P₁ ∧ Tr₁ ∧ … ∧ Tr_{j-1} ∧ ¬P_j
//! ```
//!
//! computed by successive quantifier elimination, reusing the partially
//! eliminated prefix between steps.

use crate::error::VerifierError;
use crate::qe::QuantifierElimination;
use crate::time::TimeMachine;
use basalt_logic::{Logic, SatResult, SmtSolver, Term};
use tracing::debug;

fn vars_at(tm: &TimeMachine<'_>, state_vars: &[Term], version: i32) -> Vec<Term> {
    state_vars.iter().map(|&v| tm.var_version(v, version)).collect()
}

/// Lift a k-inductive invariant to a 1-inductive one.
pub fn kinductive_to_inductive(
    logic: &Logic,
    tm: &TimeMachine<'_>,
    transition: Term,
    state_vars: &[Term],
    invariant: Term,
    k: u64,
) -> Term {
    if k <= 1 {
        return invariant;
    }
    let qe = QuantifierElimination::new(logic);
    let vars0 = state_vars.to_vec();
    let mut parts = vec![invariant];

    // Step 1: no prefix to reuse yet.
    let step_one = logic.mk_and([transition, logic.mk_not(tm.shift(invariant, 1))]);
    let eliminated = qe.keep_only(step_one, &vars0);
    parts.push(logic.mk_not(eliminated));

    // Steps 2..k-1, extending the eliminated prefix one block at a time.
    let mut helper = transition;
    for i in 2..k {
        debug!(step = i, of = k, "lifting k-inductive invariant");
        let extended = logic.mk_and([
            helper,
            tm.shift(invariant, (i - 1) as i32),
            tm.shift(transition, (i - 1) as i32),
        ]);
        helper = qe.eliminate(extended, &vars_at(tm, state_vars, (i - 1) as i32));
        let blocked = logic.mk_and([helper, logic.mk_not(tm.shift(invariant, i as i32))]);
        let eliminated = qe.keep_only(blocked, &vars0);
        parts.push(logic.mk_not(eliminated));
    }
    logic.mk_and(parts)
}

/// Check that `fla` is a k-inductive invariant of `(init, transition)`:
/// every base case `Init ∧ Tr₀ ∧ … ∧ Tr_{i-1} ∧ ¬fla_i` must be
/// unsatisfiable, as must the induction step.
pub fn verify_kinductive(
    logic: &Logic,
    tm: &TimeMachine<'_>,
    init: Term,
    transition: Term,
    fla: Term,
    k: u64,
) -> Result<bool, VerifierError> {
    // Base cases.
    let mut solver = SmtSolver::new(logic);
    solver.assert(init);
    for i in 0..k {
        solver.push();
        solver.assert(logic.mk_not(tm.shift(fla, i as i32)));
        match solver.check() {
            SatResult::Unsat => {}
            SatResult::Sat => {
                debug!(case = i, "k-induction base case fails");
                return Ok(false);
            }
            SatResult::Unknown => {
                return Err(VerifierError::SolverUnknown("k-induction base case".into()))
            }
        }
        solver.pop();
        solver.assert(tm.shift(transition, i as i32));
    }
    // Induction step.
    let mut step = SmtSolver::new(logic);
    for i in 0..k {
        step.assert(tm.shift(fla, i as i32));
        step.assert(tm.shift(transition, i as i32));
    }
    step.assert(logic.mk_not(tm.shift(fla, k as i32)));
    match step.check() {
        SatResult::Unsat => Ok(true),
        SatResult::Sat => {
            debug!("k-induction step fails");
            Ok(false)
        }
        SatResult::Unknown => Err(VerifierError::SolverUnknown("k-induction step".into())),
    }
}
