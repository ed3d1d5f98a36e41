//! Transition systems over linear arithmetic
//!
//! A system is `(Init, Tr, Bad)` over an ordered list of state variables at
//! version 0. The next-state companions live at version 1; auxiliary
//! variables may occur in the transition relation only. Construction
//! validates the variable-purity invariants and normalises the three
//! formulas to negation normal form.

use crate::error::VerifierError;
use crate::time::TimeMachine;
use basalt_logic::{Logic, Term};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone)]
pub struct TransitionSystem {
    state_vars: Vec<Term>,
    next_vars: Vec<Term>,
    aux_vars: Vec<Term>,
    init: Term,
    transition: Term,
    bad: Term,
}

impl TransitionSystem {
    /// Build and validate a system. `state_vars` and `aux_vars` must be
    /// version-0 variables with pairwise distinct base names; `init` and
    /// `bad` may mention state variables only, `transition` state, next-state
    /// and auxiliary variables.
    pub fn new(
        logic: &Logic,
        state_vars: Vec<Term>,
        aux_vars: Vec<Term>,
        init: Term,
        transition: Term,
        bad: Term,
    ) -> Result<Self, VerifierError> {
        let tm = TimeMachine::new(logic);
        let mut names = FxHashSet::default();
        for &v in state_vars.iter().chain(aux_vars.iter()) {
            let Some((name, version, _)) = logic.var_info(v) else {
                return Err(VerifierError::InvalidSystem(
                    "state variable is not a variable term".into(),
                ));
            };
            if version != 0 {
                return Err(VerifierError::InvalidSystem(format!(
                    "variable {name} must be given at version 0"
                )));
            }
            if !names.insert(name.to_string()) {
                return Err(VerifierError::InvalidSystem(format!(
                    "duplicate variable base name {name}"
                )));
            }
        }
        let next_vars: Vec<Term> = state_vars.iter().map(|&v| tm.var_version(v, 1)).collect();

        let state_set: FxHashSet<Term> = state_vars.iter().copied().collect();
        let mut transition_vars: FxHashSet<Term> = state_set.clone();
        transition_vars.extend(next_vars.iter().copied());
        transition_vars.extend(aux_vars.iter().copied());

        for (fla, what) in [(init, "initial states"), (bad, "bad states")] {
            for v in logic.vars(fla) {
                if !state_set.contains(&v) {
                    return Err(VerifierError::InvalidSystem(format!(
                        "{what} mention non-state variable {}",
                        logic.pp(v)
                    )));
                }
            }
        }
        for v in logic.vars(transition) {
            if !transition_vars.contains(&v) {
                return Err(VerifierError::InvalidSystem(format!(
                    "transition relation mentions unexpected variable {}",
                    logic.pp(v)
                )));
            }
        }

        Ok(TransitionSystem {
            state_vars,
            next_vars,
            aux_vars,
            init: logic.to_nnf(init),
            transition: logic.to_nnf(transition),
            bad: logic.to_nnf(bad),
        })
    }

    pub fn state_vars(&self) -> &[Term] {
        &self.state_vars
    }

    pub fn next_vars(&self) -> &[Term] {
        &self.next_vars
    }

    pub fn aux_vars(&self) -> &[Term] {
        &self.aux_vars
    }

    pub fn init(&self) -> Term {
        self.init
    }

    pub fn transition(&self) -> Term {
        self.transition
    }

    pub fn bad(&self) -> Term {
        self.bad
    }
}
