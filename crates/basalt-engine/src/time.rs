//! Versioning of state variables across time steps
//!
//! The time machine shifts every variable of a formula by an integer offset:
//! `shift(f, 1)` turns a current-state formula into its next-state copy.
//! Shifting is a group action: `shift(shift(f, a), b) == shift(f, a + b)`.
//! Results are memoised per `(term, offset)` pair for the machine's lifetime.

use basalt_logic::{Logic, Term, TermNode};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

pub struct TimeMachine<'a> {
    logic: &'a Logic,
    cache: RefCell<FxHashMap<(Term, i32), Term>>,
}

impl<'a> TimeMachine<'a> {
    pub fn new(logic: &'a Logic) -> Self {
        TimeMachine {
            logic,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn logic(&self) -> &'a Logic {
        self.logic
    }

    /// The copy of a variable at `version + delta`.
    pub fn var_version(&self, var: Term, delta: i32) -> Term {
        let (name, version, sort) = self
            .logic
            .var_info(var)
            .expect("var_version called on a non-variable term");
        self.logic.mk_var_versioned(&name, version + delta, sort)
    }

    /// Shift every variable of `fla` by `delta` versions.
    pub fn shift(&self, fla: Term, delta: i32) -> Term {
        if delta == 0 {
            return fla;
        }
        if let Some(&hit) = self.cache.borrow().get(&(fla, delta)) {
            return hit;
        }
        let logic = self.logic;
        let result = match logic.node(fla) {
            TermNode::True | TermNode::False | TermNode::Num(_) => fla,
            TermNode::Var { .. } => self.var_version(fla, delta),
            TermNode::Not(a) => {
                let a = self.shift(a, delta);
                logic.mk_not(a)
            }
            TermNode::Neg(a) => {
                let a = self.shift(a, delta);
                logic.mk_neg(a)
            }
            TermNode::And(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.shift(a, delta)).collect();
                logic.mk_and(args)
            }
            TermNode::Or(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.shift(a, delta)).collect();
                logic.mk_or(args)
            }
            TermNode::Add(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.shift(a, delta)).collect();
                logic.mk_add(args)
            }
            TermNode::Cmp(rel, a, b) => {
                let a = self.shift(a, delta);
                let b = self.shift(b, delta);
                match rel {
                    basalt_logic::Rel::Eq => logic.mk_eq(a, b),
                    basalt_logic::Rel::Leq => logic.mk_leq(a, b),
                    basalt_logic::Rel::Lt => logic.mk_lt(a, b),
                }
            }
            TermNode::Sub(a, b) => {
                let a = self.shift(a, delta);
                let b = self.shift(b, delta);
                logic.mk_sub(a, b)
            }
            TermNode::Mul(a, b) => {
                let a = self.shift(a, delta);
                let b = self.shift(b, delta);
                logic.mk_mul(a, b)
            }
        };
        self.cache.borrow_mut().insert((fla, delta), result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_logic::Sort;
    use proptest::prelude::*;

    fn sample_formula(logic: &Logic) -> Term {
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        logic.mk_and([
            logic.mk_leq(logic.mk_add([x, logic.mk_int(1)]), y),
            logic.mk_or([logic.mk_eq(x, y), logic.mk_lt(y, logic.mk_int(0))]),
        ])
    }

    #[test]
    fn shift_moves_variable_versions() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let x = logic.mk_var("x", Sort::Int);
        let shifted = tm.shift(x, 2);
        assert_eq!(logic.var_info(shifted).unwrap().1, 2);
        let back = tm.shift(shifted, -2);
        assert_eq!(back, x);
    }

    #[test]
    fn shift_by_zero_is_identity() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let fla = sample_formula(&logic);
        assert_eq!(tm.shift(fla, 0), fla);
    }

    #[test]
    fn shift_is_memoised_and_stable() {
        let logic = Logic::new();
        let tm = TimeMachine::new(&logic);
        let fla = sample_formula(&logic);
        let once = tm.shift(fla, 3);
        assert_eq!(tm.shift(fla, 3), once);
    }

    proptest! {
        #[test]
        fn shift_composes_additively(a in -4i32..=4, b in -4i32..=4) {
            let logic = Logic::new();
            let tm = TimeMachine::new(&logic);
            let fla = sample_formula(&logic);
            prop_assert_eq!(tm.shift(tm.shift(fla, a), b), tm.shift(fla, a + b));
        }
    }
}
