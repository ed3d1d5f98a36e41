//! Exact quantifier elimination
//!
//! Disjunct by disjunct: equalities substitute variables away Gaussian
//! style, the remaining inequalities fall to Fourier–Motzkin resolution.
//! Exact for rational reasoning; over integers the result is the rational
//! shadow of the projection, so callers that turn eliminated formulas into
//! witnesses re-verify them before reporting.

use basalt_logic::linear::{classify_atom, parse_equation, AtomKind, LinRow};
use basalt_logic::{Logic, Rel, Sort, Term, TermNode};
use num_rational::BigRational;
use num_traits::{Signed, Zero};
use rustc_hash::FxHashSet;

pub struct QuantifierElimination<'a> {
    logic: &'a Logic,
}

/// One disjunct, split into equalities, inequality rows and Boolean literals.
struct Cube {
    eqs: Vec<LinRow>,
    rows: Vec<LinRow>,
    bools: Vec<Term>,
}

impl<'a> QuantifierElimination<'a> {
    pub fn new(logic: &'a Logic) -> Self {
        QuantifierElimination { logic }
    }

    /// `∃ vars. fla`, as a quantifier-free formula.
    pub fn eliminate(&self, fla: Term, vars: &[Term]) -> Term {
        let logic = self.logic;
        if vars.is_empty() {
            return fla;
        }
        let nnf = logic.to_nnf(fla);
        let mut cubes = Vec::new();
        self.enumerate_cubes(nnf, &mut Vec::new(), &mut cubes);
        let mut disjuncts = Vec::new();
        for literals in cubes {
            if let Some(term) = self.eliminate_from_cube(&literals, vars) {
                disjuncts.push(term);
            }
        }
        logic.mk_or(disjuncts)
    }

    /// Eliminate everything except `keep`.
    pub fn keep_only(&self, fla: Term, keep: &[Term]) -> Term {
        let keep_set: FxHashSet<Term> = keep.iter().copied().collect();
        let to_eliminate: Vec<Term> = self
            .logic
            .vars(fla)
            .into_iter()
            .filter(|v| !keep_set.contains(v))
            .collect();
        self.eliminate(fla, &to_eliminate)
    }

    fn enumerate_cubes(&self, t: Term, current: &mut Vec<Term>, out: &mut Vec<Vec<Term>>) {
        let logic = self.logic;
        match logic.node(t) {
            TermNode::True => out.push(current.clone()),
            TermNode::False => {}
            TermNode::And(args) => {
                self.enumerate_conj(&args, 0, current, out);
            }
            TermNode::Or(args) => {
                for &a in args.iter() {
                    self.enumerate_cubes(a, current, out);
                }
            }
            _ => {
                current.push(t);
                out.push(current.clone());
                current.pop();
            }
        }
    }

    fn enumerate_conj(
        &self,
        args: &[Term],
        index: usize,
        current: &mut Vec<Term>,
        out: &mut Vec<Vec<Term>>,
    ) {
        if index == args.len() {
            out.push(current.clone());
            return;
        }
        let logic = self.logic;
        let t = args[index];
        match logic.node(t) {
            TermNode::True => self.enumerate_conj(args, index + 1, current, out),
            TermNode::False => {}
            TermNode::And(inner) => {
                let mut merged: Vec<Term> = inner.to_vec();
                merged.extend_from_slice(&args[index + 1..]);
                self.enumerate_conj(&merged, 0, current, out);
            }
            TermNode::Or(inner) => {
                for &choice in inner.iter() {
                    let mut merged = vec![choice];
                    merged.extend_from_slice(&args[index + 1..]);
                    self.enumerate_conj(&merged, 0, current, out);
                }
            }
            _ => {
                current.push(t);
                self.enumerate_conj(args, index + 1, current, out);
                current.pop();
            }
        }
    }

    /// Eliminate the variables from one conjunction of literals. `None` when
    /// the disjunct collapses to `false`.
    fn eliminate_from_cube(&self, literals: &[Term], vars: &[Term]) -> Option<Term> {
        let logic = self.logic;
        let mut cube = Cube {
            eqs: Vec::new(),
            rows: Vec::new(),
            bools: Vec::new(),
        };
        for &lit in literals {
            match logic.node(lit) {
                TermNode::Cmp(Rel::Eq, a, b) => match parse_equation(logic, a, b) {
                    Ok(eq) => cube.eqs.push(eq),
                    Err(_) => cube.bools.push(lit),
                },
                TermNode::Cmp(_, _, _) => match classify_atom(logic, lit) {
                    Ok(AtomKind::Linear(rows)) => cube.rows.extend(rows),
                    _ => cube.bools.push(lit),
                },
                _ => cube.bools.push(lit),
            }
        }

        for &var in vars {
            if logic.sort_of(var) == Sort::Bool {
                // ∃b over a conjunction: drop the literals on b.
                cube.bools.retain(|&lit| !logic.vars(lit).contains(&var));
                continue;
            }
            self.eliminate_numeric(&mut cube, var)?;
        }

        let mut parts = cube.bools;
        for eq in &cube.eqs {
            if eq_is_false(eq) {
                return None;
            }
            if !is_eq_trivial(eq) {
                parts.push(eq_to_term(logic, eq));
            }
        }
        for row in &cube.rows {
            if row.is_contradiction() {
                return None;
            }
            if !row.is_trivial() {
                parts.push(row.to_term(logic));
            }
        }
        Some(logic.mk_and(parts))
    }

    fn eliminate_numeric(&self, cube: &mut Cube, var: Term) -> Option<()> {
        // Prefer an equality pivot: exact for any coefficient.
        if let Some(pivot_idx) = cube.eqs.iter().position(|e| !e.coeff(var).is_zero()) {
            let pivot = cube.eqs.swap_remove(pivot_idx);
            let c = pivot.coeff(var);
            for eq in cube.eqs.iter_mut() {
                subtract_multiple(eq, &pivot, &(eq.coeff(var) / &c), var);
            }
            for row in cube.rows.iter_mut() {
                subtract_multiple(row, &pivot, &(row.coeff(var) / &c), var);
            }
            cube.eqs.retain(|e| !is_eq_trivial(e));
            cube.rows.retain(|r| !r.is_trivial());
            if cube.eqs.iter().any(eq_is_false) || cube.rows.iter().any(|r| r.is_contradiction())
            {
                return None;
            }
            return Some(());
        }

        // Fourier–Motzkin resolution of the inequalities on the variable.
        let (with_var, rest): (Vec<LinRow>, Vec<LinRow>) = cube
            .rows
            .drain(..)
            .partition(|r| !r.coeff(var).is_zero());
        cube.rows = rest;
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        for r in with_var {
            if r.coeff(var).is_positive() {
                uppers.push(r);
            } else {
                lowers.push(r);
            }
        }
        for u in &uppers {
            for l in &lowers {
                let mut combined = LinRow::empty();
                let us = u.coeff(var).recip();
                let ls = (-l.coeff(var)).recip();
                for (v, c) in &u.coeffs {
                    if *v != var {
                        combined.add_coeff(*v, c * &us);
                    }
                }
                for (v, c) in &l.coeffs {
                    if *v != var {
                        combined.add_coeff(*v, c * &ls);
                    }
                }
                combined.bound = &u.bound * &us + &l.bound * &ls;
                combined.strict = u.strict || l.strict;
                if combined.is_contradiction() {
                    return None;
                }
                if !combined.is_trivial() {
                    cube.rows.push(combined);
                }
            }
        }
        Some(())
    }
}

/// `row - factor · pivot`, removing `var`.
fn subtract_multiple(row: &mut LinRow, pivot: &LinRow, factor: &BigRational, var: Term) {
    if factor.is_zero() {
        return;
    }
    for (v, c) in &pivot.coeffs {
        row.add_coeff(*v, -(c * factor));
    }
    row.bound -= &pivot.bound * factor;
    debug_assert!(row.coeff(var).is_zero());
}

fn is_eq_trivial(eq: &LinRow) -> bool {
    eq.coeffs.is_empty() && eq.bound.is_zero()
}

fn eq_is_false(eq: &LinRow) -> bool {
    eq.coeffs.is_empty() && !eq.bound.is_zero()
}

fn eq_to_term(logic: &Logic, eq: &LinRow) -> Term {
    // Reuse the inequality printer and flip it into an equality.
    let le = eq.to_term(logic);
    match logic.node(le) {
        TermNode::Cmp(Rel::Leq, a, b) => logic.mk_eq(a, b),
        _ => le,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_logic::{check_formula, Model, Value};

    #[test]
    fn equality_chain_is_exact() {
        let logic = Logic::new();
        let x0 = logic.mk_var("x", Sort::Int);
        let x1 = logic.mk_var_versioned("x", 1, Sort::Int);
        let x2 = logic.mk_var_versioned("x", 2, Sort::Int);
        // x1 = x0 + 2 and x2 = x1 + 2; eliminating x1 gives x2 = x0 + 4.
        let fla = logic.mk_and([
            logic.mk_eq(x1, logic.mk_add([x0, logic.mk_int(2)])),
            logic.mk_eq(x2, logic.mk_add([x1, logic.mk_int(2)])),
        ]);
        let qe = QuantifierElimination::new(&logic);
        let result = qe.eliminate(fla, &[x1]);
        assert!(!logic.vars(result).contains(&x1));
        let mut model = Model::new();
        model.insert(x0, Value::from_int(0));
        model.insert(x2, Value::from_int(4));
        assert!(model.holds(&logic, result));
        let mut bad = Model::new();
        bad.insert(x0, Value::from_int(0));
        bad.insert(x2, Value::from_int(5));
        assert!(!bad.holds(&logic, result));
    }

    #[test]
    fn bounds_resolve() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        // y <= x and x <= 3: eliminating x leaves y <= 3.
        let fla = logic.mk_and([logic.mk_leq(y, x), logic.mk_leq(x, logic.mk_int(3))]);
        let qe = QuantifierElimination::new(&logic);
        let result = qe.eliminate(fla, &[x]);
        assert_eq!(result, logic.mk_leq(y, logic.mk_int(3)));
    }

    #[test]
    fn disjunctions_are_handled_per_branch() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let fla = logic.mk_or([
            logic.mk_and([logic.mk_eq(y, x), logic.mk_leq(x, logic.mk_int(0))]),
            logic.mk_eq(y, logic.mk_int(9)),
        ]);
        let qe = QuantifierElimination::new(&logic);
        let result = qe.eliminate(fla, &[x]);
        assert!(!logic.vars(result).contains(&x));
        // y = -5 satisfiable via the first branch, y = 9 via the second.
        for v in [-5i64, 9] {
            let mut model = Model::new();
            model.insert(y, Value::from_int(v));
            assert!(model.holds(&logic, result), "y = {v} lost");
        }
        let mut model = Model::new();
        model.insert(y, Value::from_int(3));
        assert!(!model.holds(&logic, result));
    }

    #[test]
    fn contradictory_cube_disappears() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let fla = logic.mk_and([
            logic.mk_leq(logic.mk_int(5), x),
            logic.mk_leq(x, logic.mk_int(2)),
        ]);
        let qe = QuantifierElimination::new(&logic);
        let result = qe.eliminate(fla, &[x]);
        assert!(logic.is_false(result));
    }

    #[test]
    fn unconstrained_variable_vanishes() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let fla = logic.mk_leq(y, logic.mk_int(1));
        let qe = QuantifierElimination::new(&logic);
        assert_eq!(qe.eliminate(fla, &[x]), fla);
    }

    #[test]
    fn keep_only_drops_the_complement() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let fla = logic.mk_and([logic.mk_eq(x, y), logic.mk_leq(logic.mk_int(0), y)]);
        let qe = QuantifierElimination::new(&logic);
        let result = qe.keep_only(fla, &[x]);
        assert_eq!(logic.vars(result), vec![x]);
        assert!(check_formula(&logic, result).is_sat());
    }
}
