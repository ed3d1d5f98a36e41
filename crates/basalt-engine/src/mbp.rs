//! Model-based projection
//!
//! Under-approximating quantifier elimination guided by a satisfying model:
//! `project(φ, X, m)` returns `ψ` with `m ⊨ ψ`, `ψ` free of `X`, and
//! `ψ ⇒ ∃X. φ`. The implicant of `φ` true under `m` is extracted first;
//! each variable is then eliminated Loos–Weispfenning style, resolving every
//! upper bound against the lower bound that is tightest in the model. A unit
//! coefficient on the variable keeps the elimination exact for integers;
//! with larger coefficients the variable is pinned to its model value
//! instead, which stays sound for an under-approximation.

use basalt_logic::linear::{classify_atom, AtomKind, LinRow};
use basalt_logic::{Logic, Model, Rel, Sort, Term, TermNode};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::{FxHashMap, FxHashSet};

pub struct ModelBasedProjection<'a> {
    logic: &'a Logic,
}

impl<'a> ModelBasedProjection<'a> {
    pub fn new(logic: &'a Logic) -> Self {
        ModelBasedProjection { logic }
    }

    /// Project `vars` out of `fla` under `model`.
    pub fn project(&self, fla: Term, vars: &[Term], model: &Model) -> Term {
        let logic = self.logic;
        if vars.is_empty() {
            return fla;
        }
        let mut current = logic.to_nnf(fla);
        debug_assert!(model.holds(logic, current), "model does not satisfy input");

        // Boolean variables are substituted by their model value directly.
        let mut bool_subst: FxHashMap<Term, Term> = FxHashMap::default();
        let mut arith_vars: Vec<Term> = Vec::new();
        for &v in vars {
            match logic.sort_of(v) {
                Sort::Bool => {
                    let value = model.eval_bool(logic, v).unwrap_or(false);
                    bool_subst.insert(v, logic.mk_bool(value));
                }
                _ => arith_vars.push(v),
            }
        }
        if !bool_subst.is_empty() {
            current = logic.substitute(current, &bool_subst);
        }
        if arith_vars.is_empty() {
            return current;
        }

        let mut literals = Vec::new();
        self.implicant(current, model, &mut literals);

        for &var in &arith_vars {
            literals = self.eliminate_var(var, literals, model);
        }
        logic.mk_and(literals)
    }

    /// Eliminate everything except `keep` from `fla`.
    pub fn keep_only(&self, fla: Term, keep: &[Term], model: &Model) -> Term {
        let keep_set: FxHashSet<Term> = keep.iter().copied().collect();
        let to_eliminate: Vec<Term> = self
            .logic
            .vars(fla)
            .into_iter()
            .filter(|v| !keep_set.contains(v))
            .collect();
        self.project(fla, &to_eliminate, model)
    }

    /// Collect the implicant of an NNF formula that the model satisfies.
    fn implicant(&self, t: Term, model: &Model, out: &mut Vec<Term>) {
        let logic = self.logic;
        match logic.node(t) {
            TermNode::True => {}
            TermNode::And(args) => {
                for &a in args.iter() {
                    self.implicant(a, model, out);
                }
            }
            TermNode::Or(args) => {
                for &a in args.iter() {
                    if model.holds(logic, a) {
                        self.implicant(a, model, out);
                        return;
                    }
                }
                debug_assert!(false, "no satisfied disjunct under the model");
            }
            _ => out.push(t),
        }
    }

    fn eliminate_var(&self, var: Term, literals: Vec<Term>, model: &Model) -> Vec<Term> {
        let logic = self.logic;
        let (with_var, mut rest): (Vec<Term>, Vec<Term>) = literals
            .into_iter()
            .partition(|&lit| logic.vars(lit).contains(&var));
        if with_var.is_empty() {
            return rest;
        }

        // A unit-coefficient equality substitutes the variable away exactly.
        if let Some(expr) = self.solvable_equality(var, &with_var) {
            let mut map = FxHashMap::default();
            map.insert(var, expr);
            for lit in with_var {
                let substituted = logic.substitute(lit, &map);
                if !logic.is_true(substituted) {
                    rest.push(substituted);
                }
            }
            return rest;
        }

        // Gather the bounds on the variable.
        let mut rows: Vec<LinRow> = Vec::new();
        for &lit in &with_var {
            match classify_atom(logic, lit) {
                Ok(AtomKind::Linear(atom_rows)) => rows.extend(atom_rows),
                _ => {
                    // Not a linear bound on the variable; pin the model value.
                    return self.pin_to_model(var, with_var, rest, model);
                }
            }
        }
        let unit = rows.iter().all(|r| {
            let c = r.coeff(var);
            c.is_zero() || c.abs().is_one()
        });
        if logic.sort_of(var) == Sort::Int && !unit {
            return self.pin_to_model(var, with_var, rest, model);
        }

        let mut lowers: Vec<LinRow> = Vec::new();
        let mut uppers: Vec<LinRow> = Vec::new();
        let mut free: Vec<LinRow> = Vec::new();
        for r in rows {
            let c = r.coeff(var);
            if c.is_zero() {
                free.push(r);
            } else if c.is_positive() {
                uppers.push(r);
            } else {
                lowers.push(r);
            }
        }
        for r in free {
            if !r.is_trivial() {
                rest.push(r.to_term(logic));
            }
        }
        if lowers.is_empty() || uppers.is_empty() {
            // Unbounded on one side; any value beyond the remaining bounds
            // witnesses the existential.
            return rest;
        }

        // Lower bound tightest in the model.
        let bound_value = |row: &LinRow| -> BigRational {
            let c = row.coeff(var);
            let mut rest_val = BigRational::from_integer(0.into());
            for (v, coeff) in &row.coeffs {
                if *v != var {
                    rest_val += coeff * model.num(*v);
                }
            }
            (&row.bound - rest_val) / c
        };
        let best = lowers
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| bound_value(a).cmp(&bound_value(b)))
            .map(|(i, _)| i)
            .expect("non-empty lower bounds");
        let chosen = lowers[best].clone();
        let chosen_scale = (-chosen.coeff(var)).recip();

        for u in &uppers {
            let resolvent = resolve(&chosen, &chosen_scale, u, &u.coeff(var).recip(), var);
            if !resolvent.is_trivial() {
                rest.push(resolvent.to_term(logic));
            }
        }
        for (i, l) in lowers.iter().enumerate() {
            if i == best {
                continue;
            }
            // The chosen bound dominates the others: L_other <= L_chosen.
            let mut dominance = scaled(l, &(-l.coeff(var)).recip());
            let chosen_scaled = scaled(&chosen, &chosen_scale);
            for (v, c) in &chosen_scaled.coeffs {
                if *v != var {
                    dominance.add_coeff(*v, -c.clone());
                }
            }
            dominance.coeffs.remove(&var);
            dominance.bound -= &chosen_scaled.bound;
            dominance.strict = chosen.strict && !l.strict;
            // dominance now encodes rest_other - rest_chosen <= b_other - b_chosen
            if !dominance.is_trivial() {
                rest.push(dominance.to_term(logic));
            }
        }
        rest
    }

    /// Find an equality with a ±1 coefficient on `var` and solve it.
    fn solvable_equality(&self, var: Term, literals: &[Term]) -> Option<Term> {
        let logic = self.logic;
        for &lit in literals {
            let TermNode::Cmp(Rel::Eq, _, _) = logic.node(lit) else {
                continue;
            };
            let Ok(AtomKind::Linear(rows)) = classify_atom(logic, lit) else {
                continue;
            };
            let row = &rows[0];
            let c = row.coeff(var);
            if !c.abs().is_one() || !c.denom().is_one() {
                continue;
            }
            // Σ c_i v_i = b, so var = (b - Σ_{i≠var} c_i v_i) / c.
            if !row
                .coeffs
                .iter()
                .all(|(_, coeff)| coeff.denom().is_one())
            {
                continue;
            }
            let mut terms = Vec::new();
            terms.push(logic.mk_num((&row.bound / &c).to_integer()));
            for (&v, coeff) in &row.coeffs {
                if v == var {
                    continue;
                }
                let factor = (-(coeff / &c)).to_integer();
                if factor.is_one() {
                    terms.push(v);
                } else if factor == (-1).into() {
                    terms.push(logic.mk_neg(v));
                } else {
                    terms.push(logic.mk_mul(logic.mk_num(factor), v));
                }
            }
            if row.bound.denom().is_one() {
                return Some(logic.mk_add(terms));
            }
        }
        None
    }

    /// Replace the variable by its model value in the given literals.
    fn pin_to_model(
        &self,
        var: Term,
        with_var: Vec<Term>,
        mut rest: Vec<Term>,
        model: &Model,
    ) -> Vec<Term> {
        let logic = self.logic;
        let value = model.num(var);
        let constant = logic.mk_num(value.floor().to_integer());
        let mut map = FxHashMap::default();
        map.insert(var, constant);
        for lit in with_var {
            let substituted = logic.substitute(lit, &map);
            if !logic.is_true(substituted) {
                rest.push(substituted);
            }
        }
        rest
    }
}

fn scaled(row: &LinRow, scale: &BigRational) -> LinRow {
    let mut out = LinRow::empty();
    for (v, c) in &row.coeffs {
        out.coeffs.insert(*v, c * scale);
    }
    out.bound = &row.bound * scale;
    out.strict = row.strict;
    out
}

/// Resolve a lower and an upper bound on `var`, eliminating it.
fn resolve(
    lower: &LinRow,
    lower_scale: &BigRational,
    upper: &LinRow,
    upper_scale: &BigRational,
    var: Term,
) -> LinRow {
    let l = scaled(lower, lower_scale);
    let u = scaled(upper, upper_scale);
    let mut out = LinRow::empty();
    for (v, c) in u.coeffs.iter().chain(l.coeffs.iter()) {
        if *v != var {
            out.add_coeff(*v, c.clone());
        }
    }
    out.bound = &u.bound + &l.bound;
    out.strict = lower.strict || upper.strict;
    out
}
