//! Normalisation of comparison atoms into linear rows
//!
//! A row is `Σ cᵢ·xᵢ ≤ b` (strict when marked). Equalities expand into the
//! two opposite rows. Rows whose variables are all integer-sorted are scaled
//! to integer coefficients and tightened: `Σ c·x < b` becomes
//! `Σ c·x ≤ ⌈b⌉ - 1`, and a fractional bound of a non-strict row is floored.

use crate::term::{Logic, Rel, Sort, Term, TermNode};
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashMap;

/// The atom was not a linear-arithmetic literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonLinear;

/// `Σ coeffs·var ≤ bound`, strict when `strict`.
#[derive(Debug, Clone)]
pub struct LinRow {
    pub coeffs: FxHashMap<Term, BigRational>,
    pub bound: BigRational,
    pub strict: bool,
}

impl LinRow {
    /// The trivial row `0 <= 0`.
    pub fn empty() -> Self {
        LinRow {
            coeffs: FxHashMap::default(),
            bound: BigRational::zero(),
            strict: false,
        }
    }

    pub fn coeff(&self, var: Term) -> BigRational {
        self.coeffs.get(&var).cloned().unwrap_or_else(BigRational::zero)
    }

    pub fn add_coeff(&mut self, var: Term, delta: BigRational) {
        let updated = self.coeff(var) + delta;
        if updated.is_zero() {
            self.coeffs.remove(&var);
        } else {
            self.coeffs.insert(var, updated);
        }
    }

    /// Trivially true (`0 ≤ b`, b nonnegative) once all coefficients cancel.
    pub fn is_trivial(&self) -> bool {
        self.coeffs.is_empty()
            && (self.bound.is_positive() || (!self.strict && self.bound.is_zero()))
    }

    /// Contradictory constant row.
    pub fn is_contradiction(&self) -> bool {
        self.coeffs.is_empty()
            && (self.bound.is_negative() || (self.strict && self.bound.is_zero()))
    }

    /// Scale coefficients to integers and, when every variable is
    /// integer-sorted, tighten the bound.
    pub fn normalize(&mut self, logic: &Logic) {
        if self.coeffs.is_empty() {
            return;
        }
        let mut scale = BigInt::one();
        for c in self.coeffs.values() {
            scale = scale.lcm(c.denom());
        }
        if !scale.is_one() {
            let factor = BigRational::from_integer(scale);
            for c in self.coeffs.values_mut() {
                *c *= &factor;
            }
            self.bound *= &factor;
        }
        let all_int = self
            .coeffs
            .keys()
            .all(|&v| logic.sort_of(v) == Sort::Int);
        if all_int {
            // Divide by the gcd of the coefficients for a tighter cut.
            let mut g = BigInt::zero();
            for c in self.coeffs.values() {
                g = g.gcd(c.numer());
            }
            if !g.is_zero() && !g.is_one() {
                let factor = BigRational::from_integer(g);
                for c in self.coeffs.values_mut() {
                    *c /= &factor;
                }
                self.bound /= &factor;
            }
            if self.strict {
                self.bound = BigRational::from_integer(self.bound.ceil().to_integer() - 1);
                self.strict = false;
            } else if !self.bound.is_integer() {
                self.bound = self.bound.floor();
            }
        }
    }

    /// Rebuild the row as a term, with integer coefficients on both sides.
    pub fn to_term(&self, logic: &Logic) -> Term {
        if self.coeffs.is_empty() {
            return logic.mk_bool(!self.is_contradiction());
        }
        let mut scale = BigInt::one();
        for c in self.coeffs.values() {
            scale = scale.lcm(c.denom());
        }
        scale = scale.lcm(self.bound.denom());
        let factor = BigRational::from_integer(scale);

        let mut vars: Vec<Term> = self.coeffs.keys().copied().collect();
        vars.sort_unstable();
        let mut terms = Vec::with_capacity(vars.len());
        for v in vars {
            let c = (self.coeff(v) * &factor).to_integer();
            if c.is_one() {
                terms.push(v);
            } else if c == BigInt::from(-1) {
                terms.push(logic.mk_neg(v));
            } else {
                terms.push(logic.mk_mul(logic.mk_num(c), v));
            }
        }
        let lhs = logic.mk_add(terms);
        let rhs = logic.mk_num((self.bound.clone() * &factor).to_integer());
        if self.strict {
            logic.mk_lt(lhs, rhs)
        } else {
            logic.mk_leq(lhs, rhs)
        }
    }
}

/// An NNF literal, classified.
#[derive(Debug, Clone)]
pub enum AtomKind {
    /// Boolean variable or its negation.
    BoolLit { var: Term, positive: bool },
    /// Conjunction of linear rows (one for inequalities, two for equalities).
    Linear(Vec<LinRow>),
}

/// Classify an NNF literal into a Boolean literal or linear rows.
pub fn classify_atom(logic: &Logic, atom: Term) -> Result<AtomKind, NonLinear> {
    match logic.node(atom) {
        TermNode::Var { sort: Sort::Bool, .. } => Ok(AtomKind::BoolLit {
            var: atom,
            positive: true,
        }),
        TermNode::Not(inner) => match logic.node(inner) {
            TermNode::Var { sort: Sort::Bool, .. } => Ok(AtomKind::BoolLit {
                var: inner,
                positive: false,
            }),
            _ => Err(NonLinear),
        },
        TermNode::Cmp(rel, a, b) => {
            let mut rows = Vec::with_capacity(2);
            match rel {
                Rel::Leq | Rel::Lt => {
                    let mut row = LinRow::empty();
                    accumulate(logic, a, &BigRational::one(), &mut row)?;
                    accumulate(logic, b, &-BigRational::one(), &mut row)?;
                    row.strict = rel == Rel::Lt;
                    row.normalize(logic);
                    rows.push(row);
                }
                Rel::Eq => {
                    let mut le = LinRow::empty();
                    accumulate(logic, a, &BigRational::one(), &mut le)?;
                    accumulate(logic, b, &-BigRational::one(), &mut le)?;
                    let mut ge = LinRow::empty();
                    accumulate(logic, b, &BigRational::one(), &mut ge)?;
                    accumulate(logic, a, &-BigRational::one(), &mut ge)?;
                    le.normalize(logic);
                    ge.normalize(logic);
                    rows.push(le);
                    rows.push(ge);
                }
            }
            Ok(AtomKind::Linear(rows))
        }
        _ => Err(NonLinear),
    }
}

/// Parse `lhs = rhs` as the linear equation `Σ c·x = bound`, without the
/// integer tightening applied to inequality rows.
pub fn parse_equation(logic: &Logic, lhs: Term, rhs: Term) -> Result<LinRow, NonLinear> {
    let mut row = LinRow::empty();
    accumulate(logic, lhs, &BigRational::one(), &mut row)?;
    accumulate(logic, rhs, &-BigRational::one(), &mut row)?;
    Ok(row)
}

/// Accumulate `mult · expr` into the row's left-hand side. The constant part
/// moves to the bound with flipped sign.
fn accumulate(
    logic: &Logic,
    expr: Term,
    mult: &BigRational,
    row: &mut LinRow,
) -> Result<(), NonLinear> {
    match logic.node(expr) {
        TermNode::Num(n) => {
            row.bound -= mult * BigRational::from_integer(n);
            Ok(())
        }
        TermNode::Var { sort, .. } => {
            if sort == Sort::Bool {
                return Err(NonLinear);
            }
            row.add_coeff(expr, mult.clone());
            Ok(())
        }
        TermNode::Add(args) => {
            for a in args.iter() {
                accumulate(logic, *a, mult, row)?;
            }
            Ok(())
        }
        TermNode::Sub(a, b) => {
            accumulate(logic, a, mult, row)?;
            accumulate(logic, b, &-mult.clone(), row)
        }
        TermNode::Neg(a) => accumulate(logic, a, &-mult.clone(), row),
        TermNode::Mul(a, b) => match (logic.node(a), logic.node(b)) {
            (TermNode::Num(c), _) => {
                accumulate(logic, b, &(mult * BigRational::from_integer(c)), row)
            }
            (_, TermNode::Num(c)) => {
                accumulate(logic, a, &(mult * BigRational::from_integer(c)), row)
            }
            _ => Err(NonLinear),
        },
        _ => Err(NonLinear),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_rat(n: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(n))
    }

    #[test]
    fn le_atom_becomes_one_row() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let atom = logic.mk_leq(x, logic.mk_int(5));
        let AtomKind::Linear(rows) = classify_atom(&logic, atom).unwrap() else {
            panic!("expected linear atom");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coeff(x), int_rat(1));
        assert_eq!(rows[0].bound, int_rat(5));
        assert!(!rows[0].strict);
    }

    #[test]
    fn strict_integer_bound_is_tightened() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let atom = logic.mk_lt(x, logic.mk_int(5));
        let AtomKind::Linear(rows) = classify_atom(&logic, atom).unwrap() else {
            panic!("expected linear atom");
        };
        assert_eq!(rows[0].bound, int_rat(4));
        assert!(!rows[0].strict);
    }

    #[test]
    fn equality_becomes_two_rows() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        let atom = logic.mk_eq(logic.mk_add([x, logic.mk_int(1)]), y);
        let AtomKind::Linear(rows) = classify_atom(&logic, atom).unwrap() else {
            panic!("expected linear atom");
        };
        assert_eq!(rows.len(), 2);
        // One direction per row: x - y <= -1 and y - x <= 1, in the order
        // the interned equality orients them.
        let (le, ge) = if rows[0].coeff(x) == int_rat(1) {
            (&rows[0], &rows[1])
        } else {
            (&rows[1], &rows[0])
        };
        assert_eq!(le.coeff(x), int_rat(1));
        assert_eq!(le.coeff(y), int_rat(-1));
        assert_eq!(le.bound, int_rat(-1));
        assert_eq!(ge.coeff(x), int_rat(-1));
        assert_eq!(ge.coeff(y), int_rat(1));
        assert_eq!(ge.bound, int_rat(1));
    }

    #[test]
    fn coefficient_gcd_tightens_integer_rows() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        // 2x <= 5 tightens to x <= 2
        let atom = logic.mk_leq(logic.mk_mul(logic.mk_int(2), x), logic.mk_int(5));
        let AtomKind::Linear(rows) = classify_atom(&logic, atom).unwrap() else {
            panic!("expected linear atom");
        };
        assert_eq!(rows[0].coeff(x), int_rat(1));
        assert_eq!(rows[0].bound, int_rat(2));
    }

    #[test]
    fn row_to_term_round_trips_shape() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let atom = logic.mk_leq(x, logic.mk_int(3));
        let AtomKind::Linear(rows) = classify_atom(&logic, atom).unwrap() else {
            panic!("expected linear atom");
        };
        assert_eq!(rows[0].to_term(&logic), atom);
    }

    #[test]
    fn bool_literals_classify() {
        let logic = Logic::new();
        let p = logic.mk_var("p", Sort::Bool);
        assert!(matches!(
            classify_atom(&logic, p),
            Ok(AtomKind::BoolLit { positive: true, .. })
        ));
        assert!(matches!(
            classify_atom(&logic, logic.mk_not(p)),
            Ok(AtomKind::BoolLit { positive: false, .. })
        ));
    }
}
