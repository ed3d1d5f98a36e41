//! Fourier–Motzkin elimination with certificate tracking
//!
//! Feasibility of a conjunction of linear rows is decided by eliminating
//! variables one at a time. Every derived row carries the non-negative
//! multipliers of the source rows it was combined from, so an infeasible
//! system yields a Farkas certificate. Integer variables are handled by
//! branch and bound around the rational core: when back-substitution cannot
//! place an integer in a variable's feasible interval, the problem splits on
//! a cut through that interval. Cuts are recorded as extra certificate
//! sources so interpolation can attribute them to a partition.

use crate::linear::LinRow;
use crate::term::{Logic, Sort, Term};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashMap;

/// Where a certificate source comes from.
#[derive(Debug, Clone)]
pub(crate) enum Origin {
    /// Index into the caller's atom list.
    Input(usize),
    /// Branch cut `var <= c`.
    CutLe(Term, BigInt),
    /// Branch cut `var >= c`.
    CutGe(Term, BigInt),
}

/// A row with its Farkas multipliers over certificate sources.
#[derive(Debug, Clone)]
pub(crate) struct CRow {
    pub row: LinRow,
    pub lam: Vec<(usize, BigRational)>,
}

/// Unsatisfiability proof: a Farkas combination, possibly under a tree of
/// integer branch cuts.
#[derive(Debug, Clone)]
pub(crate) enum Proof {
    Farkas(Vec<(usize, BigRational)>),
    Split {
        var: Term,
        lo: Box<Proof>,
        hi: Box<Proof>,
    },
}

pub(crate) enum LiaOutcome {
    Sat(FxHashMap<Term, BigRational>),
    Unsat(Proof),
    /// Branch budget exhausted.
    Unknown,
}

enum FmOutcome {
    Feasible(FxHashMap<Term, BigRational>),
    Infeasible(Vec<(usize, BigRational)>),
    /// Rationally feasible, but no integer fits in `var`'s interval under
    /// the chosen assignment; `at` is a point inside that interval.
    IntGap { var: Term, at: BigRational },
}

fn merge_lam(
    into: &mut Vec<(usize, BigRational)>,
    from: &[(usize, BigRational)],
    scale: &BigRational,
) {
    for (idx, l) in from {
        if let Some(entry) = into.iter_mut().find(|(i, _)| i == idx) {
            entry.1 += l * scale;
        } else {
            into.push((*idx, l * scale));
        }
    }
}

fn scaled_row(row: &CRow, scale: &BigRational) -> CRow {
    let mut coeffs = FxHashMap::default();
    for (v, c) in &row.row.coeffs {
        coeffs.insert(*v, c * scale);
    }
    let mut lam = Vec::new();
    merge_lam(&mut lam, &row.lam, scale);
    CRow {
        row: LinRow {
            coeffs,
            bound: &row.row.bound * scale,
            strict: row.row.strict,
        },
        lam,
    }
}

fn add_rows(a: &CRow, b: &CRow) -> CRow {
    let mut coeffs = a.row.coeffs.clone();
    for (v, c) in &b.row.coeffs {
        let updated = coeffs.get(v).cloned().unwrap_or_else(BigRational::zero) + c;
        if updated.is_zero() {
            coeffs.remove(v);
        } else {
            coeffs.insert(*v, updated);
        }
    }
    let mut lam = a.lam.clone();
    merge_lam(&mut lam, &b.lam, &BigRational::one());
    CRow {
        row: LinRow {
            coeffs,
            bound: &a.row.bound + &b.row.bound,
            strict: a.row.strict || b.row.strict,
        },
        lam,
    }
}

fn ceil_value(bound: &BigRational, strict: bool) -> BigInt {
    if strict && bound.is_integer() {
        bound.to_integer() + 1
    } else {
        bound.ceil().to_integer()
    }
}

fn floor_value(bound: &BigRational, strict: bool) -> BigInt {
    if strict && bound.is_integer() {
        bound.to_integer() - 1
    } else {
        bound.floor().to_integer()
    }
}

/// One elimination stage: the rows bounding the eliminated variable.
struct Stage {
    var: Term,
    bounds: Vec<CRow>,
}

/// Rational feasibility by elimination. On success the assignment prefers
/// integers for integer-sorted variables and values near zero.
fn fourier(logic: &Logic, input: &[CRow]) -> FmOutcome {
    let mut vars: Vec<Term> = Vec::new();
    for r in input {
        for v in r.row.coeffs.keys() {
            if !vars.contains(v) {
                vars.push(*v);
            }
        }
    }
    vars.sort_unstable();

    let mut rows: Vec<CRow> = input.to_vec();
    for r in &rows {
        if r.row.is_contradiction() {
            return FmOutcome::Infeasible(r.lam.clone());
        }
    }

    let mut stages: Vec<Stage> = Vec::with_capacity(vars.len());
    for &var in &vars {
        let (with_var, rest): (Vec<CRow>, Vec<CRow>) = rows
            .into_iter()
            .partition(|r| r.row.coeffs.contains_key(&var));
        let mut next = rest;
        let mut uppers: Vec<CRow> = Vec::new();
        let mut lowers: Vec<CRow> = Vec::new();
        for r in &with_var {
            if r.row.coeff(var).is_positive() {
                uppers.push(scaled_row(r, &r.row.coeff(var).recip()));
            } else {
                lowers.push(scaled_row(r, &(-r.row.coeff(var)).recip()));
            }
        }
        for u in &uppers {
            for l in &lowers {
                let combined = add_rows(u, l);
                debug_assert!(!combined.row.coeffs.contains_key(&var));
                if combined.row.is_contradiction() {
                    return FmOutcome::Infeasible(combined.lam);
                }
                if !combined.row.is_trivial() {
                    next.push(combined);
                }
            }
        }
        stages.push(Stage {
            var,
            bounds: with_var,
        });
        rows = next;
    }

    // All remaining rows are constant and satisfied; assign back to front.
    let mut assign: FxHashMap<Term, BigRational> = FxHashMap::default();
    for stage in stages.iter().rev() {
        let var = stage.var;
        let mut lower: Option<(BigRational, bool)> = None;
        let mut upper: Option<(BigRational, bool)> = None;
        for r in &stage.bounds {
            let c = r.row.coeff(var);
            let mut rest = BigRational::zero();
            for (v, coeff) in &r.row.coeffs {
                if *v != var {
                    rest += coeff * assign.get(v).cloned().unwrap_or_else(BigRational::zero);
                }
            }
            let value = (&r.row.bound - rest) / &c;
            if c.is_positive() {
                // var <= value
                let tighter = match &upper {
                    None => true,
                    Some((u, us)) => &value < u || (&value == u && r.row.strict && !*us),
                };
                if tighter {
                    upper = Some((value, r.row.strict));
                }
            } else {
                let tighter = match &lower {
                    None => true,
                    Some((l, ls)) => &value > l || (&value == l && r.row.strict && !*ls),
                };
                if tighter {
                    lower = Some((value, r.row.strict));
                }
            }
        }
        let value = if logic.sort_of(var) == Sort::Int {
            let lo = lower.as_ref().map(|(l, s)| ceil_value(l, *s));
            let hi = upper.as_ref().map(|(u, s)| floor_value(u, *s));
            match (lo, hi) {
                (Some(lo), Some(hi)) => {
                    if lo > hi {
                        let at = lower.expect("lower bound present").0;
                        return FmOutcome::IntGap { var, at };
                    }
                    let zero = BigInt::zero();
                    let picked = if lo > zero {
                        lo
                    } else if hi < zero {
                        hi
                    } else {
                        zero
                    };
                    BigRational::from_integer(picked)
                }
                (Some(lo), None) => {
                    BigRational::from_integer(if lo > BigInt::zero() { lo } else { BigInt::zero() })
                }
                (None, Some(hi)) => {
                    BigRational::from_integer(if hi < BigInt::zero() { hi } else { BigInt::zero() })
                }
                (None, None) => BigRational::zero(),
            }
        } else {
            match (&lower, &upper) {
                (Some((lo, ls)), Some((up, _))) => {
                    if lo == up {
                        // Equal bounds with a strict side would have produced
                        // a contradictory constant row.
                        lo.clone()
                    } else if *ls {
                        (lo + up) / BigRational::from_integer(BigInt::from(2))
                    } else {
                        lo.clone()
                    }
                }
                (Some((lo, ls)), None) => {
                    if *ls {
                        lo + BigRational::one()
                    } else {
                        lo.clone()
                    }
                }
                (None, Some((up, us))) => {
                    if *us {
                        up - BigRational::one()
                    } else {
                        up.clone()
                    }
                }
                (None, None) => BigRational::zero(),
            }
        };
        assign.insert(var, value);
    }
    FmOutcome::Feasible(assign)
}

/// Rational feasibility only; integer gaps count as feasible. Used to prune
/// branches of the implicant search early.
pub(crate) fn rationally_feasible(logic: &Logic, rows: &[LinRow]) -> bool {
    let crows: Vec<CRow> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| CRow {
            row: r.clone(),
            lam: vec![(i, BigRational::one())],
        })
        .collect();
    !matches!(fourier(logic, &crows), FmOutcome::Infeasible(_))
}

/// Linear integer/rational feasibility with proofs.
pub(crate) struct LiaProblem<'a> {
    logic: &'a Logic,
    /// Certificate sources; the first entries are the input rows, later ones
    /// branch cuts.
    pub origins: Vec<Origin>,
    pub origin_rows: Vec<LinRow>,
    budget: u32,
}

pub(crate) const DEFAULT_BRANCH_BUDGET: u32 = 256;

impl<'a> LiaProblem<'a> {
    pub fn new(logic: &'a Logic, rows: Vec<LinRow>) -> Self {
        let origins = (0..rows.len()).map(Origin::Input).collect();
        LiaProblem {
            logic,
            origins,
            origin_rows: rows,
            budget: DEFAULT_BRANCH_BUDGET,
        }
    }

    pub fn solve(&mut self) -> LiaOutcome {
        let rows: Vec<CRow> = self
            .origin_rows
            .iter()
            .enumerate()
            .map(|(i, r)| CRow {
                row: r.clone(),
                lam: vec![(i, BigRational::one())],
            })
            .collect();
        self.solve_rec(rows)
    }

    fn solve_rec(&mut self, rows: Vec<CRow>) -> LiaOutcome {
        match fourier(self.logic, &rows) {
            FmOutcome::Feasible(assign) => LiaOutcome::Sat(assign),
            FmOutcome::Infeasible(lam) => LiaOutcome::Unsat(Proof::Farkas(lam)),
            FmOutcome::IntGap { var, at } => {
                if self.budget == 0 {
                    return LiaOutcome::Unknown;
                }
                self.budget -= 1;
                let cut = at.floor().to_integer();

                let le_row = cut_le_row(var, &cut);
                let le_idx = self.origins.len();
                self.origins.push(Origin::CutLe(var, cut.clone()));
                self.origin_rows.push(le_row.clone());
                let mut lo_rows = rows.clone();
                lo_rows.push(CRow {
                    row: le_row,
                    lam: vec![(le_idx, BigRational::one())],
                });
                let lo = self.solve_rec(lo_rows);
                if let LiaOutcome::Sat(m) = lo {
                    return LiaOutcome::Sat(m);
                }

                let ge_bound = cut.clone() + 1;
                let ge_row = cut_ge_row(var, &ge_bound);
                let ge_idx = self.origins.len();
                self.origins.push(Origin::CutGe(var, ge_bound));
                self.origin_rows.push(ge_row.clone());
                let mut hi_rows = rows;
                hi_rows.push(CRow {
                    row: ge_row,
                    lam: vec![(ge_idx, BigRational::one())],
                });
                let hi = self.solve_rec(hi_rows);
                match (lo, hi) {
                    (_, LiaOutcome::Sat(m)) => LiaOutcome::Sat(m),
                    (LiaOutcome::Unsat(p1), LiaOutcome::Unsat(p2)) => LiaOutcome::Unsat(Proof::Split {
                        var,
                        lo: Box::new(p1),
                        hi: Box::new(p2),
                    }),
                    _ => LiaOutcome::Unknown,
                }
            }
        }
    }
}

fn cut_le_row(var: Term, bound: &BigInt) -> LinRow {
    let mut coeffs = FxHashMap::default();
    coeffs.insert(var, BigRational::one());
    LinRow {
        coeffs,
        bound: BigRational::from_integer(bound.clone()),
        strict: false,
    }
}

fn cut_ge_row(var: Term, bound: &BigInt) -> LinRow {
    let mut coeffs = FxHashMap::default();
    coeffs.insert(var, -BigRational::one());
    LinRow {
        coeffs,
        bound: BigRational::from_integer(-bound.clone()),
        strict: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::{classify_atom, AtomKind};

    fn rows_of(logic: &Logic, atoms: &[Term]) -> Vec<LinRow> {
        let mut rows = Vec::new();
        for &a in atoms {
            match classify_atom(logic, a).unwrap() {
                AtomKind::Linear(r) => rows.extend(r),
                AtomKind::BoolLit { .. } => panic!("unexpected boolean literal"),
            }
        }
        rows
    }

    #[test]
    fn feasible_box_has_model() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let atoms = [
            logic.mk_leq(logic.mk_int(2), x),
            logic.mk_leq(x, logic.mk_int(7)),
        ];
        let mut problem = LiaProblem::new(&logic, rows_of(&logic, &atoms));
        match problem.solve() {
            LiaOutcome::Sat(m) => {
                let v = m.get(&x).unwrap();
                assert!(v.is_integer());
                let v = v.to_integer();
                assert!(v >= BigInt::from(2) && v <= BigInt::from(7));
            }
            _ => panic!("expected sat"),
        }
    }

    #[test]
    fn contradictory_bounds_yield_certificate() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let atoms = [
            logic.mk_leq(logic.mk_int(10), x),
            logic.mk_leq(x, logic.mk_int(5)),
        ];
        let mut problem = LiaProblem::new(&logic, rows_of(&logic, &atoms));
        match problem.solve() {
            LiaOutcome::Unsat(Proof::Farkas(lam)) => {
                assert!(!lam.is_empty());
                assert!(lam.iter().all(|(_, l)| l.is_positive()));
            }
            _ => panic!("expected unsat with Farkas certificate"),
        }
    }

    #[test]
    fn elimination_chains_equalities() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        // x = y + 1, y = 4, x = 6 is infeasible
        let atoms = [
            logic.mk_eq(x, logic.mk_add([y, logic.mk_int(1)])),
            logic.mk_eq(y, logic.mk_int(4)),
            logic.mk_eq(x, logic.mk_int(6)),
        ];
        let mut problem = LiaProblem::new(&logic, rows_of(&logic, &atoms));
        assert!(matches!(problem.solve(), LiaOutcome::Unsat(_)));
    }

    #[test]
    fn integer_gap_branches_to_unsat() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Int);
        let y = logic.mk_var("y", Sort::Int);
        // x + y = 1 and x = y force x = 1/2; no integer solution.
        let atoms = [
            logic.mk_eq(logic.mk_add([x, y]), logic.mk_int(1)),
            logic.mk_eq(x, y),
        ];
        let rows = rows_of(&logic, &atoms);
        assert!(rationally_feasible(&logic, &rows));
        let mut problem = LiaProblem::new(&logic, rows);
        assert!(matches!(
            problem.solve(),
            LiaOutcome::Unsat(Proof::Split { .. })
        ));
    }

    #[test]
    fn rational_feasibility_ignores_integrality() {
        let logic = Logic::new();
        let x = logic.mk_var("x", Sort::Real);
        // 2x = 5 is rationally fine for a real variable.
        let atoms = [logic.mk_eq(logic.mk_mul(logic.mk_int(2), x), logic.mk_int(5))];
        assert!(rationally_feasible(&logic, &rows_of(&logic, &atoms)));
    }
}
