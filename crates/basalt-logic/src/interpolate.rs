//! Craig interpolation from Farkas certificates
//!
//! Given partitions A and B with `A ∧ B` unsatisfiable, the interpolant is
//! assembled recursively over the disjunctive structure of the two sides:
//! a disjunction inside A contributes the disjunction of the branch
//! interpolants, one inside B the conjunction. At a leaf both sides are
//! conjunctions of literals and the refutation is a Farkas certificate
//! (possibly under integer branch cuts); the weak interpolant combines the
//! A-side rows of the certificate, the strong one negates the B-side
//! combination. Both are over the shared variables only, since the full
//! combination cancels every variable.

use crate::fm::{LiaOutcome, LiaProblem, Origin, Proof};
use crate::linear::{classify_atom, AtomKind, LinRow};
use crate::solver::SolverError;
use crate::term::{Logic, Term, TermNode};
use num_rational::BigRational;
use num_traits::Signed;
use rustc_hash::{FxHashMap, FxHashSet};

/// Interpolant strength. `Farkas` combines the A-side certificate rows
/// (weak); `McMillan` negates the B-side combination (strong).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strength {
    Farkas,
    #[default]
    McMillan,
}

/// Interpolation options: strength and a simplification level from 0 to 4.
#[derive(Debug, Clone, Copy)]
pub struct ItpOptions {
    pub strength: Strength,
    pub simplify: u8,
}

impl Default for ItpOptions {
    fn default() -> Self {
        ItpOptions {
            strength: Strength::McMillan,
            simplify: 4,
        }
    }
}

impl ItpOptions {
    pub fn with_strength(strength: Strength) -> Self {
        ItpOptions {
            strength,
            ..Default::default()
        }
    }
}

/// Growable bit-set marking which assertions belong to the A-part.
#[derive(Debug, Clone, Default)]
pub struct PartitionMask {
    bits: Vec<u64>,
}

impl PartitionMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask containing the single index `i`.
    pub fn single(i: usize) -> Self {
        let mut mask = Self::new();
        mask.set(i);
        mask
    }

    /// Mask containing `0..n`.
    pub fn first(n: usize) -> Self {
        let mut mask = Self::new();
        for i in 0..n {
            mask.set(i);
        }
        mask
    }

    pub fn set(&mut self, i: usize) {
        let word = i / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1 << (i % 64);
    }

    pub fn contains(&self, i: usize) -> bool {
        self.bits
            .get(i / 64)
            .map_or(false, |w| w & (1 << (i % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// Interpolant for `a` against `b` (both conjunction lists in NNF).
/// Requires that their conjunction is unsatisfiable.
pub fn interpolant(
    logic: &Logic,
    a: &[Term],
    b: &[Term],
    options: ItpOptions,
) -> Result<Term, SolverError> {
    let itp = recurse(logic, a.to_vec(), b.to_vec(), options.strength)?;
    Ok(simplify(logic, itp, options.simplify))
}

fn recurse(
    logic: &Logic,
    mut a: Vec<Term>,
    mut b: Vec<Term>,
    strength: Strength,
) -> Result<Term, SolverError> {
    // Expand the A side first: conjunctions splice in place, a disjunction
    // turns into the disjunction of branch interpolants.
    let mut i = 0;
    while i < a.len() {
        match logic.node(a[i]) {
            TermNode::True => {
                a.swap_remove(i);
            }
            TermNode::False => return Ok(logic.term_false()),
            TermNode::And(args) => {
                a.swap_remove(i);
                a.extend(args.iter().copied());
            }
            TermNode::Or(args) => {
                if let Some(itp) = collapse(logic, &a, &b, strength)? {
                    return Ok(itp);
                }
                let mut branches = Vec::with_capacity(args.len());
                for &child in args.iter() {
                    let mut branch = a.clone();
                    branch[i] = child;
                    branches.push(recurse(logic, branch, b.clone(), strength)?);
                }
                return Ok(logic.mk_or(branches));
            }
            _ => i += 1,
        }
    }
    let mut i = 0;
    while i < b.len() {
        match logic.node(b[i]) {
            TermNode::True => {
                b.swap_remove(i);
            }
            TermNode::False => return Ok(logic.term_true()),
            TermNode::And(args) => {
                b.swap_remove(i);
                b.extend(args.iter().copied());
            }
            TermNode::Or(args) => {
                if let Some(itp) = collapse(logic, &a, &b, strength)? {
                    return Ok(itp);
                }
                let mut branches = Vec::with_capacity(args.len());
                for &child in args.iter() {
                    let mut branch = b.clone();
                    branch[i] = child;
                    branches.push(recurse(logic, a.clone(), branch, strength)?);
                }
                return Ok(logic.mk_and(branches));
            }
            _ => i += 1,
        }
    }
    leaf(logic, &a, &b, strength)
}

fn is_literal(logic: &Logic, t: Term) -> bool {
    !matches!(
        logic.node(t),
        TermNode::And(_) | TermNode::Or(_) | TermNode::True | TermNode::False
    )
}

/// If the literals already collected on both sides are contradictory, their
/// certificate yields an interpolant valid for every expansion of the
/// remaining disjunctions; the whole subtree collapses to one leaf. This is
/// what keeps the recursion proportional to the refutation rather than the
/// disjunctive normal form of the query.
fn collapse(
    logic: &Logic,
    a: &[Term],
    b: &[Term],
    strength: Strength,
) -> Result<Option<Term>, SolverError> {
    let a_lits: Vec<Term> = a.iter().copied().filter(|&t| is_literal(logic, t)).collect();
    let b_lits: Vec<Term> = b.iter().copied().filter(|&t| is_literal(logic, t)).collect();
    match refute_literals(logic, &a_lits, &b_lits, strength)? {
        Refutation::Refuted(itp) => Ok(Some(itp)),
        Refutation::Consistent | Refutation::Unknown => Ok(None),
    }
}

#[derive(Default)]
struct BoolOcc {
    pos_a: bool,
    neg_a: bool,
    pos_b: bool,
    neg_b: bool,
}

/// Outcome of refuting one pair of literal conjunctions.
enum Refutation {
    Refuted(Term),
    Consistent,
    /// The branch budget ran out before a verdict.
    Unknown,
}

fn leaf(logic: &Logic, a: &[Term], b: &[Term], strength: Strength) -> Result<Term, SolverError> {
    match refute_literals(logic, a, b, strength)? {
        Refutation::Refuted(itp) => Ok(itp),
        Refutation::Consistent => Err(SolverError::Internal(
            "satisfiable implicant in an interpolation query".into(),
        )),
        Refutation::Unknown => Err(SolverError::Incomplete(
            "branch budget exhausted during interpolation".into(),
        )),
    }
}

/// Try to refute `⋀a ∧ ⋀b` for two lists of literals, assembling the
/// interpolant from the certificate on success.
fn refute_literals(
    logic: &Logic,
    a: &[Term],
    b: &[Term],
    strength: Strength,
) -> Result<Refutation, SolverError> {
    let mut bools: FxHashMap<Term, BoolOcc> = FxHashMap::default();
    let mut rows: Vec<LinRow> = Vec::new();
    let mut sides: Vec<Side> = Vec::new();
    for (lits, side) in [(a, Side::A), (b, Side::B)] {
        for &lit in lits {
            match classify_atom(logic, lit) {
                Ok(AtomKind::BoolLit { var, positive }) => {
                    let occ = bools.entry(var).or_default();
                    match (side, positive) {
                        (Side::A, true) => occ.pos_a = true,
                        (Side::A, false) => occ.neg_a = true,
                        (Side::B, true) => occ.pos_b = true,
                        (Side::B, false) => occ.neg_b = true,
                    }
                }
                Ok(AtomKind::Linear(atom_rows)) => {
                    for row in atom_rows {
                        rows.push(row);
                        sides.push(side);
                    }
                }
                Err(_) => {
                    return Err(SolverError::Incomplete(
                        "non-linear atom in interpolation query".into(),
                    ))
                }
            }
        }
    }

    // Boolean conflicts take priority over arithmetic ones.
    for (var, occ) in &bools {
        if occ.pos_a && occ.neg_a {
            return Ok(Refutation::Refuted(logic.term_false()));
        }
        if occ.pos_b && occ.neg_b {
            return Ok(Refutation::Refuted(logic.term_true()));
        }
        if occ.pos_a && occ.neg_b {
            return Ok(Refutation::Refuted(*var));
        }
        if occ.neg_a && occ.pos_b {
            return Ok(Refutation::Refuted(logic.mk_not(*var)));
        }
    }

    let a_vars = side_vars(logic, a);
    let b_vars = side_vars(logic, b);

    let mut problem = LiaProblem::new(logic, rows);
    match problem.solve() {
        LiaOutcome::Unsat(proof) => Ok(Refutation::Refuted(assemble(
            logic,
            &proof,
            &problem.origins,
            &problem.origin_rows,
            &sides,
            &a_vars,
            &b_vars,
            strength,
        ))),
        LiaOutcome::Sat(_) => Ok(Refutation::Consistent),
        LiaOutcome::Unknown => Ok(Refutation::Unknown),
    }
}

fn side_vars(logic: &Logic, lits: &[Term]) -> FxHashSet<Term> {
    let mut out = FxHashSet::default();
    for &lit in lits {
        out.extend(logic.vars(lit));
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    logic: &Logic,
    proof: &Proof,
    origins: &[Origin],
    origin_rows: &[LinRow],
    sides: &[Side],
    a_vars: &FxHashSet<Term>,
    b_vars: &FxHashSet<Term>,
    strength: Strength,
) -> Term {
    let b_local = |v: Term| b_vars.contains(&v) && !a_vars.contains(&v);
    match proof {
        Proof::Farkas(lam) => {
            let mut a_comb = LinRow::empty();
            let mut b_comb = LinRow::empty();
            let mut has_a = false;
            let mut has_b = false;
            for (idx, scale) in lam {
                if !scale.is_positive() {
                    continue;
                }
                let side = match &origins[*idx] {
                    Origin::Input(i) => sides[*i],
                    Origin::CutLe(v, _) | Origin::CutGe(v, _) => {
                        if b_local(*v) {
                            Side::B
                        } else {
                            Side::A
                        }
                    }
                };
                let row = &origin_rows[*idx];
                let target = match side {
                    Side::A => {
                        has_a = true;
                        &mut a_comb
                    }
                    Side::B => {
                        has_b = true;
                        &mut b_comb
                    }
                };
                add_scaled(target, row, scale);
            }
            if !has_a {
                // B is inconsistent on its own.
                return logic.term_true();
            }
            if !has_b {
                return logic.term_false();
            }
            match strength {
                Strength::Farkas => a_comb.to_term(logic),
                Strength::McMillan => negate_row(&b_comb).to_term(logic),
            }
        }
        Proof::Split { var, lo, hi } => {
            let l = assemble(logic, lo, origins, origin_rows, sides, a_vars, b_vars, strength);
            let h = assemble(logic, hi, origins, origin_rows, sides, a_vars, b_vars, strength);
            if b_local(*var) {
                logic.mk_and([l, h])
            } else {
                logic.mk_or([l, h])
            }
        }
    }
}

fn add_scaled(target: &mut LinRow, row: &LinRow, scale: &BigRational) {
    for (v, c) in &row.coeffs {
        target.add_coeff(*v, c * scale);
    }
    target.bound += &row.bound * scale;
    target.strict = target.strict || row.strict;
}

/// `not (Σ ≤ b)` is `-Σ < -b`; `not (Σ < b)` is `-Σ ≤ -b`.
fn negate_row(row: &LinRow) -> LinRow {
    let mut coeffs = FxHashMap::default();
    for (v, c) in &row.coeffs {
        coeffs.insert(*v, -c.clone());
    }
    LinRow {
        coeffs,
        bound: -row.bound.clone(),
        strict: !row.strict,
    }
}

/// Post-process an interpolant. Levels: 0 none, 1 canonical rebuild,
/// 2 drop subsumed disjuncts, 3 also drop subsumed conjuncts, 4 apply
/// recursively below the top level.
pub fn simplify(logic: &Logic, t: Term, level: u8) -> Term {
    if level == 0 {
        return t;
    }
    match logic.node(t) {
        TermNode::Or(args) => {
            let children: Vec<Term> = args
                .iter()
                .map(|&c| if level >= 4 { simplify(logic, c, level) } else { c })
                .collect();
            let children = if level >= 2 {
                drop_subsumed(logic, children, true)
            } else {
                children
            };
            logic.mk_or(children)
        }
        TermNode::And(args) => {
            let children: Vec<Term> = args
                .iter()
                .map(|&c| if level >= 4 { simplify(logic, c, level) } else { c })
                .collect();
            let children = if level >= 3 {
                drop_subsumed(logic, children, false)
            } else {
                children
            };
            logic.mk_and(children)
        }
        _ => t,
    }
}

/// Remove children implied by (disjunction) or implying (conjunction) a
/// sibling with the same coefficient vector.
fn drop_subsumed(logic: &Logic, children: Vec<Term>, disjunction: bool) -> Vec<Term> {
    let rows: Vec<Option<LinRow>> = children.iter().map(|&c| single_row(logic, c)).collect();
    let mut keep = vec![true; children.len()];
    for i in 0..children.len() {
        let Some(ri) = &rows[i] else { continue };
        for j in 0..children.len() {
            if i == j || !keep[j] {
                continue;
            }
            let Some(rj) = &rows[j] else { continue };
            if !keep[i] {
                break;
            }
            if ri.coeffs == rj.coeffs {
                // ri implies rj iff ri's bound is at most rj's.
                let implies = ri.bound < rj.bound
                    || (ri.bound == rj.bound && (ri.strict || !rj.strict));
                // In a disjunction drop the stronger row, in a conjunction
                // the weaker one; never both of a tie.
                if implies && children[i] != children[j] {
                    if disjunction {
                        keep[i] = false;
                    } else {
                        keep[j] = false;
                    }
                }
            }
        }
    }
    children
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}

fn single_row(logic: &Logic, t: Term) -> Option<LinRow> {
    match classify_atom(logic, t) {
        Ok(AtomKind::Linear(rows)) if rows.len() == 1 => Some(rows.into_iter().next().unwrap()),
        _ => None,
    }
}
