//! Hash-consed terms for quantifier-free linear arithmetic
//!
//! Every formula is a lightweight [`Term`] handle into a bank owned by
//! [`Logic`]. Two terms are equal iff they are the same handle; structurally
//! identical terms are interned to the same handle. Handles are `Copy` and
//! ordered by creation index, which gives every container of terms a
//! deterministic iteration order.
//!
//! Variables carry a base name and an integer version. Version 0 is the
//! current state, version 1 the next state; negative versions are legal.

use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Handle into the term bank. Equality and ordering are by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term(u32);

impl Term {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Sort of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    Int,
    Real,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::Int => write!(f, "Int"),
            Sort::Real => write!(f, "Real"),
        }
    }
}

/// Comparison relation of an atom. `Geq`/`Gt` are normalised away by the
/// builders (`a >= b` becomes `b <= a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    Eq,
    Leq,
    Lt,
}

/// Shape of a term. Obtained from [`Logic::node`]; owning a `TermNode` never
/// keeps the bank borrowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermNode {
    True,
    False,
    /// Integer numeral.
    Num(BigInt),
    Var {
        name: Rc<str>,
        version: i32,
        sort: Sort,
    },
    Not(Term),
    And(Box<[Term]>),
    Or(Box<[Term]>),
    Cmp(Rel, Term, Term),
    Add(Box<[Term]>),
    Sub(Term, Term),
    Neg(Term),
    /// Product; linear reasoning requires one side to be a numeral.
    Mul(Term, Term),
}

#[derive(Default)]
struct Bank {
    nodes: Vec<TermNode>,
    interned: FxHashMap<TermNode, Term>,
}

impl Bank {
    fn intern(&mut self, node: TermNode) -> Term {
        if let Some(&t) = self.interned.get(&node) {
            return t;
        }
        let t = Term(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.interned.insert(node, t);
        t
    }
}

/// The term bank plus builder methods. Single-threaded; engines hold a shared
/// reference for their whole lifetime.
pub struct Logic {
    bank: RefCell<Bank>,
    term_true: Term,
    term_false: Term,
}

impl Default for Logic {
    fn default() -> Self {
        Self::new()
    }
}

impl Logic {
    pub fn new() -> Self {
        let mut bank = Bank::default();
        let term_true = bank.intern(TermNode::True);
        let term_false = bank.intern(TermNode::False);
        Logic {
            bank: RefCell::new(bank),
            term_true,
            term_false,
        }
    }

    pub fn term_true(&self) -> Term {
        self.term_true
    }

    pub fn term_false(&self) -> Term {
        self.term_false
    }

    pub fn is_true(&self, t: Term) -> bool {
        t == self.term_true
    }

    pub fn is_false(&self, t: Term) -> bool {
        t == self.term_false
    }

    /// Shape of `t`. Returns an owned node, so callers are free to call back
    /// into the bank while holding it.
    pub fn node(&self, t: Term) -> TermNode {
        self.bank.borrow().nodes[t.index()].clone()
    }

    fn intern(&self, node: TermNode) -> Term {
        self.bank.borrow_mut().intern(node)
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn mk_var(&self, name: &str, sort: Sort) -> Term {
        self.mk_var_versioned(name, 0, sort)
    }

    pub fn mk_var_versioned(&self, name: &str, version: i32, sort: Sort) -> Term {
        self.intern(TermNode::Var {
            name: Rc::from(name),
            version,
            sort,
        })
    }

    pub fn mk_num(&self, n: BigInt) -> Term {
        self.intern(TermNode::Num(n))
    }

    pub fn mk_int(&self, n: i64) -> Term {
        self.mk_num(BigInt::from(n))
    }

    pub fn mk_bool(&self, b: bool) -> Term {
        if b {
            self.term_true
        } else {
            self.term_false
        }
    }

    pub fn mk_not(&self, t: Term) -> Term {
        if self.is_true(t) {
            return self.term_false;
        }
        if self.is_false(t) {
            return self.term_true;
        }
        if let TermNode::Not(inner) = self.node(t) {
            return inner;
        }
        self.intern(TermNode::Not(t))
    }

    pub fn mk_and(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut flat: Vec<Term> = Vec::new();
        for a in args {
            if self.is_true(a) {
                continue;
            }
            if self.is_false(a) {
                return self.term_false;
            }
            if let TermNode::And(children) = self.node(a) {
                flat.extend(children.iter().copied());
            } else {
                flat.push(a);
            }
        }
        flat.sort_unstable();
        flat.dedup();
        // p and not(p) is false
        for &a in &flat {
            if let TermNode::Not(inner) = self.node(a) {
                if flat.binary_search(&inner).is_ok() {
                    return self.term_false;
                }
            }
        }
        match flat.len() {
            0 => self.term_true,
            1 => flat[0],
            _ => self.intern(TermNode::And(flat.into_boxed_slice())),
        }
    }

    pub fn mk_or(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut flat: Vec<Term> = Vec::new();
        for a in args {
            if self.is_false(a) {
                continue;
            }
            if self.is_true(a) {
                return self.term_true;
            }
            if let TermNode::Or(children) = self.node(a) {
                flat.extend(children.iter().copied());
            } else {
                flat.push(a);
            }
        }
        flat.sort_unstable();
        flat.dedup();
        for &a in &flat {
            if let TermNode::Not(inner) = self.node(a) {
                if flat.binary_search(&inner).is_ok() {
                    return self.term_true;
                }
            }
        }
        match flat.len() {
            0 => self.term_false,
            1 => flat[0],
            _ => self.intern(TermNode::Or(flat.into_boxed_slice())),
        }
    }

    pub fn mk_implies(&self, a: Term, b: Term) -> Term {
        self.mk_or([self.mk_not(a), b])
    }

    fn both_nums(&self, a: Term, b: Term) -> Option<(BigInt, BigInt)> {
        match (self.node(a), self.node(b)) {
            (TermNode::Num(x), TermNode::Num(y)) => Some((x, y)),
            _ => None,
        }
    }

    pub fn mk_eq(&self, a: Term, b: Term) -> Term {
        if a == b {
            return self.term_true;
        }
        if let Some((x, y)) = self.both_nums(a, b) {
            return self.mk_bool(x == y);
        }
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.intern(TermNode::Cmp(Rel::Eq, a, b))
    }

    pub fn mk_neq(&self, a: Term, b: Term) -> Term {
        self.mk_not(self.mk_eq(a, b))
    }

    pub fn mk_leq(&self, a: Term, b: Term) -> Term {
        if a == b {
            return self.term_true;
        }
        if let Some((x, y)) = self.both_nums(a, b) {
            return self.mk_bool(x <= y);
        }
        self.intern(TermNode::Cmp(Rel::Leq, a, b))
    }

    pub fn mk_lt(&self, a: Term, b: Term) -> Term {
        if a == b {
            return self.term_false;
        }
        if let Some((x, y)) = self.both_nums(a, b) {
            return self.mk_bool(x < y);
        }
        self.intern(TermNode::Cmp(Rel::Lt, a, b))
    }

    pub fn mk_geq(&self, a: Term, b: Term) -> Term {
        self.mk_leq(b, a)
    }

    pub fn mk_gt(&self, a: Term, b: Term) -> Term {
        self.mk_lt(b, a)
    }

    pub fn mk_add(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut flat: Vec<Term> = Vec::new();
        let mut constant = BigInt::from(0);
        for a in args {
            match self.node(a) {
                TermNode::Num(n) => constant += n,
                TermNode::Add(children) => {
                    for c in children.iter() {
                        if let TermNode::Num(n) = self.node(*c) {
                            constant += n;
                        } else {
                            flat.push(*c);
                        }
                    }
                }
                _ => flat.push(a),
            }
        }
        if constant != BigInt::from(0) || flat.is_empty() {
            flat.push(self.mk_num(constant));
        }
        flat.sort_unstable();
        match flat.len() {
            1 => flat[0],
            _ => self.intern(TermNode::Add(flat.into_boxed_slice())),
        }
    }

    pub fn mk_sub(&self, a: Term, b: Term) -> Term {
        if let Some((x, y)) = self.both_nums(a, b) {
            return self.mk_num(x - y);
        }
        self.intern(TermNode::Sub(a, b))
    }

    pub fn mk_neg(&self, t: Term) -> Term {
        if let TermNode::Num(n) = self.node(t) {
            return self.mk_num(-n);
        }
        if let TermNode::Neg(inner) = self.node(t) {
            return inner;
        }
        self.intern(TermNode::Neg(t))
    }

    pub fn mk_mul(&self, a: Term, b: Term) -> Term {
        if let Some((x, y)) = self.both_nums(a, b) {
            return self.mk_num(x * y);
        }
        self.intern(TermNode::Mul(a, b))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_var(&self, t: Term) -> bool {
        matches!(self.node(t), TermNode::Var { .. })
    }

    pub fn var_info(&self, t: Term) -> Option<(Rc<str>, i32, Sort)> {
        match self.node(t) {
            TermNode::Var {
                name,
                version,
                sort,
            } => Some((name, version, sort)),
            _ => None,
        }
    }

    pub fn sort_of(&self, t: Term) -> Sort {
        match self.node(t) {
            TermNode::True | TermNode::False => Sort::Bool,
            TermNode::Num(_) => Sort::Int,
            TermNode::Var { sort, .. } => sort,
            TermNode::Not(_) | TermNode::And(_) | TermNode::Or(_) | TermNode::Cmp(..) => Sort::Bool,
            TermNode::Add(args) => {
                if args.iter().any(|&a| self.sort_of(a) == Sort::Real) {
                    Sort::Real
                } else {
                    Sort::Int
                }
            }
            TermNode::Sub(a, b) => {
                if self.sort_of(a) == Sort::Real || self.sort_of(b) == Sort::Real {
                    Sort::Real
                } else {
                    Sort::Int
                }
            }
            TermNode::Neg(a) => self.sort_of(a),
            TermNode::Mul(a, b) => {
                if self.sort_of(a) == Sort::Real || self.sort_of(b) == Sort::Real {
                    Sort::Real
                } else {
                    Sort::Int
                }
            }
        }
    }

    /// Free variables of `t`, deduplicated, ordered by handle.
    pub fn vars(&self, t: Term) -> Vec<Term> {
        let mut out = Vec::new();
        let mut seen = FxHashMap::default();
        self.collect_vars(t, &mut out, &mut seen);
        out.sort_unstable();
        out
    }

    fn collect_vars(&self, t: Term, out: &mut Vec<Term>, seen: &mut FxHashMap<Term, ()>) {
        if seen.contains_key(&t) {
            return;
        }
        seen.insert(t, ());
        match self.node(t) {
            TermNode::True | TermNode::False | TermNode::Num(_) => {}
            TermNode::Var { .. } => out.push(t),
            TermNode::Not(a) | TermNode::Neg(a) => self.collect_vars(a, out, seen),
            TermNode::And(args) | TermNode::Or(args) | TermNode::Add(args) => {
                for a in args.iter() {
                    self.collect_vars(*a, out, seen);
                }
            }
            TermNode::Cmp(_, a, b) | TermNode::Sub(a, b) | TermNode::Mul(a, b) => {
                self.collect_vars(a, out, seen);
                self.collect_vars(b, out, seen);
            }
        }
    }

    /// Parallel substitution of variables. Keys must be variable terms.
    pub fn substitute(&self, t: Term, map: &FxHashMap<Term, Term>) -> Term {
        let mut memo = FxHashMap::default();
        self.subst_rec(t, map, &mut memo)
    }

    fn subst_rec(
        &self,
        t: Term,
        map: &FxHashMap<Term, Term>,
        memo: &mut FxHashMap<Term, Term>,
    ) -> Term {
        if let Some(&r) = memo.get(&t) {
            return r;
        }
        let result = match self.node(t) {
            TermNode::True | TermNode::False | TermNode::Num(_) => t,
            TermNode::Var { .. } => map.get(&t).copied().unwrap_or(t),
            TermNode::Not(a) => {
                let a = self.subst_rec(a, map, memo);
                self.mk_not(a)
            }
            TermNode::Neg(a) => {
                let a = self.subst_rec(a, map, memo);
                self.mk_neg(a)
            }
            TermNode::And(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.subst_rec(a, map, memo)).collect();
                self.mk_and(args)
            }
            TermNode::Or(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.subst_rec(a, map, memo)).collect();
                self.mk_or(args)
            }
            TermNode::Add(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.subst_rec(a, map, memo)).collect();
                self.mk_add(args)
            }
            TermNode::Cmp(rel, a, b) => {
                let a = self.subst_rec(a, map, memo);
                let b = self.subst_rec(b, map, memo);
                match rel {
                    Rel::Eq => self.mk_eq(a, b),
                    Rel::Leq => self.mk_leq(a, b),
                    Rel::Lt => self.mk_lt(a, b),
                }
            }
            TermNode::Sub(a, b) => {
                let a = self.subst_rec(a, map, memo);
                let b = self.subst_rec(b, map, memo);
                self.mk_sub(a, b)
            }
            TermNode::Mul(a, b) => {
                let a = self.subst_rec(a, map, memo);
                let b = self.subst_rec(b, map, memo);
                self.mk_mul(a, b)
            }
        };
        memo.insert(t, result);
        result
    }

    // ------------------------------------------------------------------
    // Negation normal form
    // ------------------------------------------------------------------

    /// Negation normal form. Negations are pushed to atoms; negated
    /// comparisons become positive comparisons (`not (a <= b)` is `b < a`),
    /// and negated equalities between numeric terms split into the two
    /// strict orders. Only Boolean variables remain under `not`.
    pub fn to_nnf(&self, t: Term) -> Term {
        self.nnf(t, true)
    }

    fn nnf(&self, t: Term, positive: bool) -> Term {
        match self.node(t) {
            TermNode::True => self.mk_bool(positive),
            TermNode::False => self.mk_bool(!positive),
            TermNode::Var { sort, .. } => {
                debug_assert_eq!(sort, Sort::Bool);
                if positive {
                    t
                } else {
                    self.intern(TermNode::Not(t))
                }
            }
            TermNode::Not(a) => self.nnf(a, !positive),
            TermNode::And(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.nnf(a, positive)).collect();
                if positive {
                    self.mk_and(args)
                } else {
                    self.mk_or(args)
                }
            }
            TermNode::Or(args) => {
                let args: Vec<Term> = args.iter().map(|&a| self.nnf(a, positive)).collect();
                if positive {
                    self.mk_or(args)
                } else {
                    self.mk_and(args)
                }
            }
            TermNode::Cmp(rel, a, b) => {
                if positive {
                    t
                } else {
                    match rel {
                        Rel::Eq => self.mk_or([self.mk_lt(a, b), self.mk_lt(b, a)]),
                        Rel::Leq => self.mk_lt(b, a),
                        Rel::Lt => self.mk_leq(b, a),
                    }
                }
            }
            // Arithmetic terms only occur below comparisons.
            TermNode::Num(_) | TermNode::Add(_) | TermNode::Sub(..) | TermNode::Neg(_)
            | TermNode::Mul(..) => t,
        }
    }

    /// Displayable wrapper, s-expression syntax.
    pub fn pp(&self, t: Term) -> DisplayTerm<'_> {
        DisplayTerm { logic: self, term: t }
    }
}

pub struct DisplayTerm<'a> {
    logic: &'a Logic,
    term: Term,
}

impl fmt::Display for DisplayTerm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn go(logic: &Logic, t: Term, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let list = |f: &mut fmt::Formatter<'_>, op: &str, args: &[Term]| -> fmt::Result {
                write!(f, "({op}")?;
                for &a in args {
                    write!(f, " ")?;
                    go(logic, a, f)?;
                }
                write!(f, ")")
            };
            match logic.node(t) {
                TermNode::True => write!(f, "true"),
                TermNode::False => write!(f, "false"),
                TermNode::Num(n) => write!(f, "{n}"),
                TermNode::Var { name, version, .. } => {
                    if version == 0 {
                        write!(f, "{name}")
                    } else {
                        write!(f, "{name}#{version}")
                    }
                }
                TermNode::Not(a) => list(f, "not", &[a]),
                TermNode::And(args) => list(f, "and", &args),
                TermNode::Or(args) => list(f, "or", &args),
                TermNode::Cmp(Rel::Eq, a, b) => list(f, "=", &[a, b]),
                TermNode::Cmp(Rel::Leq, a, b) => list(f, "<=", &[a, b]),
                TermNode::Cmp(Rel::Lt, a, b) => list(f, "<", &[a, b]),
                TermNode::Add(args) => list(f, "+", &args),
                TermNode::Sub(a, b) => list(f, "-", &[a, b]),
                TermNode::Neg(a) => list(f, "-", &[a]),
                TermNode::Mul(a, b) => list(f, "*", &[a, b]),
            }
        }
        go(self.logic, self.term, f)
    }
}
