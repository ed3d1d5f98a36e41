//! Models extracted from satisfiable queries

use crate::term::{Logic, Rel, Sort, Term, TermNode};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;
use rustc_hash::FxHashMap;

/// Value of a variable in a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Num(BigRational),
}

impl Value {
    pub fn from_int(n: i64) -> Self {
        Value::Num(BigRational::from_integer(BigInt::from(n)))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Num(_) => None,
        }
    }

    pub fn as_num(&self) -> Option<&BigRational> {
        match self {
            Value::Num(n) => Some(n),
            Value::Bool(_) => None,
        }
    }
}

/// Assignment from variable handles to values. Variables the query never
/// mentioned are unconstrained; evaluation defaults them to `false` / `0`.
#[derive(Debug, Clone, Default)]
pub struct Model {
    assignments: FxHashMap<Term, Value>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, var: Term, value: Value) {
        self.assignments.insert(var, value);
    }

    pub fn get(&self, var: Term) -> Option<&Value> {
        self.assignments.get(&var)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Numeric value of a variable, defaulting to 0 when unconstrained.
    pub fn num(&self, var: Term) -> BigRational {
        match self.assignments.get(&var) {
            Some(Value::Num(n)) => n.clone(),
            _ => BigRational::zero(),
        }
    }

    /// Evaluate an arithmetic term under this model.
    pub fn eval_num(&self, logic: &Logic, t: Term) -> Option<BigRational> {
        match logic.node(t) {
            TermNode::Num(n) => Some(BigRational::from_integer(n)),
            TermNode::Var { sort, .. } => match sort {
                Sort::Bool => None,
                _ => Some(self.num(t)),
            },
            TermNode::Add(args) => {
                let mut sum = BigRational::zero();
                for a in args.iter() {
                    sum += self.eval_num(logic, *a)?;
                }
                Some(sum)
            }
            TermNode::Sub(a, b) => Some(self.eval_num(logic, a)? - self.eval_num(logic, b)?),
            TermNode::Neg(a) => Some(-self.eval_num(logic, a)?),
            TermNode::Mul(a, b) => Some(self.eval_num(logic, a)? * self.eval_num(logic, b)?),
            _ => None,
        }
    }

    /// Evaluate a formula under this model.
    pub fn eval_bool(&self, logic: &Logic, t: Term) -> Option<bool> {
        match logic.node(t) {
            TermNode::True => Some(true),
            TermNode::False => Some(false),
            TermNode::Var { sort: Sort::Bool, .. } => match self.assignments.get(&t) {
                Some(Value::Bool(b)) => Some(*b),
                Some(Value::Num(_)) => None,
                None => Some(false),
            },
            TermNode::Not(a) => self.eval_bool(logic, a).map(|b| !b),
            TermNode::And(args) => {
                for a in args.iter() {
                    if !self.eval_bool(logic, *a)? {
                        return Some(false);
                    }
                }
                Some(true)
            }
            TermNode::Or(args) => {
                for a in args.iter() {
                    if self.eval_bool(logic, *a)? {
                        return Some(true);
                    }
                }
                Some(false)
            }
            TermNode::Cmp(rel, a, b) => {
                let a = self.eval_num(logic, a)?;
                let b = self.eval_num(logic, b)?;
                Some(match rel {
                    Rel::Eq => a == b,
                    Rel::Leq => a <= b,
                    Rel::Lt => a < b,
                })
            }
            _ => None,
        }
    }

    /// True iff the formula evaluates to true, with unconstrained variables
    /// defaulted. Used to pick the satisfied disjunct of a query.
    pub fn holds(&self, logic: &Logic, t: Term) -> bool {
        self.eval_bool(logic, t) == Some(true)
    }
}
