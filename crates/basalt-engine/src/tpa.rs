//! Transition power abstraction
//!
//! Both engines maintain hierarchies of over-approximations of iterated
//! transition relations: the split variant keeps `Exact[n] ⊇ Tr^{=2ⁿ⁻¹}`
//! and `LessThan[n] ⊇ Tr^{<2ⁿ⁻¹}`, the basic variant a single
//! `Level[n] ⊇ Tr^{≤2ⁿ}`. A reachability query at level `n` is a two-step
//! query in the level below: a satisfiable one extracts a midpoint by
//! model-based projection and recurses, an unsatisfiable one strengthens the
//! level with an interpolant over the two-step relation. Safety follows
//! from a fixed point of a hierarchy level; unsafety from a query driven
//! down to the concrete transition relation.

use crate::engine::{poll_deadline, Engine};
use crate::error::VerifierError;
use crate::facade::{FacadeMode, Reachability, SolverFacade};
use crate::induction::{kinductive_to_inductive, verify_kinductive};
use crate::mbp::ModelBasedProjection;
use crate::options::Options;
use crate::qe::QuantifierElimination;
use crate::result::VerificationResult;
use crate::time::TimeMachine;
use crate::transys::TransitionSystem;
use basalt_logic::interpolate::simplify as simplify_formula;
use basalt_logic::{
    check_formula, ItpOptions, Logic, Model, PartitionMask, SatResult, SmtSolver, Strength, Term,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Answer of a level query, with the reached sub-region when reachable.
#[derive(Debug, Clone)]
struct QueryResult {
    reachable: bool,
    refined: Option<Term>,
}

impl QueryResult {
    fn reachable(refined: Option<Term>) -> Self {
        QueryResult {
            reachable: true,
            refined,
        }
    }

    fn unreachable() -> Self {
        QueryResult {
            reachable: false,
            refined: None,
        }
    }
}

/// Verdict of one power round.
enum PowerVerdict {
    Unsafe(Option<u64>),
    Safe,
    Continue,
}

/// State shared by the two engine variants.
struct TpaCore<'a> {
    logic: &'a Logic,
    options: Options,
    tm: TimeMachine<'a>,
    state_vars: Vec<Term>,
    init: Term,
    transition: Term,
    query: Term,
    inductive_invariant: Option<Term>,
    start: Instant,
}

impl<'a> TpaCore<'a> {
    fn new(logic: &'a Logic, options: Options, system: &TransitionSystem) -> Self {
        TpaCore {
            logic,
            options,
            tm: TimeMachine::new(logic),
            state_vars: system.state_vars().to_vec(),
            init: system.init(),
            transition: system.transition(),
            query: system.bad(),
            inductive_invariant: None,
            start: Instant::now(),
        }
    }

    fn state_vars_at(&self, version: i32) -> Vec<Term> {
        self.state_vars
            .iter()
            .map(|&v| self.tm.var_version(v, version))
            .collect()
    }

    fn next_version(&self, fla: Term) -> Term {
        self.tm.shift(fla, 1)
    }

    fn identity_relation(&self) -> Term {
        let logic = self.logic;
        let eqs: Vec<Term> = self
            .state_vars
            .iter()
            .map(|&v| logic.mk_eq(v, self.tm.var_version(v, 1)))
            .collect();
        logic.mk_and(eqs)
    }

    fn is_pure_transition_formula(&self, fla: Term) -> bool {
        let allowed: FxHashSet<Term> = self
            .state_vars_at(0)
            .into_iter()
            .chain(self.state_vars_at(1))
            .collect();
        self.logic.vars(fla).iter().all(|v| allowed.contains(v))
    }

    /// Rename next-state variables to next-next, leaving the current state
    /// untouched. Dual of [`TpaCore::clean_interpolant`].
    fn shift_only_next_vars(&self, fla: Term) -> Term {
        let mut map = FxHashMap::default();
        for &v in &self.state_vars {
            map.insert(self.tm.var_version(v, 1), self.tm.var_version(v, 2));
        }
        self.logic.substitute(fla, &map)
    }

    /// Rename next-next variables back to next, turning an interpolant over
    /// versions {0, 2} into a one-step transition formula.
    fn clean_interpolant(&self, fla: Term) -> Term {
        let mut map = FxHashMap::default();
        for &v in &self.state_vars {
            map.insert(self.tm.var_version(v, 2), self.tm.var_version(v, 1));
        }
        self.logic.substitute(fla, &map)
    }

    fn simplify_interpolant(&self, fla: Term) -> Term {
        simplify_formula(self.logic, fla, 4)
    }

    fn eliminate_vars(&self, fla: Term, vars: &[Term], model: &Model) -> Term {
        if self.options.use_qe {
            QuantifierElimination::new(self.logic).eliminate(fla, vars)
        } else {
            ModelBasedProjection::new(self.logic).project(fla, vars, model)
        }
    }

    /// From a model of `start ∧ firstTr ∧ secondTr ∧ goal` (goal at version
    /// 2), extract a state formula at version 1 splitting the path.
    fn extract_midpoint(
        &self,
        start: Term,
        first_transition: Term,
        second_transition: Term,
        goal: Term,
        model: &Model,
    ) -> Term {
        let logic = self.logic;
        let first_step = logic.mk_and([start, first_transition]);
        let second_step = logic.mk_and([goal, second_transition]);
        debug_assert!(model.holds(logic, first_step));
        debug_assert!(model.holds(logic, second_step));
        let from_start = self.eliminate_vars(first_step, &self.state_vars_at(0), model);
        let from_goal = self.eliminate_vars(second_step, &self.state_vars_at(2), model);
        let midpoint = self.tm.shift(logic.mk_and([from_start, from_goal]), -1);
        debug_assert!(self.is_pure_state_formula(midpoint));
        midpoint
    }

    fn is_pure_state_formula(&self, fla: Term) -> bool {
        let allowed: FxHashSet<Term> = self.state_vars_at(0).into_iter().collect();
        self.logic.vars(fla).iter().all(|v| allowed.contains(v))
    }

    /// Narrow the goal of a satisfiable two-step query to the sub-region
    /// actually reached, renamed back to version 0.
    fn refine_two_step_target(
        &self,
        start: Term,
        two_step_transition: Term,
        goal: Term,
        model: &Model,
    ) -> Result<Term, VerifierError> {
        let logic = self.logic;
        let transition_query = logic.mk_and([start, two_step_transition, goal]);
        debug_assert!(model.holds(logic, transition_query));
        let keep: FxHashSet<Term> = self.state_vars_at(2).into_iter().collect();
        let to_eliminate: Vec<Term> = logic
            .vars(transition_query)
            .into_iter()
            .filter(|v| !keep.contains(v))
            .collect();
        let refined = self.eliminate_vars(transition_query, &to_eliminate, model);
        if logic.is_false(refined) {
            return Err(VerifierError::Internal(
                "refined two-step target is empty".into(),
            ));
        }
        Ok(self.tm.shift(refined, -2))
    }

    fn verbose(&self) -> u32 {
        self.options.verbosity
    }

    /// Wrap up a SAFE verdict, verifying the invariant before reporting it.
    fn finish_safe(&mut self) -> Result<VerificationResult, VerifierError> {
        if !self.options.compute_witness {
            return Ok(VerificationResult::safe());
        }
        let Some(invariant) = self.inductive_invariant else {
            return Ok(VerificationResult::safe());
        };
        let logic = self.logic;
        let inductive =
            verify_kinductive(logic, &self.tm, self.init, self.transition, invariant, 1)?;
        let excludes_bad =
            check_formula(logic, logic.mk_and([invariant, self.query])).is_unsat();
        if inductive && excludes_bad {
            Ok(VerificationResult::safe_with(invariant))
        } else {
            warn!("invariant failed the 1-induction re-check; dropping the witness");
            Ok(VerificationResult::safe())
        }
    }
}

// ---------------------------------------------------------------------------
// Split variant: separate hierarchies for exactly-2ⁿ and below-2ⁿ powers
// ---------------------------------------------------------------------------

pub struct TpaSplit<'a> {
    logic: &'a Logic,
    options: Options,
}

impl<'a> TpaSplit<'a> {
    pub fn new(logic: &'a Logic, options: Options) -> Self {
        TpaSplit { logic, options }
    }
}

impl Engine for TpaSplit<'_> {
    fn solve(&mut self, system: &TransitionSystem) -> Result<VerificationResult, VerifierError> {
        SplitSolver::new(self.logic, self.options.clone(), system)?.run()
    }
}

struct SplitSolver<'a> {
    core: TpaCore<'a>,
    exact: Vec<Option<Term>>,
    less_than: Vec<Option<Term>>,
    solvers: Vec<Option<SolverFacade<'a>>>,
    cache: Vec<FxHashMap<(Term, Term), QueryResult>>,
}

impl<'a> SplitSolver<'a> {
    fn new(
        logic: &'a Logic,
        options: Options,
        system: &TransitionSystem,
    ) -> Result<Self, VerifierError> {
        let core = TpaCore::new(logic, options, system);
        let mut solver = SplitSolver {
            core,
            exact: Vec::new(),
            less_than: Vec::new(),
            solvers: Vec::new(),
            cache: Vec::new(),
        };
        solver.reset_powers()?;
        Ok(solver)
    }

    fn reset_powers(&mut self) -> Result<(), VerifierError> {
        let identity = self.core.identity_relation();
        self.exact.clear();
        self.less_than.clear();
        self.store_exact_power(0, identity)?;
        self.store_exact_power(1, self.core.transition)?;
        // Below one step there is only the identity.
        self.less_than = vec![None, Some(identity)];
        Ok(())
    }

    fn exact_power(&self, power: usize) -> Term {
        self.exact[power].expect("exact power not initialised")
    }

    fn less_than_power(&self, power: usize) -> Term {
        self.less_than[power].expect("less-than power not initialised")
    }

    fn store_exact_power(&mut self, power: usize, tr: Term) -> Result<(), VerifierError> {
        trace!(power, "strengthening exact power");
        if power >= 2 && !self.core.is_pure_transition_formula(tr) {
            return Err(VerifierError::Internal(
                "exact transition power has auxiliary variables".into(),
            ));
        }
        if self.exact.len() <= power {
            self.exact.resize(power + 1, None);
        }
        let logic = self.core.logic;
        self.exact[power] = Some(match self.exact[power] {
            None => tr,
            Some(current) => logic.mk_and([tr, current]),
        });
        if self.solvers.len() <= power + 1 {
            self.solvers.resize_with(power + 2, || None);
        }
        let strengthening = logic.mk_and([tr, self.core.next_version(tr)]);
        match &mut self.solvers[power + 1] {
            slot @ None => {
                let mut facade = SolverFacade::new(
                    logic,
                    FacadeMode::IncrementalWithRestarts,
                    strengthening,
                    self.core.options.restart_limit,
                );
                // The transition-side combination converges to the exact
                // iterated step relation.
                facade.set_strength(Strength::Farkas);
                *slot = Some(facade);
            }
            Some(solver) => solver.strengthen(strengthening),
        }
        Ok(())
    }

    fn store_less_than_power(&mut self, power: usize, tr: Term) -> Result<(), VerifierError> {
        trace!(power, "strengthening less-than power");
        if power >= 2 && !self.core.is_pure_transition_formula(tr) {
            return Err(VerifierError::Internal(
                "less-than transition power has auxiliary variables".into(),
            ));
        }
        if self.less_than.len() <= power {
            self.less_than.resize(power + 1, None);
        }
        let logic = self.core.logic;
        self.less_than[power] = Some(match self.less_than[power] {
            None => tr,
            Some(current) => logic.mk_and([tr, current]),
        });
        Ok(())
    }

    fn ensure_cache(&mut self, power: usize) {
        while self.cache.len() <= power {
            self.cache.push(FxHashMap::default());
        }
    }

    fn run(&mut self) -> Result<VerificationResult, VerifierError> {
        let mut power = 1usize;
        loop {
            poll_deadline(self.core.start, &self.core.options)?;
            match self.check_power(power)? {
                PowerVerdict::Unsafe(depth) => return Ok(VerificationResult::Unsafe { depth }),
                PowerVerdict::Safe => return self.core.finish_safe(),
                PowerVerdict::Continue => power += 1,
            }
        }
    }

    fn check_power(&mut self, power: usize) -> Result<PowerVerdict, VerifierError> {
        debug!(power, "checking power");
        let init = self.core.init;
        let query = self.core.query;
        let result = self.reachability_query_less_than(init, query, power)?;
        if result.reachable {
            return Ok(PowerVerdict::Unsafe(None));
        }
        if self.core.verbose() > 0 {
            info!(power = power - 1, "safe for fewer than 2^power steps");
        }
        if power >= 3 {
            if self.check_less_than_fixed_point(power)? {
                return Ok(PowerVerdict::Safe);
            }
            if self.check_exact_fixed_point(power - 1)? {
                return Ok(PowerVerdict::Safe);
            }
        }
        let result = self.reachability_query_exact(init, query, power)?;
        if result.reachable {
            let depth = 1u64 << (power - 1);
            return Ok(PowerVerdict::Unsafe(Some(depth)));
        }
        if self.core.verbose() > 0 {
            info!(power = power - 1, "safe up to 2^power steps");
        }
        Ok(PowerVerdict::Continue)
    }

    fn reachability_exact_zero_step(&self, from: Term, to: Term) -> Result<QueryResult, VerifierError> {
        let logic = self.core.logic;
        match check_formula(logic, logic.mk_and([from, to])) {
            SatResult::Sat => Ok(QueryResult::reachable(None)),
            SatResult::Unsat => Ok(QueryResult::unreachable()),
            SatResult::Unknown => Err(VerifierError::SolverUnknown("zero-step query".into())),
        }
    }

    fn reachability_exact_one_step(&self, from: Term, to: Term) -> Result<QueryResult, VerifierError> {
        let logic = self.core.logic;
        let goal = self.core.next_version(to);
        let fla = logic.mk_and([self.exact_power(1), from, goal]);
        match check_formula(logic, fla) {
            SatResult::Sat => Ok(QueryResult::reachable(None)),
            SatResult::Unsat => Ok(QueryResult::unreachable()),
            SatResult::Unknown => Err(VerifierError::SolverUnknown("one-step query".into())),
        }
    }

    /// Is `to` reachable from `from` in exactly 2^(power-1) steps of the
    /// concrete relation?
    fn reachability_query_exact(
        &mut self,
        from: Term,
        to: Term,
        power: usize,
    ) -> Result<QueryResult, VerifierError> {
        trace!(power, "exact reachability query");
        assert!(power >= 1);
        if power == 1 {
            return self.reachability_exact_one_step(from, to);
        }
        self.ensure_cache(power);
        if let Some(hit) = self.cache[power].get(&(from, to)) {
            trace!(power, "query cache hit");
            return Ok(hit.clone());
        }
        let logic = self.core.logic;
        let goal = self.core.tm.shift(to, 2);
        loop {
            let answer = {
                let solver = self.solvers[power]
                    .as_mut()
                    .expect("reachability solver missing for level");
                solver.check_consistent(logic.mk_and([from, goal]))?
            };
            match answer {
                Reachability::Reachable => {
                    let previous = self.exact_power(power - 1);
                    let translated = self.core.next_version(previous);
                    let model = self.solvers[power].as_mut().unwrap().last_model();
                    if power == 2 {
                        // Two concrete steps; the target region is real.
                        let refined = self.core.refine_two_step_target(
                            from,
                            logic.mk_and([previous, translated]),
                            goal,
                            &model,
                        )?;
                        let result = QueryResult::reachable(Some(refined));
                        self.cache[power].insert((from, to), result.clone());
                        return Ok(result);
                    }
                    let midpoint =
                        self.core
                            .extract_midpoint(from, previous, translated, goal, &model);
                    trace!(power, "midpoint extracted, descending");
                    let first_half = self.reachability_query_exact(from, midpoint, power - 1)?;
                    if !first_half.reachable {
                        trace!(power, "first half unreachable, retrying with refinement");
                        continue;
                    }
                    let reached_midpoint = first_half.refined.ok_or_else(|| {
                        VerifierError::Internal("refined reachable target not set".into())
                    })?;
                    let second_half =
                        self.reachability_query_exact(reached_midpoint, to, power - 1)?;
                    if !second_half.reachable {
                        trace!(power, "second half unreachable, retrying with refinement");
                        continue;
                    }
                    self.ensure_cache(power);
                    self.cache[power].insert((from, to), second_half.clone());
                    return Ok(second_half);
                }
                Reachability::Unreachable => {
                    let itp = self.solvers[power].as_mut().unwrap().last_interpolant()?;
                    let itp = self.core.simplify_interpolant(itp);
                    let itp = self.core.clean_interpolant(itp);
                    trace!(power, "learning exact strengthening");
                    self.store_exact_power(power, itp)?;
                    return Ok(QueryResult::unreachable());
                }
            }
        }
    }

    /// Is `to` reachable from `from` in fewer than 2^(power-1) steps?
    /// The two-step body is `skip ∨ (lessThan ; exact)`: either no progress
    /// on the first half-step or a shorter prefix followed by a full power.
    fn reachability_query_less_than(
        &mut self,
        from: Term,
        to: Term,
        power: usize,
    ) -> Result<QueryResult, VerifierError> {
        trace!(power, "less-than reachability query");
        assert!(power >= 1);
        if from == to {
            return Ok(QueryResult::reachable(Some(to)));
        }
        if power == 1 {
            return self.reachability_exact_zero_step(from, to);
        }
        let logic = self.core.logic;
        let goal = self.core.tm.shift(to, 2);
        loop {
            let previous_less_than = self.less_than_power(power - 1);
            let translated_exact = self.core.next_version(self.exact_power(power - 1));
            let skip_first = self.core.shift_only_next_vars(previous_less_than);
            let two_step = logic.mk_or([
                skip_first,
                logic.mk_and([previous_less_than, translated_exact]),
            ]);
            let mut solver = SmtSolver::new(logic);
            solver.assert(two_step);
            solver.assert(logic.mk_and([from, goal]));
            match solver.check() {
                SatResult::Unsat => {
                    // Conjoin the two complementary interpolants of the
                    // two-step relation.
                    let weak = solver.interpolant(
                        &PartitionMask::single(0),
                        ItpOptions {
                            strength: Strength::Farkas,
                            simplify: 4,
                        },
                    )?;
                    let strong = solver.interpolant(
                        &PartitionMask::single(0),
                        ItpOptions {
                            strength: Strength::McMillan,
                            simplify: 4,
                        },
                    )?;
                    let itp = logic.mk_and([weak, strong]);
                    let itp = self.core.simplify_interpolant(itp);
                    let itp = self.core.clean_interpolant(itp);
                    trace!(power, "learning less-than strengthening");
                    self.store_less_than_power(power, itp)?;
                    return Ok(QueryResult::unreachable());
                }
                SatResult::Sat => {
                    let model = solver.model().clone();
                    if model.holds(logic, logic.mk_and([skip_first, from, goal])) {
                        // The skip disjunct answered: the goal is reachable
                        // in fewer steps already.
                        trace!(power, "skip disjunct satisfied");
                        if power == 2 {
                            // Reachable in zero steps.
                            return Ok(QueryResult::reachable(Some(logic.mk_and([from, to]))));
                        }
                        let sub = self.reachability_query_less_than(from, to, power - 1)?;
                        if sub.reachable {
                            return Ok(sub);
                        }
                        continue;
                    }
                    // The composed disjunct answered.
                    if power == 2 {
                        // Not reachable in zero steps, so exactly one step.
                        let refined = self.core.refine_two_step_target(
                            from,
                            logic.mk_and([previous_less_than, translated_exact]),
                            goal,
                            &model,
                        )?;
                        return Ok(QueryResult::reachable(Some(refined)));
                    }
                    let midpoint = self.core.extract_midpoint(
                        from,
                        previous_less_than,
                        translated_exact,
                        goal,
                        &model,
                    );
                    let first_half =
                        self.reachability_query_less_than(from, midpoint, power - 1)?;
                    if !first_half.reachable {
                        trace!(power, "first half unreachable, retrying with refinement");
                        continue;
                    }
                    let reached_midpoint = first_half.refined.ok_or_else(|| {
                        VerifierError::Internal("refined reachable target not set".into())
                    })?;
                    let second_half =
                        self.reachability_query_exact(reached_midpoint, to, power - 1)?;
                    if !second_half.reachable {
                        trace!(power, "second half unreachable, retrying with refinement");
                        continue;
                    }
                    return Ok(second_half);
                }
                SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown(
                        "less-than reachability query".into(),
                    ))
                }
            }
        }
    }

    /// `LessThan[power]` is implied by its defining two-step composition.
    fn verify_less_than_power(&self, power: usize) -> Result<bool, VerifierError> {
        let logic = self.core.logic;
        let current = self.less_than_power(power);
        let previous = self.less_than_power(power - 1);
        let previous_exact = self.exact_power(power - 1);
        let mut solver = SmtSolver::new(logic);
        solver.assert(logic.mk_or([
            self.core.shift_only_next_vars(previous),
            logic.mk_and([previous, self.core.next_version(previous_exact)]),
        ]));
        solver.assert(logic.mk_not(self.core.shift_only_next_vars(current)));
        match solver.check() {
            SatResult::Unsat => Ok(true),
            SatResult::Sat => Ok(false),
            SatResult::Unknown => Err(VerifierError::SolverUnknown(
                "less-than power verification".into(),
            )),
        }
    }

    /// `Exact[power]` is implied by the self-composition of the level below.
    fn verify_exact_power(&self, power: usize) -> Result<bool, VerifierError> {
        if power > 2 && !self.verify_exact_power(power - 1)? {
            return Ok(false);
        }
        let logic = self.core.logic;
        let current = self.exact_power(power);
        let previous = self.exact_power(power - 1);
        let mut solver = SmtSolver::new(logic);
        solver.assert(logic.mk_and([previous, self.core.next_version(previous)]));
        solver.assert(logic.mk_not(self.core.shift_only_next_vars(current)));
        match solver.check() {
            SatResult::Unsat => Ok(true),
            SatResult::Sat => Ok(false),
            SatResult::Unknown => Err(VerifierError::SolverUnknown(
                "exact power verification".into(),
            )),
        }
    }

    /// Fixed-point detection on the less-than hierarchy: a level closed
    /// under one more concrete step (from the right or from the left) bounds
    /// the whole reachable space.
    fn check_less_than_fixed_point(&mut self, power: usize) -> Result<bool, VerifierError> {
        if cfg!(debug_assertions) {
            debug_assert!(self.verify_less_than_power(power)?);
        }
        let logic = self.core.logic;
        for level in 3..=power {
            let current = self.less_than_power(level);
            // Right fixed point: one more step after the level stays inside.
            {
                let mut solver = SmtSolver::new(logic);
                solver.assert(logic.mk_and([
                    current,
                    self.core.next_version(self.core.transition),
                    logic.mk_not(self.core.shift_only_next_vars(current)),
                ]));
                let mut verdict = solver.check();
                let mut restricted = false;
                if verdict != SatResult::Unsat {
                    solver.push();
                    solver.assert(self.core.init);
                    verdict = solver.check();
                    restricted = verdict == SatResult::Unsat;
                }
                if verdict == SatResult::Unknown {
                    return Err(VerifierError::SolverUnknown(
                        "right fixed-point check".into(),
                    ));
                }
                if verdict == SatResult::Unsat {
                    info!(
                        level,
                        power,
                        restricted,
                        "right fixed point in the less-than hierarchy"
                    );
                    if self.core.options.compute_witness {
                        let qe = QuantifierElimination::new(logic);
                        let reachable =
                            qe.keep_only(logic.mk_and([self.core.init, current]), &self.core.state_vars_at(1));
                        self.core.inductive_invariant =
                            Some(self.core.tm.shift(reachable, -1));
                    }
                    return Ok(true);
                }
            }
            // Left fixed point: one step before the level stays inside.
            {
                let mut solver = SmtSolver::new(logic);
                solver.assert(logic.mk_and([
                    self.core.transition,
                    self.core.next_version(current),
                    logic.mk_not(self.core.shift_only_next_vars(current)),
                ]));
                let mut verdict = solver.check();
                let mut restricted = false;
                if verdict != SatResult::Unsat {
                    solver.push();
                    solver.assert(self.core.tm.shift(self.core.query, 2));
                    verdict = solver.check();
                    restricted = verdict == SatResult::Unsat;
                }
                if verdict == SatResult::Unknown {
                    return Err(VerifierError::SolverUnknown("left fixed-point check".into()));
                }
                if verdict == SatResult::Unsat {
                    info!(
                        level,
                        power,
                        restricted,
                        "left fixed point in the less-than hierarchy"
                    );
                    if self.core.options.compute_witness {
                        let qe = QuantifierElimination::new(logic);
                        let reaches_bad = qe.keep_only(
                            logic.mk_and([current, self.core.next_version(self.core.query)]),
                            &self.core.state_vars_at(0),
                        );
                        self.core.inductive_invariant = Some(logic.mk_not(reaches_bad));
                    }
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Fixed-point detection on the exact hierarchy. On success the
    /// transition invariant lifts to a k-inductive state invariant with
    /// k = 2^(level-1), then down to a 1-inductive one.
    fn check_exact_fixed_point(&mut self, power: usize) -> Result<bool, VerifierError> {
        let logic = self.core.logic;
        for level in 2..=power {
            let current = self.exact_power(level);
            let two_step = logic.mk_and([current, self.core.next_version(current)]);
            let shifted = self.core.shift_only_next_vars(current);
            let mut solver = SmtSolver::new(logic);
            solver.assert(logic.mk_and([two_step, logic.mk_not(shifted)]));
            let mut verdict = solver.check();
            let mut restricted = 0u8;
            if verdict != SatResult::Unsat {
                solver.push();
                solver.assert(self.core.tm.shift(
                    logic.mk_and([self.core.init, self.less_than_power(level)]),
                    -1,
                ));
                verdict = solver.check();
                if verdict == SatResult::Unsat {
                    restricted = 1;
                }
            }
            if verdict != SatResult::Unsat && restricted == 0 {
                solver.pop();
                solver.push();
                solver.assert(logic.mk_and([
                    self.core.tm.shift(self.less_than_power(level), 2),
                    self.core.tm.shift(self.core.query, 3),
                ]));
                verdict = solver.check();
                if verdict == SatResult::Unsat {
                    restricted = 2;
                }
            }
            if verdict == SatResult::Unknown {
                return Err(VerifierError::SolverUnknown("exact fixed-point check".into()));
            }
            if verdict == SatResult::Unsat {
                info!(
                    level,
                    power,
                    restricted = restricted as u64,
                    "fixed point in the exact hierarchy"
                );
                if self.core.options.compute_witness && restricted != 2 {
                    if level as u32 <= self.core.options.max_lift_power {
                        self.build_exact_invariant(level)?;
                    } else {
                        warn!(
                            level,
                            "k-inductive invariant found, but k is too large to lift"
                        );
                        self.core.inductive_invariant = None;
                    }
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Turn an exact fixed point at `level` into a 1-inductive invariant.
    fn build_exact_invariant(&mut self, level: usize) -> Result<(), VerifierError> {
        let logic = self.core.logic;
        if cfg!(debug_assertions) {
            debug_assert!(self.verify_less_than_power(level)?);
            debug_assert!(self.verify_exact_power(level)?);
        }
        let less_than = self.less_than_power(level);
        let exact = self.exact_power(level);
        let transition_invariant = logic.mk_or([
            self.core.shift_only_next_vars(less_than),
            logic.mk_and([less_than, self.core.next_version(exact)]),
        ]);
        let qe = QuantifierElimination::new(logic);
        let state_invariant = qe.eliminate(
            logic.mk_and([self.core.init, transition_invariant]),
            &self.core.state_vars_at(0),
        );
        let state_invariant = qe.eliminate(state_invariant, &self.core.state_vars_at(1));
        let state_invariant = self.core.tm.shift(state_invariant, -2);
        let k = 1u64 << (level - 1);
        if !verify_kinductive(
            logic,
            &self.core.tm,
            self.core.init,
            self.core.transition,
            state_invariant,
            k,
        )? {
            warn!(k, "state invariant failed the k-induction check");
            self.core.inductive_invariant = None;
            return Ok(());
        }
        let lifted = kinductive_to_inductive(
            logic,
            &self.core.tm,
            self.core.transition,
            &self.core.state_vars,
            state_invariant,
            k,
        );
        self.core.inductive_invariant = Some(lifted);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Basic variant: one hierarchy of at-most-2ⁿ powers
// ---------------------------------------------------------------------------

pub struct TpaBasic<'a> {
    logic: &'a Logic,
    options: Options,
}

impl<'a> TpaBasic<'a> {
    pub fn new(logic: &'a Logic, options: Options) -> Self {
        TpaBasic { logic, options }
    }
}

impl Engine for TpaBasic<'_> {
    fn solve(&mut self, system: &TransitionSystem) -> Result<VerificationResult, VerifierError> {
        BasicSolver::new(self.logic, self.options.clone(), system)?.run()
    }
}

struct BasicSolver<'a> {
    core: TpaCore<'a>,
    levels: Vec<Option<Term>>,
    solvers: Vec<Option<SolverFacade<'a>>>,
    cache: Vec<FxHashMap<(Term, Term), QueryResult>>,
}

impl<'a> BasicSolver<'a> {
    fn new(
        logic: &'a Logic,
        options: Options,
        system: &TransitionSystem,
    ) -> Result<Self, VerifierError> {
        let core = TpaCore::new(logic, options, system);
        let mut solver = BasicSolver {
            core,
            levels: Vec::new(),
            solvers: Vec::new(),
            cache: Vec::new(),
        };
        let identity = solver.core.identity_relation();
        let base = logic.mk_or([identity, solver.core.transition]);
        solver.store_level_transition(0, base)?;
        Ok(solver)
    }

    fn level_transition(&self, power: usize) -> Term {
        self.levels[power].expect("level transition not initialised")
    }

    fn store_level_transition(&mut self, power: usize, tr: Term) -> Result<(), VerifierError> {
        trace!(power, "strengthening level transition");
        if power >= 2 && !self.core.is_pure_transition_formula(tr) {
            return Err(VerifierError::Internal(
                "level transition has auxiliary variables".into(),
            ));
        }
        if self.levels.len() <= power {
            self.levels.resize(power + 1, None);
        }
        let logic = self.core.logic;
        self.levels[power] = Some(match self.levels[power] {
            None => tr,
            Some(current) => logic.mk_and([tr, current]),
        });
        if self.solvers.len() <= power + 1 {
            self.solvers.resize_with(power + 2, || None);
        }
        let strengthening = logic.mk_and([tr, self.core.next_version(tr)]);
        match &mut self.solvers[power + 1] {
            slot @ None => {
                let mut facade = SolverFacade::new(
                    logic,
                    FacadeMode::IncrementalWithRestarts,
                    strengthening,
                    self.core.options.restart_limit,
                );
                facade.set_strength(Strength::Farkas);
                *slot = Some(facade);
            }
            Some(solver) => solver.strengthen(strengthening),
        }
        Ok(())
    }

    fn ensure_cache(&mut self, power: usize) {
        while self.cache.len() <= power {
            self.cache.push(FxHashMap::default());
        }
    }

    fn run(&mut self) -> Result<VerificationResult, VerifierError> {
        let mut power = 1usize;
        loop {
            poll_deadline(self.core.start, &self.core.options)?;
            match self.check_power(power)? {
                PowerVerdict::Unsafe(depth) => return Ok(VerificationResult::Unsafe { depth }),
                PowerVerdict::Safe => return self.core.finish_safe(),
                PowerVerdict::Continue => power += 1,
            }
        }
    }

    fn check_power(&mut self, power: usize) -> Result<PowerVerdict, VerifierError> {
        debug!(power, "checking power");
        let init = self.core.init;
        let query = self.core.query;
        let result = self.reachability_query(init, query, power)?;
        if result.reachable {
            return Ok(PowerVerdict::Unsafe(None));
        }
        if self.core.verbose() > 0 {
            info!(power, "safe up to 2^power steps");
        }
        if power >= 3 && self.check_fixed_point(power)? {
            return Ok(PowerVerdict::Safe);
        }
        Ok(PowerVerdict::Continue)
    }

    fn reachability_zero_step(&self, from: Term, to: Term) -> Result<QueryResult, VerifierError> {
        let logic = self.core.logic;
        match check_formula(logic, logic.mk_and([from, to])) {
            SatResult::Sat => Ok(QueryResult::reachable(None)),
            SatResult::Unsat => Ok(QueryResult::unreachable()),
            SatResult::Unknown => Err(VerifierError::SolverUnknown("zero-step query".into())),
        }
    }

    fn reachability_one_step(&self, from: Term, to: Term) -> Result<QueryResult, VerifierError> {
        let logic = self.core.logic;
        let goal = self.core.next_version(to);
        let fla = logic.mk_and([self.core.transition, from, goal]);
        match check_formula(logic, fla) {
            SatResult::Sat => Ok(QueryResult::reachable(None)),
            SatResult::Unsat => Ok(QueryResult::unreachable()),
            SatResult::Unknown => Err(VerifierError::SolverUnknown("one-step query".into())),
        }
    }

    /// Is `to` reachable from `from` in at most 2^power steps?
    fn reachability_query(
        &mut self,
        from: Term,
        to: Term,
        power: usize,
    ) -> Result<QueryResult, VerifierError> {
        trace!(power, "level reachability query");
        if power == 0 {
            let zero = self.reachability_zero_step(from, to)?;
            if zero.reachable {
                return Ok(zero);
            }
            return self.reachability_one_step(from, to);
        }
        self.ensure_cache(power);
        if let Some(hit) = self.cache[power].get(&(from, to)) {
            trace!(power, "query cache hit");
            return Ok(hit.clone());
        }
        let logic = self.core.logic;
        let goal = self.core.tm.shift(to, 2);
        loop {
            let answer = {
                let solver = self.solvers[power]
                    .as_mut()
                    .expect("reachability solver missing for level");
                solver.check_consistent(logic.mk_and([from, goal]))?
            };
            match answer {
                Reachability::Reachable => {
                    let previous = self.level_transition(power - 1);
                    let translated = self.core.next_version(previous);
                    let model = self.solvers[power].as_mut().unwrap().last_model();
                    if power == 1 {
                        let refined = self.core.refine_two_step_target(
                            from,
                            logic.mk_and([previous, translated]),
                            goal,
                            &model,
                        )?;
                        let result = QueryResult::reachable(Some(refined));
                        self.cache[power].insert((from, to), result.clone());
                        return Ok(result);
                    }
                    let midpoint =
                        self.core
                            .extract_midpoint(from, previous, translated, goal, &model);
                    let first_half = self.reachability_query(from, midpoint, power - 1)?;
                    if !first_half.reachable {
                        trace!(power, "first half unreachable, retrying with refinement");
                        continue;
                    }
                    let reached_midpoint = first_half.refined.ok_or_else(|| {
                        VerifierError::Internal("refined reachable target not set".into())
                    })?;
                    let second_half = self.reachability_query(reached_midpoint, to, power - 1)?;
                    if !second_half.reachable {
                        trace!(power, "second half unreachable, retrying with refinement");
                        continue;
                    }
                    self.ensure_cache(power);
                    self.cache[power].insert((from, to), second_half.clone());
                    return Ok(second_half);
                }
                Reachability::Unreachable => {
                    let itp = self.solvers[power].as_mut().unwrap().last_interpolant()?;
                    let itp = self.core.simplify_interpolant(itp);
                    let itp = self.core.clean_interpolant(itp);
                    trace!(power, "learning level strengthening");
                    self.store_level_transition(power, itp)?;
                    return Ok(QueryResult::unreachable());
                }
            }
        }
    }

    /// `Level[power]` is implied by the self-composition of the level below.
    fn verify_level(&self, power: usize) -> Result<bool, VerifierError> {
        let logic = self.core.logic;
        let current = self.level_transition(power);
        let previous = self.level_transition(power - 1);
        let mut solver = SmtSolver::new(logic);
        solver.assert(logic.mk_and([previous, self.core.next_version(previous)]));
        solver.assert(logic.mk_not(self.core.shift_only_next_vars(current)));
        match solver.check() {
            SatResult::Unsat => Ok(true),
            SatResult::Sat => Ok(false),
            SatResult::Unknown => Err(VerifierError::SolverUnknown("level verification".into())),
        }
    }

    fn check_fixed_point(&mut self, power: usize) -> Result<bool, VerifierError> {
        if cfg!(debug_assertions) {
            debug_assert!(self.verify_level(power)?);
        }
        let logic = self.core.logic;
        for level in 3..=power {
            let current = self.level_transition(level);
            // Right fixed point.
            {
                let mut solver = SmtSolver::new(logic);
                solver.assert(logic.mk_and([
                    current,
                    self.core.next_version(self.core.transition),
                    logic.mk_not(self.core.shift_only_next_vars(current)),
                ]));
                let mut verdict = solver.check();
                let mut restricted = false;
                if verdict != SatResult::Unsat {
                    solver.push();
                    solver.assert(self.core.init);
                    verdict = solver.check();
                    restricted = verdict == SatResult::Unsat;
                }
                if verdict == SatResult::Unknown {
                    return Err(VerifierError::SolverUnknown(
                        "right fixed-point check".into(),
                    ));
                }
                if verdict == SatResult::Unsat {
                    info!(level, power, restricted, "right fixed point");
                    if self.core.options.compute_witness {
                        let qe = QuantifierElimination::new(logic);
                        let reachable = qe.keep_only(
                            logic.mk_and([self.core.init, current]),
                            &self.core.state_vars_at(1),
                        );
                        self.core.inductive_invariant =
                            Some(self.core.tm.shift(reachable, -1));
                    }
                    return Ok(true);
                }
            }
            // Left fixed point.
            {
                let mut solver = SmtSolver::new(logic);
                solver.assert(logic.mk_and([
                    self.core.transition,
                    self.core.next_version(current),
                    logic.mk_not(self.core.shift_only_next_vars(current)),
                ]));
                let mut verdict = solver.check();
                let mut restricted = false;
                if verdict != SatResult::Unsat {
                    solver.push();
                    solver.assert(self.core.tm.shift(self.core.query, 2));
                    verdict = solver.check();
                    restricted = verdict == SatResult::Unsat;
                }
                if verdict == SatResult::Unknown {
                    return Err(VerifierError::SolverUnknown("left fixed-point check".into()));
                }
                if verdict == SatResult::Unsat {
                    info!(level, power, restricted, "left fixed point");
                    if self.core.options.compute_witness {
                        let qe = QuantifierElimination::new(logic);
                        let reaches_bad = qe.keep_only(
                            logic.mk_and([current, self.core.next_version(self.core.query)]),
                            &self.core.state_vars_at(0),
                        );
                        self.core.inductive_invariant = Some(logic.mk_not(reaches_bad));
                    }
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
