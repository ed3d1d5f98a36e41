//! Property-directed k-induction
//!
//! The engine maintains an induction frame of (lemma, counter-example)
//! pairs. Each round picks an unrolling depth `k` and tries to push every
//! lemma forward by `k` steps; lemmas that fail consecution are either
//! strengthened with an interpolant from the reachability sub-procedure or
//! replaced after their counter-example region is shown reachable. A round
//! that leaves the frame unchanged has found a k-inductive invariant; a
//! reachable counter-example refutes the property.

use crate::engine::{poll_deadline, Engine};
use crate::error::VerifierError;
use crate::induction::{kinductive_to_inductive, verify_kinductive};
use crate::options::Options;
use crate::reach::{BoundedReach, ReachabilityChecker};
use crate::result::VerificationResult;
use crate::time::TimeMachine;
use crate::transys::TransitionSystem;
use basalt_logic::{check_formula, Logic, Term};
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A lemma paired with the generalised bad region it must exclude.
/// `cex_steps` counts the transition steps from the counter-example region
/// to an actual bad state; it rides along for counterexample depth
/// reporting and takes no part in identity.
#[derive(Debug, Clone)]
struct IFrameElement {
    lemma: Term,
    cex: Term,
    cex_steps: u64,
}

impl PartialEq for IFrameElement {
    fn eq(&self, other: &Self) -> bool {
        self.lemma == other.lemma && self.cex == other.cex
    }
}

impl Eq for IFrameElement {}

impl PartialOrd for IFrameElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IFrameElement {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.lemma, self.cex).cmp(&(other.lemma, other.cex))
    }
}

type IFrame = BTreeSet<IFrameElement>;

struct PushResult {
    iframe: IFrame,
    new_iframe: IFrame,
    n: usize,
    invalid: bool,
    invalid_depth: Option<u64>,
}

pub struct PdKind<'a> {
    logic: &'a Logic,
    options: Options,
}

impl<'a> PdKind<'a> {
    pub fn new(logic: &'a Logic, options: Options) -> Self {
        PdKind { logic, options }
    }

    /// The unrolling depth of the next push; any `1 <= k <= n + 1` is sound.
    fn pick_k(&self, n: usize) -> usize {
        n + 1
    }

    fn solve_system(
        &mut self,
        system: &TransitionSystem,
    ) -> Result<VerificationResult, VerifierError> {
        let logic = self.logic;
        let start = Instant::now();

        // Empty initial states are vacuously safe.
        if check_formula(logic, system.init()).is_unsat() {
            return Ok(self.safe_witness(logic.term_false()));
        }
        // An initial bad state is a length-zero counterexample.
        if check_formula(logic, logic.mk_and([system.init(), system.bad()])).is_sat() {
            return Ok(VerificationResult::unsafe_at(0));
        }

        let tm = TimeMachine::new(logic);
        let mut checker = ReachabilityChecker::new(logic, &tm, system);

        let p = logic.mk_not(system.bad());
        let mut iframe: IFrame = IFrame::new();
        iframe.insert(IFrameElement {
            lemma: p,
            cex: system.bad(),
            cex_steps: 0,
        });
        let mut n = 0usize;

        loop {
            poll_deadline(start, &self.options)?;
            let k = self.pick_k(n);
            info!(n, k, frame = iframe.len(), "push round");
            let result = self.push(system, &tm, &mut checker, start, iframe, n, k)?;
            if result.invalid {
                return Ok(VerificationResult::Unsafe {
                    depth: result.invalid_depth,
                });
            }
            if result.iframe == result.new_iframe {
                debug!(k, "induction frame is stable");
                return self.conclude_safe(system, &tm, &result.new_iframe, k);
            }
            n = result.n;
            iframe = result.new_iframe;
        }
    }

    /// One push round: process every element of the frame FIFO, trying to
    /// push its lemma forward by `k` steps.
    fn push(
        &mut self,
        system: &TransitionSystem,
        tm: &TimeMachine<'a>,
        checker: &mut ReachabilityChecker<'a, '_>,
        start: Instant,
        mut iframe: IFrame,
        n: usize,
        k: usize,
    ) -> Result<PushResult, VerifierError> {
        let logic = self.logic;
        let transition = system.transition();

        let mut queue: VecDeque<IFrameElement> = iframe.iter().cloned().collect();
        let mut new_iframe = IFrame::new();
        let mut np = n + k;
        let mut invalid = false;
        let mut invalid_depth = None;
        let range_from = n + 1 - k;

        while !invalid {
            poll_deadline(start, &self.options)?;
            let Some(elem) = queue.pop_front() else { break };

            let iframe_abs = logic.mk_and(iframe.iter().map(|e| e.lemma));

            // Unroll: Tr_0 ∧ A_1 ∧ Tr_1 ∧ … ∧ Tr_{k-1} in constraint form.
            let mut t_k = transition;
            let mut frame_constraints = logic.term_true();
            for step in 1..k {
                t_k = logic.mk_and([t_k, tm.shift(transition, step as i32)]);
                frame_constraints =
                    logic.mk_and([frame_constraints, tm.shift(iframe_abs, step as i32)]);
            }
            let t_k_constr = logic.mk_and([t_k, frame_constraints]);

            let not_lemma = logic.mk_not(elem.lemma);
            let not_lemma_k = tm.shift(not_lemma, k as i32);

            // Consecution: A ∧ T_k ∧ ¬lemma_k.
            let mut consecution = basalt_logic::SmtSolver::new(logic);
            consecution.assert(iframe_abs);
            consecution.assert(t_k_constr);
            consecution.assert(not_lemma_k);
            match consecution.check() {
                basalt_logic::SatResult::Unsat => {
                    new_iframe.insert(elem);
                    continue;
                }
                basalt_logic::SatResult::Sat => {}
                basalt_logic::SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown("consecution check".into()))
                }
            }
            let model1 = consecution.model().clone();

            // Is the counter-example region itself reachable through T_k?
            let cex_k = tm.shift(elem.cex, k as i32);
            let mut cex_query = basalt_logic::SmtSolver::new(logic);
            cex_query.assert(iframe_abs);
            cex_query.assert(t_k_constr);
            cex_query.assert(cex_k);
            match cex_query.check() {
                basalt_logic::SatResult::Sat => {
                    let model2 = cex_query.model().clone();
                    let g_cex = checker.generalize(&model2, t_k, cex_k);
                    let cex_steps = elem.cex_steps + k as u64;
                    match checker.check_reachability(range_from, n, g_cex)? {
                        BoundedReach::ReachableAt(depth) => {
                            invalid = true;
                            invalid_depth = Some(depth as u64 + cex_steps);
                        }
                        BoundedReach::Unreachable(g_abs) => {
                            let fresh = IFrameElement {
                                lemma: g_abs,
                                cex: g_cex,
                                cex_steps,
                            };
                            iframe.insert(fresh.clone());
                            queue.push_back(fresh);
                            queue.push_back(elem);
                        }
                    }
                    continue;
                }
                basalt_logic::SatResult::Unsat => {}
                basalt_logic::SatResult::Unknown => {
                    return Err(VerifierError::SolverUnknown(
                        "counter-example reachability check".into(),
                    ))
                }
            }

            // Block the counterexample-to-induction.
            let g_cti = checker.generalize(&model1, t_k, not_lemma_k);
            match checker.check_reachability(range_from, n, g_cti)? {
                BoundedReach::ReachableAt(depth) => {
                    // The CTI is genuinely reachable: the lemma cannot be
                    // pushed at this depth. Widen the frontier instead.
                    let widen_to = depth + k;
                    match checker.check_reachability(n + 1, widen_to, not_lemma)? {
                        BoundedReach::ReachableAt(depth2) => np = np.min(depth2),
                        BoundedReach::Unreachable(_) => np = np.min(widen_to),
                    }
                    let replacement = IFrameElement {
                        lemma: logic.mk_not(elem.cex),
                        cex: elem.cex,
                        cex_steps: elem.cex_steps,
                    };
                    iframe.insert(replacement.clone());
                    new_iframe.insert(replacement);
                }
                BoundedReach::Unreachable(g_abs) => {
                    let strengthened = IFrameElement {
                        lemma: logic.mk_and([elem.lemma, g_abs]),
                        cex: elem.cex,
                        cex_steps: elem.cex_steps,
                    };
                    iframe.remove(&elem);
                    iframe.insert(strengthened.clone());
                    queue.push_back(strengthened);
                }
            }
        }

        Ok(PushResult {
            iframe,
            new_iframe,
            n: np,
            invalid,
            invalid_depth,
        })
    }

    /// A stable frame means the conjunction of its lemmas is k-inductive;
    /// lift it for the witness.
    fn conclude_safe(
        &self,
        system: &TransitionSystem,
        tm: &TimeMachine<'a>,
        frame: &IFrame,
        k: usize,
    ) -> Result<VerificationResult, VerifierError> {
        if !self.options.compute_witness {
            return Ok(VerificationResult::safe());
        }
        let logic = self.logic;
        let invariant = logic.mk_and(frame.iter().map(|e| e.lemma));
        if !verify_kinductive(
            logic,
            tm,
            system.init(),
            system.transition(),
            invariant,
            k as u64,
        )? {
            warn!("stable frame failed the k-induction re-check; dropping the witness");
            return Ok(VerificationResult::safe());
        }
        let lifted = kinductive_to_inductive(
            logic,
            tm,
            system.transition(),
            system.state_vars(),
            invariant,
            k as u64,
        );
        if verify_kinductive(logic, tm, system.init(), system.transition(), lifted, 1)? {
            Ok(VerificationResult::safe_with(lifted))
        } else {
            warn!("lifted invariant failed the 1-induction re-check; dropping the witness");
            Ok(VerificationResult::safe())
        }
    }

    fn safe_witness(&self, invariant: Term) -> VerificationResult {
        if self.options.compute_witness {
            VerificationResult::safe_with(invariant)
        } else {
            VerificationResult::safe()
        }
    }
}

impl Engine for PdKind<'_> {
    fn solve(&mut self, system: &TransitionSystem) -> Result<VerificationResult, VerifierError> {
        self.solve_system(system)
    }
}
