//! Engine selection and the top-level driver

use crate::error::VerifierError;
use crate::kind::Kind;
use crate::options::{EngineKind, Options};
use crate::pdkind::PdKind;
use crate::result::VerificationResult;
use crate::tpa::{TpaBasic, TpaSplit};
use crate::transys::TransitionSystem;
use basalt_logic::Logic;
use std::time::Instant;
use tracing::debug;

/// A verification engine: decides `(Init, Tr, Bad)`.
pub trait Engine {
    fn solve(&mut self, system: &TransitionSystem) -> Result<VerificationResult, VerifierError>;
}

/// Instantiate the engine selected by the options.
pub fn make_engine<'a>(logic: &'a Logic, options: Options) -> Box<dyn Engine + 'a> {
    match options.engine {
        EngineKind::Kind => Box::new(Kind::new(logic, options)),
        EngineKind::PdKind => Box::new(PdKind::new(logic, options)),
        EngineKind::Tpa => Box::new(TpaBasic::new(logic, options)),
        EngineKind::TpaSplit => Box::new(TpaSplit::new(logic, options)),
    }
}

/// Run the selected engine. A solver giving up or the deadline expiring
/// yields `Unknown`; every other error aborts the session.
pub fn verify(
    logic: &Logic,
    system: &TransitionSystem,
    options: Options,
) -> Result<VerificationResult, VerifierError> {
    let mut engine = make_engine(logic, options);
    match engine.solve(system) {
        Ok(result) => Ok(result),
        Err(VerifierError::SolverUnknown(reason)) => {
            debug!(%reason, "solver gave up; reporting unknown");
            Ok(VerificationResult::Unknown)
        }
        Err(VerifierError::Timeout) => Ok(VerificationResult::Unknown),
        Err(other) => Err(other),
    }
}

/// Deadline poll, called between outer iterations of the engine main loops.
pub(crate) fn poll_deadline(start: Instant, options: &Options) -> Result<(), VerifierError> {
    if let Some(budget) = options.timeout {
        if start.elapsed() > budget {
            return Err(VerifierError::Timeout);
        }
    }
    Ok(())
}
