//! Engine options
//!
//! The host hands options over as a string map; [`Options::from_map`] parses
//! the recognised keys. Engines read the typed form.

use crate::error::VerifierError;
use std::collections::HashMap;
use std::time::Duration;

/// Which engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Plain k-induction.
    Kind,
    /// Property-directed k-induction.
    #[default]
    PdKind,
    /// Transition power abstraction, single hierarchy.
    Tpa,
    /// Transition power abstraction, split hierarchies.
    TpaSplit,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub engine: EngineKind,
    pub compute_witness: bool,
    pub verbosity: u32,
    /// Replace model-based projection with exact quantifier elimination.
    pub use_qe: bool,
    /// Wall-clock budget, polled between outer iterations.
    pub timeout: Option<Duration>,
    /// Consolidation threshold of the restarting solver facade.
    pub restart_limit: usize,
    /// Highest power for which an exact fixed point is lifted to a
    /// 1-inductive invariant; beyond it SAFE is reported without a witness.
    pub max_lift_power: u32,
    /// Depth bound of the plain k-induction engine.
    pub kind_max_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            engine: EngineKind::default(),
            compute_witness: false,
            verbosity: 0,
            use_qe: false,
            timeout: None,
            restart_limit: 100,
            max_lift_power: 10,
            kind_max_depth: 1000,
        }
    }
}

impl Options {
    pub fn with_engine(engine: EngineKind) -> Self {
        Options {
            engine,
            ..Default::default()
        }
    }

    pub fn witness(mut self) -> Self {
        self.compute_witness = true;
        self
    }

    /// Parse the recognised keys of a host-provided option map.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, VerifierError> {
        let mut options = Options::default();
        for (key, value) in map {
            match key.as_str() {
                "engine" => {
                    options.engine = match value.as_str() {
                        "kind" => EngineKind::Kind,
                        "pdkind" => EngineKind::PdKind,
                        "tpa" => EngineKind::Tpa,
                        "tpa-split" => EngineKind::TpaSplit,
                        other => {
                            return Err(VerifierError::BadOption(format!("engine={other}")))
                        }
                    }
                }
                "compute-witness" => {
                    options.compute_witness = value == "true";
                }
                "verbose" => {
                    options.verbosity = value
                        .parse()
                        .map_err(|_| VerifierError::BadOption(format!("verbose={value}")))?;
                }
                "use-qe" => {
                    options.use_qe = value == "true";
                }
                "timeout-ms" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| VerifierError::BadOption(format!("timeout-ms={value}")))?;
                    options.timeout = Some(Duration::from_millis(ms));
                }
                other => return Err(VerifierError::BadOption(other.to_string())),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognised_keys() {
        let mut map = HashMap::new();
        map.insert("engine".to_string(), "tpa-split".to_string());
        map.insert("compute-witness".to_string(), "true".to_string());
        map.insert("verbose".to_string(), "2".to_string());
        let options = Options::from_map(&map).unwrap();
        assert_eq!(options.engine, EngineKind::TpaSplit);
        assert!(options.compute_witness);
        assert_eq!(options.verbosity, 2);
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut map = HashMap::new();
        map.insert("no-such-option".to_string(), "1".to_string());
        assert!(Options::from_map(&map).is_err());
    }
}
