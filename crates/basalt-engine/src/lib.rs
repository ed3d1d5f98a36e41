//! Symbolic model checking of linear-arithmetic transition systems
//!
//! The crate verifies safety problems `(Init, Tr, Bad)` produced by a
//! Constrained Horn Clause front end. Four engines share the
//! [`Engine`](engine::Engine) interface:
//!
//! - [`kind`]: plain k-induction;
//! - [`pdkind`]: property-directed k-induction over an induction frame of
//!   lemma/counter-example pairs;
//! - [`tpa`]: transition power abstraction, in a single-hierarchy and a
//!   split-hierarchy variant, with exponentially accelerated reachability.
//!
//! Supporting components: the [`time`] machine versioning state variables,
//! [`mbp`] model-based projection, exact [`qe`] quantifier elimination, the
//! [`facade`] over the interpolating solver and the layered [`reach`]
//! checker used by the property-directed engine.
//!
//! ```
//! use basalt_engine::{verify, EngineKind, Options, TransitionSystem};
//! use basalt_logic::{Logic, Sort};
//!
//! let logic = Logic::new();
//! let x = logic.mk_var("x", Sort::Int);
//! let x_next = logic.mk_var_versioned("x", 1, Sort::Int);
//! let system = TransitionSystem::new(
//!     &logic,
//!     vec![x],
//!     vec![],
//!     logic.mk_eq(x, logic.mk_int(0)),
//!     logic.mk_eq(x_next, logic.mk_add([x, logic.mk_int(1)])),
//!     logic.mk_lt(x, logic.mk_int(0)),
//! )
//! .unwrap();
//! let result = verify(&logic, &system, Options::with_engine(EngineKind::PdKind)).unwrap();
//! assert!(result.is_safe());
//! ```

pub mod engine;
pub mod error;
pub mod facade;
pub mod induction;
pub mod kind;
pub mod mbp;
pub mod options;
pub mod pdkind;
pub mod qe;
pub mod reach;
pub mod result;
pub mod time;
pub mod tpa;
pub mod transys;

pub use engine::{make_engine, verify, Engine};
pub use error::VerifierError;
pub use mbp::ModelBasedProjection;
pub use options::{EngineKind, Options};
pub use qe::QuantifierElimination;
pub use result::VerificationResult;
pub use time::TimeMachine;
pub use transys::TransitionSystem;
