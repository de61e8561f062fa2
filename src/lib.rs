//! # emd-approx
//!
//! Structured-sparse approximation of a real matrix under an
//! Earth-Mover's-Distance budget.
//!
//! Given R×C amplitudes, a per-column sparsity `s`, and an inclusive window
//! on the allowable EMD cost, the solver selects a boolean support mask that
//! activates at most `s` entries per column, keeps the vertical transport
//! cost between adjacent columns inside the window, and maximizes the sum of
//! ingested amplitudes over the activated entries.
//!
//! Under the hood the problem is a min-cost max-flow on a layered
//! unit-capacity network ([`flow`]), solved by successive shortest
//! augmenting paths with node potentials, and wrapped in a Lagrangian
//! search over the transport multiplier λ.
//!
//! ## Quick Start
//!
//! ```rust
//! use emd_approx::{solve, SolveArgs};
//!
//! let mut args = SolveArgs::new(vec![
//!     vec![0.0, 100.0],
//!     vec![0.0, 0.0],
//!     vec![100.0, 0.0],
//! ]);
//! args.s = 1;
//! args.emd_bound_low = 2;
//! args.emd_bound_high = 2;
//!
//! let result = solve(&args).unwrap();
//! assert!(result.is_feasible());
//! assert_eq!(result.emd_cost, 2);
//! assert_eq!(result.amplitude_sum, 200.0);
//! ```
//!
//! An infeasible window (even the cheapest possible transport exceeds the
//! upper bound) is a *successful* call whose result carries an empty support
//! mask; only inconsistent configurations are reported as [`Error`]s.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod flow;
pub mod solver;

mod error;
mod search;
mod types;

pub use error::{Error, Result};
pub use solver::{solve, Algorithm, SolveArgs, SolveResult};
pub use types::{IngestMode, OutputFn, SolverStats, SolverStatus};

/// Prelude for common imports
pub mod prelude {
    pub use crate::flow::{FlowBackend, SapNetwork};
    pub use crate::solver::{solve, Algorithm, SolveArgs, SolveResult};
    pub use crate::types::{IngestMode, SolverStats, SolverStatus};
    pub use crate::Error;
    pub use crate::Result;
}
