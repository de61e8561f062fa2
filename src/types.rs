//! Common types shared across the solver modules

use serde::{Deserialize, Serialize};

/// Callback receiving formatted progress lines from the solver.
///
/// The solver never blocks on the sink and calls it from the solving thread
/// only; re-entrance is not required.
pub type OutputFn = dyn Fn(&str) + Send + Sync;

/// Solver status after a `solve` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// A support was found with an EMD cost inside the requested window
    Optimal,
    /// A support was found, but its EMD cost misses the requested window
    /// (the λ = 0 solution fell short of the lower bound, or the binary
    /// search exhausted its iteration cap)
    Feasible,
    /// Even the minimum-EMD flow exceeds the upper bound; the support is empty
    Infeasible,
}

impl SolverStatus {
    /// Returns true if a support mask was produced
    pub fn has_solution(self) -> bool {
        matches!(self, Self::Optimal | Self::Feasible)
    }

    /// Returns true if the EMD cost landed inside the requested window
    pub fn is_optimal(self) -> bool {
        matches!(self, Self::Optimal)
    }
}

/// Statistics from a solver run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SolverStats {
    /// Time spent building the flow network (seconds)
    pub build_time_seconds: f64,
    /// Total time spent solving, construction included (seconds)
    pub solve_time_seconds: f64,
    /// Number of full flow computations across all λ phases
    pub flow_runs: usize,
    /// Binary-search iterations actually used
    pub search_iterations: usize,
    /// Residual edges scanned by the Dijkstra inner loop
    pub edges_scanned: u64,
    /// Relaxations attempted on unsaturated, unvisited edges
    pub relaxations_checked: u64,
    /// Successful relaxations pushed onto the priority queue
    pub heap_updates: u64,
}

/// How raw matrix entries are turned into non-negative amplitudes.
///
/// The solver core only ever sees the ingested magnitudes, and the reported
/// amplitude sum is a sum of *ingested* values over the support. Under
/// [`IngestMode::Squared`] it is therefore an energy sum, which also changes
/// how solutions trade off against the EMD window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IngestMode {
    /// Use the absolute value of each entry
    #[default]
    Absolute,
    /// Square each entry
    Squared,
}

impl IngestMode {
    /// Apply the ingest transform to a raw matrix entry
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Absolute => value.abs(),
            Self::Squared => value * value,
        }
    }
}
