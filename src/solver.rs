//! Public solve surface: arguments, result, and backend selection
//!
//! [`solve`] is the single entry point. It validates the configuration,
//! ingests the amplitude matrix, builds the flow network once, and hands it
//! to the λ-search driver. Infeasibility is a *successful* outcome with an
//! empty support mask; only configuration problems are reported as errors.

use crate::error::{Error, Result};
use crate::flow::{FlowBackend, SapNetwork};
use crate::search::{LambdaSearch, SearchParams, Trace};
use crate::types::{IngestMode, OutputFn, SolverStats, SolverStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Min-cost max-flow backend selector.
///
/// Only the built-in successive-shortest-augmenting-path solver ships with
/// this crate; the three library-backed variants are recognized but report
/// [`Error::BackendUnavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Built-in successive-shortest-augmenting-path solver
    #[default]
    ShortestAugmentingPath,
    /// Cost-scaling backend from an external graph library (not built in)
    CostScaling,
    /// Network-simplex backend from an external graph library (not built in)
    NetworkSimplex,
    /// Capacity-scaling backend from an external graph library (not built in)
    CapacityScaling,
}

impl Algorithm {
    /// Canonical command-line spelling
    pub fn name(self) -> &'static str {
        match self {
            Self::ShortestAugmentingPath => "shortest-augmenting-path",
            Self::CostScaling => "cost-scaling",
            Self::NetworkSimplex => "network-simplex",
            Self::CapacityScaling => "capacity-scaling",
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "sap" | "shortest-augmenting-path" => Ok(Self::ShortestAugmentingPath),
            "cost-scaling" => Ok(Self::CostScaling),
            "network-simplex" => Ok(Self::NetworkSimplex),
            "capacity-scaling" => Ok(Self::CapacityScaling),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Arguments for [`solve`]
#[derive(Clone, Serialize, Deserialize)]
pub struct SolveArgs {
    /// R×C real-valued amplitudes; only the ingested magnitude is used
    pub x: Vec<Vec<f64>>,
    /// Per-column sparsity target, at least 1 (clamped to R)
    pub s: usize,
    /// Lower end of the inclusive EMD window
    pub emd_bound_low: i64,
    /// Upper end of the inclusive EMD window
    pub emd_bound_high: i64,
    /// Initial lower guess for the λ bracket, positive
    pub lambda_low: f64,
    /// Initial upper guess for the λ bracket
    pub lambda_high: f64,
    /// Binary-search iteration cap, at least 1
    pub num_search_iterations: usize,
    /// Neighborhood width W, or -1 for the full bipartite layer
    pub outdegree_vertical_distance: i32,
    /// Per-distance transport cost table of length W+1, or empty for the
    /// identity table
    pub emd_costs: Vec<f64>,
    /// Flow backend to use
    pub algorithm: Algorithm,
    /// How raw entries become non-negative amplitudes
    pub ingest: IngestMode,
    /// Optional sink for progress lines
    #[serde(skip)]
    pub output_function: Option<Arc<OutputFn>>,
    /// Emit verbose progress through the sink (and `tracing`)
    pub verbose: bool,
}

impl SolveArgs {
    /// Arguments with the historical defaults: λ bracket [0.5, 1], ten
    /// search iterations, full-width layer, identity cost table, the
    /// built-in backend, absolute ingest, quiet.
    pub fn new(x: Vec<Vec<f64>>) -> Self {
        Self {
            x,
            s: 1,
            emd_bound_low: 0,
            emd_bound_high: 0,
            lambda_low: 0.5,
            lambda_high: 1.0,
            num_search_iterations: 10,
            outdegree_vertical_distance: -1,
            emd_costs: Vec::new(),
            algorithm: Algorithm::default(),
            ingest: IngestMode::default(),
            output_function: None,
            verbose: false,
        }
    }
}

impl fmt::Debug for SolveArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolveArgs")
            .field("rows", &self.x.len())
            .field("cols", &self.x.first().map_or(0, Vec::len))
            .field("s", &self.s)
            .field("emd_bound_low", &self.emd_bound_low)
            .field("emd_bound_high", &self.emd_bound_high)
            .field("lambda_low", &self.lambda_low)
            .field("lambda_high", &self.lambda_high)
            .field("num_search_iterations", &self.num_search_iterations)
            .field("outdegree_vertical_distance", &self.outdegree_vertical_distance)
            .field("emd_costs", &self.emd_costs)
            .field("algorithm", &self.algorithm)
            .field("ingest", &self.ingest)
            .field("output_function", &self.output_function.is_some())
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// Result of a [`solve`] call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    /// R×C support mask; empty (length 0) when the problem is infeasible
    pub support: Vec<Vec<bool>>,
    /// EMD cost of the support, rounded to the nearest integer
    pub emd_cost: i64,
    /// Sum of ingested amplitudes over the support
    pub amplitude_sum: f64,
    /// Final lower end of the λ bracket
    pub final_lambda_low: f64,
    /// Final upper end of the λ bracket
    pub final_lambda_high: f64,
    /// How the search ended
    pub status: SolverStatus,
    /// Statistics
    pub stats: SolverStats,
}

impl SolveResult {
    /// True when a support mask was produced (the infeasible sentinel is
    /// a zero-sized mask)
    pub fn is_feasible(&self) -> bool {
        !self.support.is_empty()
    }
}

/// Compute the structured-sparse support of `args.x` under the EMD window.
///
/// Returns a configuration error before any graph work when the arguments
/// are inconsistent; an infeasible window is reported as a successful call
/// with an empty support mask.
pub fn solve(args: &SolveArgs) -> Result<SolveResult> {
    let total_start = Instant::now();
    validate(args)?;

    let trace = Trace::new(args.output_function.as_deref(), args.verbose);
    let rows = args.x.len();
    let cols = args.x[0].len();
    trace.progress(&format!(
        "r = {rows},  c = {cols},  s = {},  emd_bound_low = {},  emd_bound_high = {}",
        args.s, args.emd_bound_low, args.emd_bound_high
    ));
    trace.progress(&format!(
        "lambda_low = {:e},  lambda_high = {:e},  num_search_iterations = {}",
        args.lambda_low, args.lambda_high, args.num_search_iterations
    ));

    let build_start = Instant::now();
    let ingested: Vec<Vec<f64>> = args
        .x
        .iter()
        .map(|row| row.iter().map(|&v| args.ingest.apply(v)).collect())
        .collect();
    let mut backend = create_backend(
        args.algorithm,
        ingested,
        args.outdegree_vertical_distance,
        &args.emd_costs,
    )?;
    backend.set_sparsity(args.s);
    let build_time_seconds = build_start.elapsed().as_secs_f64();
    trace.progress(&format!(
        "the graph has {} nodes and {} edges",
        backend.num_nodes(),
        backend.num_edges()
    ));
    trace.progress(&format!("total construction time: {build_time_seconds:.6} s"));

    let params = SearchParams {
        emd_bound_low: args.emd_bound_low,
        emd_bound_high: args.emd_bound_high,
        lambda_low: args.lambda_low,
        lambda_high: args.lambda_high,
        max_iterations: args.num_search_iterations,
    };
    let outcome = LambdaSearch::new(params, &trace).run(backend.as_mut());

    let solve_time_seconds = total_start.elapsed().as_secs_f64();
    trace.progress(&format!(
        "final l: {:e}  amp sum: {:e}  EMD cost: {}",
        outcome.final_lambda_high, outcome.amplitude_sum, outcome.emd_cost
    ));
    trace.progress(&format!("total time: {solve_time_seconds:.6} s"));
    let diag = backend.diagnostics();
    trace.progress(&format!(
        "dijkstra work: {} edges scanned, {} relaxations checked, {} heap updates",
        diag.edges_scanned, diag.relaxations_checked, diag.heap_updates
    ));

    Ok(SolveResult {
        support: outcome.support,
        emd_cost: outcome.emd_cost,
        amplitude_sum: outcome.amplitude_sum,
        final_lambda_low: outcome.final_lambda_low,
        final_lambda_high: outcome.final_lambda_high,
        status: outcome.status,
        stats: SolverStats {
            build_time_seconds,
            solve_time_seconds,
            flow_runs: outcome.flow_runs,
            search_iterations: outcome.search_iterations,
            edges_scanned: diag.edges_scanned,
            relaxations_checked: diag.relaxations_checked,
            heap_updates: diag.heap_updates,
        },
    })
}

fn validate(args: &SolveArgs) -> Result<()> {
    if args.x.is_empty() {
        return Err(Error::invalid_input("amplitude matrix needs at least one row"));
    }
    let cols = args.x[0].len();
    if cols == 0 {
        return Err(Error::invalid_input("amplitude matrix needs at least one column"));
    }
    for row in &args.x {
        if row.len() != cols {
            return Err(Error::dimension_mismatch(cols, row.len()));
        }
    }
    if args.s == 0 {
        return Err(Error::invalid_input("per-column sparsity must be at least 1"));
    }
    if args.emd_bound_low < 0 {
        return Err(Error::invalid_input("emd_bound_low must be non-negative"));
    }
    if args.emd_bound_low > args.emd_bound_high {
        return Err(Error::invalid_input(format!(
            "EMD window is empty: [{}, {}]",
            args.emd_bound_low, args.emd_bound_high
        )));
    }
    if !args.lambda_low.is_finite() || args.lambda_low <= 0.0 {
        return Err(Error::invalid_input("lambda_low must be positive and finite"));
    }
    if !args.lambda_high.is_finite() || args.lambda_high < args.lambda_low {
        return Err(Error::invalid_input("lambda_high must be at least lambda_low"));
    }
    if args.num_search_iterations == 0 {
        return Err(Error::invalid_input("num_search_iterations must be at least 1"));
    }
    Ok(())
}

/// Instantiate the selected backend; width and cost-table validation happens
/// inside the builder
fn create_backend(
    algorithm: Algorithm,
    amplitudes: Vec<Vec<f64>>,
    outdegree_vertical_distance: i32,
    emd_costs: &[f64],
) -> Result<Box<dyn FlowBackend>> {
    match algorithm {
        Algorithm::ShortestAugmentingPath => Ok(Box::new(SapNetwork::new(
            amplitudes,
            outdegree_vertical_distance,
            emd_costs,
        )?)),
        other => Err(Error::BackendUnavailable(other.name())),
    }
}
