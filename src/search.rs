//! Lagrangian search over the transport multiplier λ
//!
//! The driver owns a flow backend for the duration of one solve and re-runs
//! it with a sequence of λ values until the achieved EMD cost lands inside
//! the requested window, assuming the cost is non-increasing in λ. Four
//! phases: a feasibility probe that ignores node rewards, geometric
//! expansion of the upper bracket, geometric contraction of the lower
//! bracket, and a capped binary search with one final re-run at the upper
//! bracket so the reported flow matches the reported window.

use crate::flow::FlowBackend;
use crate::types::{OutputFn, SolverStatus};

/// Progress reporting for one solve: an optional caller-supplied sink plus
/// mirrored `tracing` events. Formatting is per call; nothing is buffered.
pub(crate) struct Trace<'a> {
    sink: Option<&'a OutputFn>,
    verbose: bool,
}

impl<'a> Trace<'a> {
    pub(crate) fn new(sink: Option<&'a OutputFn>, verbose: bool) -> Self {
        Self { sink, verbose }
    }

    /// Explanatory notes, emitted regardless of verbosity
    pub(crate) fn note(&self, msg: &str) {
        if let Some(sink) = self.sink {
            sink(msg);
        }
        tracing::info!(target: "emd_approx", "{msg}");
    }

    /// Progress lines, emitted only in verbose mode
    pub(crate) fn progress(&self, msg: &str) {
        if self.verbose {
            if let Some(sink) = self.sink {
                sink(msg);
            }
        }
        tracing::debug!(target: "emd_approx", "{msg}");
    }
}

/// Bounds and bracket for one λ search
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchParams {
    pub emd_bound_low: i64,
    pub emd_bound_high: i64,
    pub lambda_low: f64,
    pub lambda_high: f64,
    pub max_iterations: usize,
}

/// Final flow state read back after the search settles
#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub support: Vec<Vec<bool>>,
    pub emd_cost: i64,
    pub amplitude_sum: f64,
    pub final_lambda_low: f64,
    pub final_lambda_high: f64,
    pub status: SolverStatus,
    pub flow_runs: usize,
    pub search_iterations: usize,
}

pub(crate) struct LambdaSearch<'a, 'b> {
    params: SearchParams,
    trace: &'a Trace<'b>,
    flow_runs: usize,
    search_iterations: usize,
}

impl<'a, 'b> LambdaSearch<'a, 'b> {
    pub(crate) fn new(params: SearchParams, trace: &'a Trace<'b>) -> Self {
        Self { params, trace, flow_runs: 0, search_iterations: 0 }
    }

    /// Drive the backend through the four phases and read back the result
    pub(crate) fn run(mut self, net: &mut dyn FlowBackend) -> SearchOutcome {
        let (bound_low, bound_high) = (self.params.emd_bound_low, self.params.emd_bound_high);

        // Probe the cheapest possible transport, ignoring node rewards. If
        // even that exceeds the upper bound no λ can help.
        net.run_scaled(1.0, 0.0);
        self.flow_runs += 1;
        let min_emd = net.emd_used();
        self.trace.progress(&format!(
            "l_emd: 1.0  l_signal: 0.0  EMD: {min_emd}  amp sum: {:e}",
            net.amplitude_sum()
        ));
        if min_emd > bound_high {
            self.trace.note(&format!(
                "cannot satisfy the upper EMD bound regardless of the signal \
                 approximation: the smallest feasible EMD cost is {min_emd} while the \
                 upper EMD bound is {bound_high}; consider changing the EMD bounds or \
                 the edge EMD costs"
            ));
            return self.infeasible();
        }

        // Expand the upper bracket until transport is squeezed below the
        // upper bound.
        self.trace.progress("finding a large enough value of lambda ...");
        let mut lambda_high = self.params.lambda_high;
        loop {
            let emd = self.run_at(net, lambda_high);
            if emd <= bound_high {
                if emd >= bound_low {
                    let lambda_low = self.params.lambda_low;
                    return self.accept(net, SolverStatus::Optimal, lambda_low, lambda_high);
                }
                break;
            }
            lambda_high *= 2.0;
        }

        // The upper bracket overshot the window. Check the λ = 0 maximum
        // first: if even free transport stays below the upper bound there is
        // nothing to bracket.
        self.trace.progress("finding a small enough value of lambda ...");
        let mut emd = self.run_at(net, 0.0);
        if emd < bound_high {
            let status = if emd >= bound_low {
                SolverStatus::Optimal
            } else {
                if bound_low < bound_high {
                    self.trace.note(
                        "found a solution with lambda = 0, so the solution does not \
                         satisfy the lower EMD bound",
                    );
                }
                SolverStatus::Feasible
            };
            return self.accept(net, status, 0.0, lambda_high);
        }

        // Contract the lower bracket until the window is straddled.
        let mut lambda_low = self.params.lambda_low;
        loop {
            emd = self.run_at(net, lambda_low);
            if emd > bound_high {
                break;
            }
            if emd >= bound_low {
                return self.accept(net, SolverStatus::Optimal, lambda_low, lambda_high);
            }
            lambda_low /= 2.0;
        }

        // Binary search inside [lambda_low, lambda_high].
        self.trace.progress("binary search on lambda ...");
        while self.search_iterations < self.params.max_iterations
            && (emd < bound_low || emd > bound_high)
        {
            self.search_iterations += 1;
            let lambda_mid = 0.5 * (lambda_low + lambda_high);
            emd = self.run_at(net, lambda_mid);
            self.trace.progress(&format!(
                "l_cur: {lambda_mid:e}  (l_low: {lambda_low:e}, l_high: {lambda_high:e})  EMD: {emd}"
            ));
            if emd <= bound_high {
                lambda_high = lambda_mid;
            } else {
                lambda_low = lambda_mid;
            }
        }

        // Re-run at the final upper bracket so the reported flow corresponds
        // to the reported window.
        let emd = self.run_at(net, lambda_high);
        let status = if emd >= bound_low && emd <= bound_high {
            SolverStatus::Optimal
        } else {
            SolverStatus::Feasible
        };
        self.accept(net, status, lambda_low, lambda_high)
    }

    fn run_at(&mut self, net: &mut dyn FlowBackend, lambda: f64) -> i64 {
        net.run_flow(lambda);
        self.flow_runs += 1;
        let emd = net.emd_used();
        self.trace
            .progress(&format!("l: {lambda:e}  EMD: {emd}  amp sum: {:e}", net.amplitude_sum()));
        emd
    }

    fn accept(
        self,
        net: &dyn FlowBackend,
        status: SolverStatus,
        final_lambda_low: f64,
        final_lambda_high: f64,
    ) -> SearchOutcome {
        SearchOutcome {
            support: net.support(),
            emd_cost: net.emd_used(),
            amplitude_sum: net.amplitude_sum(),
            final_lambda_low,
            final_lambda_high,
            status,
            flow_runs: self.flow_runs,
            search_iterations: self.search_iterations,
        }
    }

    /// Empty sentinel: zero-sized support, zeroed numeric fields
    fn infeasible(self) -> SearchOutcome {
        SearchOutcome {
            support: Vec::new(),
            emd_cost: 0,
            amplitude_sum: 0.0,
            final_lambda_low: 0.0,
            final_lambda_high: 0.0,
            status: SolverStatus::Infeasible,
            flow_runs: self.flow_runs,
            search_iterations: self.search_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::SapNetwork;
    use approx::assert_relative_eq;

    fn search(params: SearchParams, net: &mut SapNetwork) -> SearchOutcome {
        let trace = Trace::new(None, false);
        LambdaSearch::new(params, &trace).run(net)
    }

    fn params(bound_low: i64, bound_high: i64) -> SearchParams {
        SearchParams {
            emd_bound_low: bound_low,
            emd_bound_high: bound_high,
            lambda_low: 0.5,
            lambda_high: 1.0,
            max_iterations: 10,
        }
    }

    #[test]
    fn test_infeasible_probe_returns_empty_sentinel() {
        // a uniform positive cost table makes every inter-column link cost
        // one, so a zero EMD budget is unsatisfiable
        let x = vec![vec![0.0, 3.0], vec![0.0, 2.0], vec![1.0, 1.0]];
        let mut net = SapNetwork::new(x, -1, &[1.0, 1.0, 1.0]).unwrap();
        net.set_sparsity(1);
        let outcome = search(params(0, 0), &mut net);
        assert_eq!(outcome.status, SolverStatus::Infeasible);
        assert!(outcome.support.is_empty());
        assert_eq!(outcome.emd_cost, 0);
        assert_eq!(outcome.amplitude_sum, 0.0);
        assert_eq!(outcome.final_lambda_low, 0.0);
        assert_eq!(outcome.final_lambda_high, 0.0);
    }

    #[test]
    fn test_accepts_in_expansion_phase() {
        let x = vec![vec![0.0, 100.0], vec![0.0, 0.0], vec![100.0, 0.0]];
        let mut net = SapNetwork::new(x, -1, &[]).unwrap();
        net.set_sparsity(1);
        let outcome = search(params(2, 2), &mut net);
        assert_eq!(outcome.status, SolverStatus::Optimal);
        assert_eq!(outcome.emd_cost, 2);
        assert_relative_eq!(outcome.amplitude_sum, 200.0);
        assert_eq!(outcome.final_lambda_low, 0.5);
        assert_eq!(outcome.final_lambda_high, 1.0);
    }

    #[test]
    fn test_lambda_zero_accept_below_lower_bound() {
        // the maximum achievable EMD is 1, far below the lower bound, so the
        // λ = 0 solution is accepted and flagged as merely feasible
        let x = vec![vec![0.0, 100.0], vec![100.0, 0.0]];
        let mut net = SapNetwork::new(x, -1, &[]).unwrap();
        net.set_sparsity(1);
        let outcome = search(params(5, 1000), &mut net);
        assert_eq!(outcome.status, SolverStatus::Feasible);
        assert_eq!(outcome.emd_cost, 1);
        assert_relative_eq!(outcome.amplitude_sum, 200.0);
        assert_eq!(outcome.final_lambda_low, 0.0);
        assert_eq!(outcome.support, vec![vec![false, true], vec![true, false]]);
    }

    #[test]
    fn test_contraction_phase_accepts() {
        let x = vec![vec![0.0, 1.1], vec![0.0, 1.0], vec![1.0, 0.0]];
        let mut net = SapNetwork::new(x, -1, &[]).unwrap();
        net.set_sparsity(1);
        let outcome = search(params(1, 1), &mut net);
        assert_eq!(outcome.status, SolverStatus::Optimal);
        assert_eq!(outcome.emd_cost, 1);
        assert_relative_eq!(outcome.amplitude_sum, 2.0);
        assert!(outcome.final_lambda_low < outcome.final_lambda_high);
    }

    #[test]
    fn test_binary_search_exhaustion_reports_feasible() {
        // the reachable EMD values jump from 0 to 2, so a [1, 1] window can
        // never be hit; after the iteration cap the λ_high flow is reported
        let x = vec![vec![0.0, 100.0], vec![0.0, 0.0], vec![101.0, 0.0]];
        let mut net = SapNetwork::new(x, -1, &[]).unwrap();
        net.set_sparsity(1);
        let outcome = search(params(1, 1), &mut net);
        assert_eq!(outcome.status, SolverStatus::Feasible);
        assert_eq!(outcome.emd_cost, 0);
        assert_relative_eq!(outcome.amplitude_sum, 101.0);
        assert_eq!(outcome.search_iterations, 10);
        assert!(outcome.final_lambda_low < outcome.final_lambda_high);
    }
}
