//! Option to invest in a project with uncertain cash flows.
//!
//! The project pays a net cash flow `NCF(t, p)` from the date it comes online
//! until the horizon. Investing at `t` costs `CAPEX(t)` and the project starts
//! producing `construction_lag` steps later.
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{
    operating_value_without_flexibility, resolve_investment, summary_warnings, validate_project,
    InvestmentSummary,
};
use crate::basis::BasisConfig;
use crate::types::{
    with_metadata, CapexSchedule, ComputationOutput, LsmParams, PathEnsemble, PathMatrix, Rate,
    Years,
};
use crate::LsmResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealOptionInput {
    /// Time x path (x factor) state variables driving the regression.
    pub state_variables: PathEnsemble,
    /// Undiscounted net cash flow of an operating project per (time, path).
    pub net_cash_flows: PathMatrix,
    /// Investment cost: a constant or one value per time index.
    pub capex: CapexSchedule,
    pub risk_free_rate: Rate,
    pub dt: Years,
    /// Steps between the investment decision and the first cash flow.
    #[serde(default)]
    pub construction_lag: usize,
    #[serde(default)]
    pub basis: BasisConfig,
    #[serde(default)]
    pub record_paths: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealOptionTraces {
    /// `investment_flags[t][p]` is true only at the path's investment date.
    pub investment_flags: Vec<Vec<bool>>,
    /// Undiscounted cash flows under the estimated policy: `-CAPEX` at the
    /// investment date, then the net cash flows once the project is online.
    pub cash_flows: PathMatrix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealOptionOutput {
    #[serde(flatten)]
    pub summary: InvestmentSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<RealOptionTraces>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Values the investment option on the supplied paths without the envelope.
pub fn run_real_option(
    ensemble: &PathEnsemble,
    net_cash_flows: &PathMatrix,
    capex: &CapexSchedule,
    construction_lag: usize,
    params: &LsmParams,
    record_paths: bool,
) -> LsmResult<RealOptionOutput> {
    validate_project(ensemble, net_cash_flows, capex, construction_lag, params)?;
    let steps = ensemble.steps();
    let n = ensemble.paths();

    let operating = operating_value_without_flexibility(net_cash_flows, params);
    let policy = resolve_investment(ensemble, params, capex, construction_lag, &operating)?;
    let summary = policy.summary(steps, params.dt);

    let traces = record_paths.then(|| {
        let mut investment_flags = vec![vec![false; n]; steps];
        let mut cash_flows = PathMatrix::zeros(steps, n);
        for (p, tau) in policy.invest_at.iter().enumerate() {
            let Some(tau) = *tau else { continue };
            investment_flags[tau][p] = true;
            cash_flows.set(tau, p, -capex.at(tau));
            for t in (tau + construction_lag)..steps {
                let prior = cash_flows.get(t, p);
                cash_flows.set(t, p, prior + net_cash_flows.get(t, p));
            }
        }
        RealOptionTraces {
            investment_flags,
            cash_flows,
        }
    });

    Ok(RealOptionOutput { summary, traces })
}

/// Real option value of deferring a capital investment.
pub fn value_real_option(
    input: &RealOptionInput,
) -> LsmResult<ComputationOutput<RealOptionOutput>> {
    let start = Instant::now();
    let params = LsmParams::new(input.risk_free_rate, input.dt, input.basis);
    let output = run_real_option(
        &input.state_variables,
        &input.net_cash_flows,
        &input.capex,
        input.construction_lag,
        &params,
        input.record_paths,
    )?;
    let coefficients = input.basis.columns(input.state_variables.factors()) + 1;
    let warnings = summary_warnings(&output.summary, coefficients);

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Least-Squares Monte Carlo real option to invest (deferral)",
        &serde_json::json!({
            "risk_free_rate": input.risk_free_rate,
            "dt": input.dt,
            "steps": input.state_variables.steps(),
            "paths": input.state_variables.paths(),
            "construction_lag": input.construction_lag,
            "basis": input.basis,
            "valuation_date_decision": "cross-sectional mean of NPV against continuation",
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
