//! Capital-investment (real) options valued by Least-Squares Monte Carlo.
//!
//! `investment` values the option to invest in a project once; with the
//! `operational_flexibility` feature, `flexibility` adds suspension,
//! resumption and abandonment after investment. Both share the investment
//! timing pass in this module, which only needs the realised value of
//! entering the operating state at every (time, path).
pub mod investment;

#[cfg(feature = "operational_flexibility")]
pub mod flexibility;

use serde::{Deserialize, Serialize};

use crate::error::LsmError;
use crate::regression::{CrossSection, DegenerateTally};
use crate::stats::{cumulative_share, mean_and_stderr, step_discount};
use crate::types::{CapexSchedule, LsmParams, PathEnsemble, PathMatrix};
use crate::LsmResult;

/// Result of the backward investment-timing pass.
#[derive(Debug, Clone)]
pub(crate) struct InvestmentPolicy {
    /// `invest_rule[t * paths + p]`: the estimated rule says invest at `t`.
    pub invest_rule: Vec<bool>,
    /// Earliest date the rule fires, i.e. the realised investment date.
    pub invest_at: Vec<Option<usize>>,
    pub rov: f64,
    pub rov_se: f64,
    pub npv: f64,
    pub npv_se: f64,
    pub invest_immediately: bool,
    pub degenerate: DegenerateTally,
}

/// Headline results shared by every real-option engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentSummary {
    /// Real option value: the project with the option to defer investment.
    pub rov: f64,
    pub rov_se: f64,
    /// Value of investing immediately on every path.
    pub npv: f64,
    pub npv_se: f64,
    /// Value of waiting, `rov - npv`; never negative.
    pub wov: f64,
    pub invest_immediately: bool,
    /// Share of paths that invest within the horizon.
    pub investment_probability: f64,
    /// Mean investment date in years over investing paths.
    pub expected_investment_time: Option<f64>,
    pub expected_investment_time_se: Option<f64>,
    /// Share of paths invested at or before each time index.
    pub cumulative_investment_probability: Vec<f64>,
    /// Regressions that fell back to their degenerate estimate.
    pub degenerate_regressions: usize,
    /// Subset of `degenerate_regressions` fitted on fewer paths than
    /// regression coefficients.
    #[serde(default)]
    pub underdetermined_regressions: usize,
}

impl InvestmentPolicy {
    pub(crate) fn summary(&self, steps: usize, dt: f64) -> InvestmentSummary {
        let n = self.invest_at.len();
        let times: Vec<f64> = self
            .invest_at
            .iter()
            .flatten()
            .map(|tau| *tau as f64 * dt)
            .collect();
        let (expected_investment_time, expected_investment_time_se) = if times.is_empty() {
            (None, None)
        } else {
            let (m, se) = mean_and_stderr(&times);
            (Some(m), Some(se))
        };
        InvestmentSummary {
            rov: self.rov,
            rov_se: self.rov_se,
            npv: self.npv,
            npv_se: self.npv_se,
            wov: self.rov - self.npv,
            invest_immediately: self.invest_immediately,
            investment_probability: times.len() as f64 / n.max(1) as f64,
            expected_investment_time,
            expected_investment_time_se,
            cumulative_investment_probability: cumulative_share(&self.invest_at, steps),
            degenerate_regressions: self.degenerate.total,
            underdetermined_regressions: self.degenerate.too_few_paths,
        }
    }
}

/// `coefficients` is the regression width: intercept plus basis columns.
pub(crate) fn summary_warnings(summary: &InvestmentSummary, coefficients: usize) -> Vec<String> {
    let tally = DegenerateTally {
        total: summary.degenerate_regressions,
        too_few_paths: summary.underdetermined_regressions,
    };
    let mut warnings = tally.warnings(coefficients);
    if summary.investment_probability == 0.0 {
        warnings.push("No path invests within the horizon".into());
    }
    if summary.invest_immediately {
        warnings.push("Immediate investment appears optimal".into());
    }
    warnings
}

pub(crate) fn validate_project(
    ensemble: &PathEnsemble,
    net_cash_flows: &PathMatrix,
    capex: &CapexSchedule,
    construction_lag: usize,
    params: &LsmParams,
) -> LsmResult<()> {
    params.validate()?;
    net_cash_flows.ensure_shape("net_cash_flows", ensemble.steps(), ensemble.paths())?;
    if construction_lag >= ensemble.steps() {
        return Err(LsmError::config(
            "construction_lag",
            format!(
                "lag of {construction_lag} steps leaves no operating period in a {}-step horizon",
                ensemble.steps()
            ),
        ));
    }
    ensemble.ensure_finite()?;
    net_cash_flows.ensure_finite("net_cash_flows")?;
    capex.validate(ensemble.steps())
}

/// Value at `t` of every remaining net cash flow, `NCF(t) + disc * V(t+1)`.
pub(crate) fn operating_value_without_flexibility(
    net_cash_flows: &PathMatrix,
    params: &LsmParams,
) -> PathMatrix {
    let steps = net_cash_flows.steps();
    let n = net_cash_flows.paths();
    let disc = step_discount(params.risk_free_rate, params.dt);
    let mut value = PathMatrix::zeros(steps, n);
    let mut next = vec![0.0_f64; n];
    for t in (0..steps).rev() {
        for (p, w) in next.iter_mut().enumerate() {
            *w = net_cash_flows.get(t, p) + disc * *w;
            value.set(t, p, *w);
        }
    }
    value
}

/// Backward investment-timing pass.
///
/// `operating_value(t, p)` is the realised value at `t` of a project that
/// starts operating at `t`. Investing at `t` is worth
/// `disc^lag * operating_value(t + lag) - CAPEX(t)`. For `t >= 1` the rule
/// invests when the regression estimate of that payoff is positive and at
/// least the estimated continuation value; at the valuation date every path
/// shares one state, so the comparison uses cross-sectional means and
/// `ROV = max(NPV, continuation)`.
pub(crate) fn resolve_investment(
    ensemble: &PathEnsemble,
    params: &LsmParams,
    capex: &CapexSchedule,
    construction_lag: usize,
    operating_value: &PathMatrix,
) -> LsmResult<InvestmentPolicy> {
    let steps = ensemble.steps();
    let n = ensemble.paths();
    let last = steps - 1;
    let disc = params.discount_powers(steps);

    let invest_payoff = |t: usize, p: usize| -> f64 {
        let gross = if t + construction_lag < steps {
            disc[construction_lag] * operating_value.get(t + construction_lag, p)
        } else {
            0.0
        };
        gross - capex.at(t)
    };

    let mut invest_rule = vec![false; steps * n];
    let mut invest_at: Vec<Option<usize>> = vec![None; n];
    let mut realised = vec![0.0_f64; n];
    let mut degenerate = DegenerateTally::default();
    let all_paths = vec![true; n];
    let mut payoff = vec![0.0_f64; n];
    let mut target = vec![0.0_f64; n];

    for t in (1..steps).rev() {
        for p in 0..n {
            payoff[p] = invest_payoff(t, p);
            target[p] = invest_at[p].map_or(0.0, |tau| realised[p] * disc[tau - t]);
        }

        let basis = params.basis.build_at(ensemble, t)?;
        let section = CrossSection::fit(&basis, &all_paths);
        let invest_fit = section.regress(&payoff);
        let continuation_fit = (t < last).then(|| section.regress(&target));
        degenerate.record(&invest_fit);
        if let Some(fit) = &continuation_fit {
            degenerate.record(fit);
        }

        for p in 0..n {
            // A degenerate investment fit falls back to the path's own payoff.
            let estimated = if invest_fit.is_degenerate() {
                payoff[p]
            } else {
                invest_fit.continuation(p)
            };
            let continuation = continuation_fit.as_ref().map_or(0.0, |f| f.continuation(p));
            if estimated > 0.0 && estimated >= continuation {
                invest_rule[t * n + p] = true;
                invest_at[p] = Some(t);
                realised[p] = payoff[p];
            }
        }
    }

    let npv_values: Vec<f64> = (0..n).map(|p| invest_payoff(0, p)).collect();
    let (npv, npv_se) = mean_and_stderr(&npv_values);
    let continuation_values: Vec<f64> = (0..n)
        .map(|p| invest_at[p].map_or(0.0, |tau| realised[p] * disc[tau]))
        .collect();
    let (continuation, _) = mean_and_stderr(&continuation_values);

    let invest_immediately = npv >= continuation;
    let path_values = if invest_immediately {
        invest_rule[..n].fill(true);
        invest_at.fill(Some(0));
        npv_values
    } else {
        continuation_values
    };
    let (rov, rov_se) = mean_and_stderr(&path_values);

    if !rov.is_finite() || !npv.is_finite() || !rov_se.is_finite() {
        return Err(LsmError::NumericalInstability(
            "real option value is not finite".into(),
        ));
    }

    Ok(InvestmentPolicy {
        invest_rule,
        invest_at,
        rov,
        rov_se,
        npv,
        npv_se,
        invest_immediately,
        degenerate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisConfig;

    #[test]
    fn test_operating_value_accumulates_discounted_ncf() {
        let ncf = PathMatrix::from_rows(vec![vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let params = LsmParams::new(0.1, 1.0, BasisConfig::default());
        let v = operating_value_without_flexibility(&ncf, &params);
        let d = (-0.1_f64).exp();
        assert!((v.get(2, 0) - 3.0).abs() < 1e-12);
        assert!((v.get(1, 0) - (2.0 + 3.0 * d)).abs() < 1e-12);
        assert!((v.get(0, 0) - (1.0 + 2.0 * d + 3.0 * d * d)).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic_project_invests_immediately() {
        // Identical paths with a constant positive NCF: waiting only loses cash.
        let steps = 5;
        let rows = vec![vec![1.0; 4]; steps];
        let ensemble = PathEnsemble::from_single_factor(rows).unwrap();
        let ncf = PathMatrix::from_fn(steps, 4, |_, _| 10.0);
        let params = LsmParams::new(0.05, 1.0, BasisConfig::default());
        let w = operating_value_without_flexibility(&ncf, &params);
        let policy =
            resolve_investment(&ensemble, &params, &CapexSchedule::Constant(5.0), 0, &w).unwrap();
        assert!(policy.invest_immediately);
        assert_eq!(policy.rov, policy.npv);
        assert!(policy.invest_at.iter().all(|t| *t == Some(0)));
    }
}
