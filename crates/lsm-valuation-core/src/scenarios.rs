//! Independent scenario sweeps over one shared, read-only path ensemble.
//!
//! Every scenario builds its own payoff and decision state; with the
//! `parallel` feature scenarios are spread over the rayon thread pool.
use serde::{Deserialize, Serialize};

use crate::error::LsmError;
use crate::types::LsmParams;
#[cfg(any(feature = "american", feature = "real_options"))]
use crate::types::PathEnsemble;
#[cfg(feature = "american")]
use crate::types::OptionType;
#[cfg(feature = "real_options")]
use crate::types::{CapexSchedule, PathMatrix};
use crate::LsmResult;

/// Range swept from `min` to `max` inclusive in increments of `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl SweepRange {
    /// Values from `min` to `max`; `max` is appended when the step overshoots it.
    pub fn values(&self) -> LsmResult<Vec<f64>> {
        if self.step <= 0.0 || !self.step.is_finite() {
            return Err(LsmError::config("sweep.step", "step must be positive"));
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(LsmError::config("sweep", "min must be <= max"));
        }
        let count = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        let mut values: Vec<f64> = (0..=count)
            .map(|i| self.min + i as f64 * self.step)
            .collect();
        if let Some(&last) = values.last() {
            if self.max - last > 1e-9 * self.step {
                values.push(self.max);
            }
        }
        Ok(values)
    }
}

#[cfg(any(feature = "american", feature = "real_options"))]
fn map_scenarios<T, R, F>(items: &[T], f: F) -> LsmResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> LsmResult<R> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}

#[cfg(any(feature = "american", feature = "real_options"))]
fn check_params(params: &LsmParams, levels: &[f64], field: &str) -> LsmResult<()> {
    params.validate()?;
    if levels.is_empty() {
        return Err(LsmError::config(field, "at least one scenario is required"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// American strikes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeScenario {
    pub strike: f64,
    pub value: f64,
    pub standard_error: f64,
    pub exercise_probability: f64,
    pub expected_exercise_time: Option<f64>,
}

/// Values a vanilla American option on `factor` for every strike.
#[cfg(feature = "american")]
pub fn sweep_american_strikes(
    ensemble: &PathEnsemble,
    option_type: OptionType,
    factor: usize,
    strikes: &[f64],
    params: &LsmParams,
) -> LsmResult<Vec<StrikeScenario>> {
    use crate::american::{value_on_paths, Payoff};

    check_params(params, strikes, "strikes")?;
    map_scenarios(strikes, |&strike| {
        let payoff = Payoff::Vanilla {
            option_type,
            strike,
            factor,
        };
        let out = value_on_paths(ensemble, &payoff, params, false)?;
        Ok(StrikeScenario {
            strike,
            value: out.value,
            standard_error: out.standard_error,
            exercise_probability: out.exercise_probability,
            expected_exercise_time: out.expected_exercise_time,
        })
    })
}

// ---------------------------------------------------------------------------
// Real option CAPEX levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapexScenario {
    pub capex: f64,
    pub rov: f64,
    pub rov_se: f64,
    pub npv: f64,
    pub wov: f64,
    pub investment_probability: f64,
}

/// Values the investment option for every constant CAPEX level.
#[cfg(feature = "real_options")]
pub fn sweep_real_option_capex(
    ensemble: &PathEnsemble,
    net_cash_flows: &PathMatrix,
    capex_levels: &[f64],
    construction_lag: usize,
    params: &LsmParams,
) -> LsmResult<Vec<CapexScenario>> {
    use crate::real_options::investment::run_real_option;

    check_params(params, capex_levels, "capex_levels")?;
    map_scenarios(capex_levels, |&capex| {
        let out = run_real_option(
            ensemble,
            net_cash_flows,
            &CapexSchedule::Constant(capex),
            construction_lag,
            params,
            false,
        )?;
        Ok(CapexScenario {
            capex,
            rov: out.summary.rov,
            rov_se: out.summary.rov_se,
            npv: out.summary.npv,
            wov: out.summary.wov,
            investment_probability: out.summary.investment_probability,
        })
    })
}
