//! American option valuation by Least-Squares Monte Carlo.
//!
//! Backward induction over the exercise dates `T-1, ..., 1` of a supplied
//! path ensemble (Longstaff and Schwartz, 2001). At each date the realised
//! discounted cash flow of every in-the-money path is regressed on the basis
//! of the state variables; a path exercises when its immediate payoff is at
//! least the estimated continuation value. Time index `0` is the valuation
//! date and carries no exercise decision.
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Instant;

use crate::basis::BasisConfig;
use crate::error::LsmError;
use crate::regression::{regress_continuation, DegenerateTally};
use crate::stats::{cumulative_share, mean_and_stderr};
use crate::types::{with_metadata, ComputationOutput, LsmParams, OptionType, PathEnsemble, PathMatrix};
use crate::LsmResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Exercise payoff derived from the ensemble or supplied directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payoff {
    /// Vanilla call/put on one factor.
    Vanilla {
        option_type: OptionType,
        strike: f64,
        #[serde(default)]
        factor: usize,
    },
    /// Call/put on the maximum across all factors.
    BestOf { option_type: OptionType, strike: f64 },
    /// Caller-supplied time x path payoff matrix.
    Custom { values: PathMatrix },
}

impl Payoff {
    /// Time x path payoff matrix for `ensemble`.
    pub fn matrix<'a>(&'a self, ensemble: &PathEnsemble) -> LsmResult<Cow<'a, PathMatrix>> {
        match self {
            Payoff::Vanilla {
                option_type,
                strike,
                factor,
            } => {
                check_strike(*strike)?;
                if *factor >= ensemble.factors() {
                    return Err(LsmError::config(
                        "payoff.factor",
                        format!(
                            "factor {factor} out of range for {} state variables",
                            ensemble.factors()
                        ),
                    ));
                }
                Ok(Cow::Owned(PathMatrix::from_fn(
                    ensemble.steps(),
                    ensemble.paths(),
                    |t, p| option_type.intrinsic(ensemble.value(t, p, *factor), *strike),
                )))
            }
            Payoff::BestOf {
                option_type,
                strike,
            } => {
                check_strike(*strike)?;
                Ok(Cow::Owned(PathMatrix::from_fn(
                    ensemble.steps(),
                    ensemble.paths(),
                    |t, p| option_type.intrinsic(best_of(ensemble, t, p), *strike),
                )))
            }
            Payoff::Custom { values } => Ok(Cow::Borrowed(values)),
        }
    }

    /// Option type and underlying series used to report the exercise boundary.
    fn boundary_reference(&self, ensemble: &PathEnsemble) -> Option<(OptionType, PathMatrix)> {
        match self {
            Payoff::Vanilla {
                option_type,
                factor,
                ..
            } => Some((*option_type, ensemble.factor_matrix(*factor))),
            Payoff::BestOf { option_type, .. } => Some((
                *option_type,
                PathMatrix::from_fn(ensemble.steps(), ensemble.paths(), |t, p| {
                    best_of(ensemble, t, p)
                }),
            )),
            Payoff::Custom { .. } => None,
        }
    }
}

fn best_of(ensemble: &PathEnsemble, t: usize, p: usize) -> f64 {
    (0..ensemble.factors())
        .map(|f| ensemble.value(t, p, f))
        .fold(f64::NEG_INFINITY, f64::max)
}

fn check_strike(strike: f64) -> LsmResult<()> {
    if !strike.is_finite() || strike < 0.0 {
        return Err(LsmError::NumericalInstability(format!(
            "strike must be finite and non-negative, got {strike}"
        )));
    }
    Ok(())
}

/// Input for an American option valuation on pre-simulated paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmericanOptionInput {
    /// Time x path (x factor) state variables; row 0 is the valuation date.
    pub state_variables: PathEnsemble,
    pub payoff: Payoff,
    pub risk_free_rate: f64,
    /// Constant time step in years.
    pub dt: f64,
    #[serde(default)]
    pub basis: BasisConfig,
    /// Return per-path exercise flags and cash flows.
    #[serde(default)]
    pub record_paths: bool,
}

/// Exercise statistics at one exercise date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseBoundaryPoint {
    pub time_index: usize,
    /// Date in years.
    pub time: f64,
    /// In-the-money paths used for the regression.
    pub eligible_paths: usize,
    /// Paths that exercised here under the estimated policy (before any
    /// earlier exercise overrides them).
    pub exercised_paths: usize,
    /// Put: largest exercised underlying; call: smallest. `None` for custom
    /// payoffs or when nothing exercised.
    pub critical_value: Option<f64>,
}

/// Full per-path decision and cash-flow traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmericanTraces {
    /// `exercise_flags[t][p]` is true only at the path's exercise date.
    pub exercise_flags: Vec<Vec<bool>>,
    /// Undiscounted cash flow per (time, path); one non-zero entry at most.
    pub cash_flows: PathMatrix,
}

/// Output of an American option valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmericanOptionOutput {
    pub value: f64,
    pub standard_error: f64,
    /// Share of paths exercised at any date.
    pub exercise_probability: f64,
    /// Mean exercise date in years over exercised paths.
    pub expected_exercise_time: Option<f64>,
    pub expected_exercise_time_se: Option<f64>,
    /// Share of paths exercised at or before each time index.
    pub cumulative_exercise_probability: Vec<f64>,
    /// Chronological boundary diagnostics for dates `1..T`.
    pub exercise_boundary: Vec<ExerciseBoundaryPoint>,
    /// Exercise dates whose regression fell back to a zero continuation value.
    pub degenerate_regressions: usize,
    /// Subset of `degenerate_regressions` with fewer in-the-money paths than
    /// regression coefficients.
    pub underdetermined_regressions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<AmericanTraces>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_inputs(ensemble: &PathEnsemble, payoff: &PathMatrix, params: &LsmParams) -> LsmResult<()> {
    params.validate()?;
    if ensemble.steps() < 2 {
        return Err(LsmError::config(
            "state_variables",
            "need the valuation date and at least one exercise date",
        ));
    }
    payoff.ensure_shape("payoff", ensemble.steps(), ensemble.paths())?;
    ensemble.ensure_finite()?;
    payoff.ensure_finite("payoff")?;
    if (0..payoff.steps()).any(|t| payoff.row(t).iter().any(|v| *v < 0.0)) {
        return Err(LsmError::NumericalInstability(
            "payoff values must be non-negative".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Core engine
// ---------------------------------------------------------------------------

fn critical_value(option_type: OptionType, spots: &[f64]) -> Option<f64> {
    match option_type {
        OptionType::Put => spots.iter().copied().reduce(f64::max),
        OptionType::Call => spots.iter().copied().reduce(f64::min),
    }
}

/// Runs the backward induction on a payoff matrix already derived from the
/// ensemble. `reference` supplies the underlying series for boundary
/// reporting.
pub fn run_american_lsm(
    ensemble: &PathEnsemble,
    payoff: &PathMatrix,
    reference: Option<&(OptionType, PathMatrix)>,
    params: &LsmParams,
    record_paths: bool,
) -> LsmResult<AmericanOptionOutput> {
    validate_inputs(ensemble, payoff, params)?;

    let steps = ensemble.steps();
    let n = ensemble.paths();
    let last = steps - 1;
    let disc = params.discount_powers(steps);

    let mut cash = vec![0.0_f64; n];
    let mut exercise_at: Vec<Option<usize>> = vec![None; n];
    let mut boundary_rev = Vec::with_capacity(last);
    let mut degenerate = DegenerateTally::default();

    let mut exercised_spots = Vec::new();
    let record_boundary = |t: usize, eligible: usize, spots: &[f64]| ExerciseBoundaryPoint {
        time_index: t,
        time: t as f64 * params.dt,
        eligible_paths: eligible,
        exercised_paths: spots.len(),
        critical_value: reference.and_then(|(ot, _)| critical_value(*ot, spots)),
    };

    // Maturity: exercise whenever in the money.
    for (p, (c, tau)) in cash.iter_mut().zip(exercise_at.iter_mut()).enumerate() {
        let h = payoff.get(last, p);
        if h > 0.0 {
            *c = h;
            *tau = Some(last);
            if let Some((_, s)) = reference {
                exercised_spots.push(s.get(last, p));
            }
        }
    }
    let itm_last = exercise_at.iter().filter(|t| t.is_some()).count();
    boundary_rev.push(record_boundary(last, itm_last, &exercised_spots));

    let mut target = vec![0.0_f64; n];
    for t in (1..last).rev() {
        let eligible: Vec<bool> = payoff.row(t).iter().map(|h| *h > 0.0).collect();
        let eligible_count = eligible.iter().filter(|e| **e).count();
        exercised_spots.clear();

        for p in 0..n {
            target[p] = match exercise_at[p] {
                Some(tau) => cash[p] * disc[tau - t],
                None => 0.0,
            };
        }

        let basis = params.basis.build_at(ensemble, t)?;
        let fit = regress_continuation(&basis, &target, &eligible);
        degenerate.record(&fit);

        for p in (0..n).filter(|&p| eligible[p]) {
            let h = payoff.get(t, p);
            if h >= fit.continuation(p) {
                cash[p] = h;
                exercise_at[p] = Some(t);
                if let Some((_, s)) = reference {
                    exercised_spots.push(s.get(t, p));
                }
            }
        }
        boundary_rev.push(record_boundary(t, eligible_count, &exercised_spots));
    }
    boundary_rev.reverse();

    let discounted: Vec<f64> = (0..n)
        .map(|p| exercise_at[p].map_or(0.0, |tau| cash[p] * disc[tau]))
        .collect();
    let (value, standard_error) = mean_and_stderr(&discounted);
    if !value.is_finite() || !standard_error.is_finite() {
        return Err(LsmError::NumericalInstability(
            "option value is not finite".into(),
        ));
    }

    let exercise_times: Vec<f64> = exercise_at
        .iter()
        .flatten()
        .map(|tau| *tau as f64 * params.dt)
        .collect();
    let (expected_exercise_time, expected_exercise_time_se) = if exercise_times.is_empty() {
        (None, None)
    } else {
        let (m, se) = mean_and_stderr(&exercise_times);
        (Some(m), Some(se))
    };

    let traces = record_paths.then(|| {
        let mut exercise_flags = vec![vec![false; n]; steps];
        let mut cash_flows = PathMatrix::zeros(steps, n);
        for p in 0..n {
            if let Some(tau) = exercise_at[p] {
                exercise_flags[tau][p] = true;
                cash_flows.set(tau, p, cash[p]);
            }
        }
        AmericanTraces {
            exercise_flags,
            cash_flows,
        }
    });

    Ok(AmericanOptionOutput {
        value,
        standard_error,
        exercise_probability: exercise_times.len() as f64 / n as f64,
        expected_exercise_time,
        expected_exercise_time_se,
        cumulative_exercise_probability: cumulative_share(&exercise_at, steps),
        exercise_boundary: boundary_rev,
        degenerate_regressions: degenerate.total,
        underdetermined_regressions: degenerate.too_few_paths,
        traces,
    })
}

/// Values an American option on the supplied paths without the output envelope.
pub fn value_on_paths(
    ensemble: &PathEnsemble,
    payoff: &Payoff,
    params: &LsmParams,
    record_paths: bool,
) -> LsmResult<AmericanOptionOutput> {
    let matrix = payoff.matrix(ensemble)?;
    let reference = payoff.boundary_reference(ensemble);
    run_american_lsm(ensemble, &matrix, reference.as_ref(), params, record_paths)
}

/// Value an American option by Least-Squares Monte Carlo.
///
/// The result carries the value, its Monte Carlo standard error, exercise
/// timing statistics and the per-date exercise boundary. Regression cells
/// that fell back to a zero continuation value are reported as warnings.
pub fn value_american_option(
    input: &AmericanOptionInput,
) -> LsmResult<ComputationOutput<AmericanOptionOutput>> {
    let start = Instant::now();
    let params = LsmParams::new(input.risk_free_rate, input.dt, input.basis);
    let output = value_on_paths(&input.state_variables, &input.payoff, &params, input.record_paths)?;

    let tally = DegenerateTally {
        total: output.degenerate_regressions,
        too_few_paths: output.underdetermined_regressions,
    };
    let coefficients = input.basis.columns(input.state_variables.factors()) + 1;
    let mut warnings = tally.warnings(coefficients);
    if output.exercise_probability == 0.0 {
        warnings.push("No path finished in the money; option value is zero".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Least-Squares Monte Carlo (Longstaff-Schwartz) American option",
        &serde_json::json!({
            "risk_free_rate": input.risk_free_rate,
            "dt": input.dt,
            "steps": input.state_variables.steps(),
            "paths": input.state_variables.paths(),
            "factors": input.state_variables.factors(),
            "basis": input.basis,
            "exercise_at_valuation_date": false,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
