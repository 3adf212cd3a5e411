mod common;

use lsm_valuation_core::american::{value_american_option, value_on_paths, AmericanOptionInput, Payoff};
use lsm_valuation_core::basis::{BasisConfig, PolynomialFamily};
use lsm_valuation_core::scenarios::sweep_american_strikes;
use lsm_valuation_core::stats::{mean_and_stderr, step_discount};
use lsm_valuation_core::{LsmError, LsmParams, OptionType, PathEnsemble, PathMatrix};

const RATE: f64 = 0.06;
const DT: f64 = 1.0 / 50.0;

fn ls_params() -> LsmParams {
    LsmParams::new(RATE, DT, BasisConfig::new(PolynomialFamily::Power, 2, false))
}

fn european_estimate(prices: &PathMatrix, option_type: OptionType, strike: f64) -> (f64, f64) {
    let last = prices.steps() - 1;
    let disc = step_discount(RATE, DT * last as f64);
    let values: Vec<f64> = (0..prices.paths())
        .map(|p| option_type.intrinsic(prices.get(last, p), strike) * disc)
        .collect();
    mean_and_stderr(&values)
}

// ===========================================================================
// Longstaff-Schwartz reference
// ===========================================================================

#[test]
fn test_american_put_longstaff_schwartz_reference() {
    // Longstaff and Schwartz (2001), Table 1: S0=36, sigma=0.2, T=1, K=40,
    // 50 exercise dates per year, r=0.06. Reference value 4.472 (finite
    // difference 4.478).
    let prices = common::gbm(36.0, RATE, 0.2, DT, 51, 50_000, 2001);
    let ens = common::ensemble(&prices);
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let out = value_on_paths(&ens, &payoff, &ls_params(), false).unwrap();
    assert!(
        (out.value - 4.47).abs() < 0.1,
        "Expected ~4.47, got {} (se {})",
        out.value,
        out.standard_error
    );
    assert!(out.standard_error > 0.0 && out.standard_error < 0.05);

    // Early exercise premium over the European put on the same paths.
    let (european, _) = european_estimate(&prices, OptionType::Put, 40.0);
    assert!(out.value > european, "american {} <= european {european}", out.value);
    assert_eq!(out.degenerate_regressions, 0);
}

#[test]
fn test_laguerre_basis_agrees_with_power_basis() {
    let prices = common::gbm(36.0, RATE, 0.2, DT, 51, 20_000, 7);
    let ens = common::ensemble(&prices);
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let power = value_on_paths(&ens, &payoff, &ls_params(), false).unwrap();
    let laguerre_params = LsmParams::new(
        RATE,
        DT,
        BasisConfig::new(PolynomialFamily::Laguerre, 3, false),
    );
    let laguerre = value_on_paths(&ens, &payoff, &laguerre_params, false).unwrap();
    assert!(
        (power.value - laguerre.value).abs() < 0.08,
        "power {} vs laguerre {}",
        power.value,
        laguerre.value
    );
}

// ===========================================================================
// Monotonicity and bounds
// ===========================================================================

#[test]
fn test_put_value_non_decreasing_in_strike() {
    let prices = common::gbm(36.0, RATE, 0.2, DT, 51, 10_000, 11);
    let ens = common::ensemble(&prices);
    let sweep =
        sweep_american_strikes(&ens, OptionType::Put, 0, &[32.0, 36.0, 40.0, 44.0], &ls_params())
            .unwrap();
    for pair in sweep.windows(2) {
        assert!(
            pair[1].value >= pair[0].value,
            "put value fell from {} (K={}) to {} (K={})",
            pair[0].value,
            pair[0].strike,
            pair[1].value,
            pair[1].strike
        );
    }
}

#[test]
fn test_call_value_non_increasing_in_strike() {
    let prices = common::gbm(36.0, RATE, 0.2, DT, 51, 10_000, 12);
    let ens = common::ensemble(&prices);
    let sweep =
        sweep_american_strikes(&ens, OptionType::Call, 0, &[30.0, 36.0, 42.0], &ls_params())
            .unwrap();
    assert!(sweep[0].value >= sweep[1].value);
    assert!(sweep[1].value >= sweep[2].value);
}

#[test]
fn test_value_bounded_by_payoffs() {
    let prices = common::gbm(36.0, RATE, 0.3, DT, 26, 4_000, 13);
    let ens = common::ensemble(&prices);
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 38.0,
        factor: 0,
    };
    let out = value_on_paths(&ens, &payoff, &ls_params(), false).unwrap();
    let max_payoff = payoff.matrix(&ens).unwrap().max();
    assert!(out.value >= 0.0);
    assert!(out.value <= max_payoff);
    assert!((0.0..=1.0).contains(&out.exercise_probability));
    let cumulative = &out.cumulative_exercise_probability;
    assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
    assert!((cumulative[25] - out.exercise_probability).abs() < 1e-12);
    assert_eq!(cumulative[0], 0.0);
}

#[test]
fn test_exercise_boundary_below_strike_for_put() {
    let prices = common::gbm(36.0, RATE, 0.2, DT, 51, 10_000, 14);
    let ens = common::ensemble(&prices);
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let out = value_on_paths(&ens, &payoff, &ls_params(), false).unwrap();
    assert_eq!(out.exercise_boundary.len(), 50);
    let times: Vec<usize> = out.exercise_boundary.iter().map(|b| b.time_index).collect();
    assert_eq!(times, (1..=50).collect::<Vec<_>>());
    for point in &out.exercise_boundary {
        if let Some(critical) = point.critical_value {
            assert!(critical < 40.0);
        }
        assert!(point.exercised_paths <= point.eligible_paths);
    }
}

// ===========================================================================
// Multi-factor and traces
// ===========================================================================

#[test]
fn test_best_of_put_on_two_factors() {
    let a = common::gbm(40.0, RATE, 0.2, 0.1, 11, 4_000, 21);
    let b = common::gbm(40.0, RATE, 0.3, 0.1, 11, 4_000, 22);
    let ens = PathEnsemble::from_factor_matrices(&[a, b]).unwrap();
    let params = LsmParams::new(RATE, 0.1, BasisConfig::new(PolynomialFamily::Power, 2, true));
    let best_of = Payoff::BestOf {
        option_type: OptionType::Put,
        strike: 40.0,
    };
    let single = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let best = value_on_paths(&ens, &best_of, &params, false).unwrap();
    let plain = value_on_paths(&ens, &single, &params, false).unwrap();
    // max(S1, S2) >= S1 pathwise, so the put on the best is cheaper
    assert!(best.value > 0.0);
    assert!(best.value < plain.value);
}

#[test]
fn test_traces_reprice_the_option() {
    let prices = common::gbm(36.0, RATE, 0.2, DT, 21, 2_000, 31);
    let ens = common::ensemble(&prices);
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let params = ls_params();
    let out = value_on_paths(&ens, &payoff, &params, true).unwrap();
    let traces = out.traces.as_ref().unwrap();
    let disc = step_discount(RATE, DT);
    let total: f64 = (0..2_000)
        .map(|p| {
            (0..21)
                .map(|t| traces.cash_flows.get(t, p) * disc.powi(t as i32))
                .sum::<f64>()
        })
        .sum();
    assert!((total / 2_000.0 - out.value).abs() < 1e-9);
}

// ===========================================================================
// Degenerate fallback and validation
// ===========================================================================

#[test]
fn test_identical_paths_fall_back_to_immediate_exercise() {
    // Every regression is rank-deficient, so continuation is zero and each
    // in-the-money path exercises at the first exercise date.
    let ens = PathEnsemble::from_single_factor(vec![vec![30.0; 16]; 6]).unwrap();
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 40.0,
        factor: 0,
    };
    let params = LsmParams::new(0.05, 0.1, BasisConfig::default());
    let out = value_on_paths(&ens, &payoff, &params, false).unwrap();
    assert_eq!(out.degenerate_regressions, 4);
    assert!((out.value - 10.0 * step_discount(0.05, 0.1)).abs() < 1e-12);
    assert_eq!(out.exercise_probability, 1.0);
    let tau = out.expected_exercise_time.unwrap();
    assert!((tau - 0.1).abs() < 1e-12, "expected exercise time {tau}");
}

#[test]
fn test_envelope_reports_methodology_and_warnings() {
    let input = AmericanOptionInput {
        state_variables: PathEnsemble::from_single_factor(vec![vec![50.0; 8]; 4]).unwrap(),
        payoff: Payoff::Vanilla {
            option_type: OptionType::Put,
            strike: 40.0,
            factor: 0,
        },
        risk_free_rate: 0.05,
        dt: 0.25,
        basis: BasisConfig::default(),
        record_paths: false,
    };
    let out = value_american_option(&input).unwrap();
    assert_eq!(out.result.value, 0.0);
    assert!(out.methodology.contains("Longstaff-Schwartz"));
    assert!(out.warnings.iter().any(|w| w.contains("in the money")));
    assert_eq!(out.metadata.precision, "ieee754_f64");
}

#[test]
fn test_invalid_dt_rejected() {
    let ens = PathEnsemble::from_single_factor(vec![vec![1.0, 2.0]; 3]).unwrap();
    let payoff = Payoff::Vanilla {
        option_type: OptionType::Put,
        strike: 1.5,
        factor: 0,
    };
    let params = LsmParams::new(0.05, 0.0, BasisConfig::default());
    assert!(matches!(
        value_on_paths(&ens, &payoff, &params, false),
        Err(LsmError::Configuration { .. })
    ));
}

#[test]
fn test_custom_payoff_shape_checked() {
    let ens = PathEnsemble::from_single_factor(vec![vec![1.0, 2.0]; 3]).unwrap();
    let payoff = Payoff::Custom {
        values: PathMatrix::zeros(3, 3),
    };
    let params = LsmParams::new(0.05, 0.1, BasisConfig::default());
    assert!(matches!(
        value_on_paths(&ens, &payoff, &params, false),
        Err(LsmError::Configuration { .. })
    ));
}
