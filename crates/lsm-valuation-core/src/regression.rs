//! Cross-sectional least-squares estimator.
//!
//! Fits ordinary least squares (with an intercept) of a per-path target on
//! the rows of a [`BasisMatrix`] selected by an eligibility mask, and predicts
//! for every path. An empty eligible set, fewer eligible rows than
//! coefficients, or a rank-deficient design yields
//! [`RegressionFit::Degenerate`], which every engine reads as a zero
//! continuation value for that cell.
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use crate::basis::BasisMatrix;

/// Why a regression cell fell back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegenerateReason {
    EmptyEligibleSet,
    /// Some eligible paths, but fewer than intercept plus basis columns.
    TooFewEligiblePaths,
    RankDeficient,
    NonFiniteSolution,
}

/// Degenerate regression cells of one valuation, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DegenerateTally {
    pub total: usize,
    /// Cells counted in `total` whose eligible set was smaller than the
    /// number of coefficients.
    pub too_few_paths: usize,
}

impl DegenerateTally {
    pub fn record(&mut self, fit: &RegressionFit) {
        if let RegressionFit::Degenerate(reason) = fit {
            self.total += 1;
            if *reason == DegenerateReason::TooFewEligiblePaths {
                self.too_few_paths += 1;
            }
        }
    }

    pub fn merge(&mut self, other: DegenerateTally) {
        self.total += other.total;
        self.too_few_paths += other.too_few_paths;
    }

    /// Envelope warnings: underdetermined cells are reported on their own,
    /// `coefficients` being the intercept plus the basis columns.
    pub fn warnings(&self, coefficients: usize) -> Vec<String> {
        let mut out = Vec::new();
        let other = self.total - self.too_few_paths;
        if other > 0 {
            out.push(format!(
                "{other} regressions were degenerate (empty, rank-deficient or non-finite cross-section)"
            ));
        }
        if self.too_few_paths > 0 {
            out.push(format!(
                "{} regressions had fewer eligible paths than the {coefficients} regression coefficients",
                self.too_few_paths
            ));
        }
        out
    }
}

/// Outcome of one cross-sectional regression.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressionFit {
    Fitted {
        /// Intercept first, then one coefficient per basis column.
        coefficients: Vec<f64>,
        /// Prediction for every path, eligible or not.
        predictions: Vec<f64>,
    },
    Degenerate(DegenerateReason),
}

impl RegressionFit {
    /// Estimated continuation value for `path`; zero when degenerate.
    #[inline]
    pub fn continuation(&self, path: usize) -> f64 {
        match self {
            RegressionFit::Fitted { predictions, .. } => predictions[path],
            RegressionFit::Degenerate(_) => 0.0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, RegressionFit::Degenerate(_))
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        match self {
            RegressionFit::Fitted { coefficients, .. } => Some(coefficients),
            RegressionFit::Degenerate(_) => None,
        }
    }
}

/// A factorised eligible cross-section, reusable for several targets.
pub struct CrossSection<'a> {
    basis: &'a BasisMatrix,
    eligible: Vec<usize>,
    scale: Vec<f64>,
    factor: Result<(SVD<f64, Dyn, Dyn>, f64), DegenerateReason>,
}

impl<'a> CrossSection<'a> {
    /// Factorises the design restricted to `eligible` rows.
    pub fn fit(basis: &'a BasisMatrix, eligible: &[bool]) -> Self {
        let rows: Vec<usize> = eligible
            .iter()
            .enumerate()
            .filter_map(|(i, &e)| e.then_some(i))
            .collect();
        let params = basis.cols() + 1;

        let mut scale = vec![1.0_f64; params];
        for (c, s) in scale.iter_mut().enumerate().skip(1) {
            *s = rows
                .iter()
                .map(|&r| basis.get(r, c - 1).abs())
                .fold(0.0, f64::max);
        }

        let factor = if rows.is_empty() {
            Err(DegenerateReason::EmptyEligibleSet)
        } else if rows.len() < params {
            Err(DegenerateReason::TooFewEligiblePaths)
        } else if scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            Err(DegenerateReason::RankDeficient)
        } else {
            let x = DMatrix::from_fn(rows.len(), params, |r, c| {
                if c == 0 {
                    1.0
                } else {
                    basis.get(rows[r], c - 1) / scale[c]
                }
            });
            let svd = x.svd(true, true);
            let max_sv = svd.singular_values.iter().copied().fold(0.0, f64::max);
            let tolerance = max_sv * f64::EPSILON * rows.len().max(params) as f64;
            if svd.rank(tolerance) < params {
                Err(DegenerateReason::RankDeficient)
            } else {
                Ok((svd, tolerance))
            }
        };

        Self {
            basis,
            eligible: rows,
            scale,
            factor,
        }
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible.len()
    }

    pub fn degenerate_reason(&self) -> Option<DegenerateReason> {
        self.factor.as_ref().err().copied()
    }

    /// Regresses `target` (one value per path) and predicts for all paths.
    pub fn regress(&self, target: &[f64]) -> RegressionFit {
        let (svd, tolerance) = match &self.factor {
            Ok(f) => f,
            Err(reason) => return RegressionFit::Degenerate(*reason),
        };
        let y = DVector::from_iterator(
            self.eligible.len(),
            self.eligible.iter().map(|&r| target[r]),
        );
        let beta = match svd.solve(&y, *tolerance) {
            Ok(b) => b,
            Err(_) => return RegressionFit::Degenerate(DegenerateReason::NonFiniteSolution),
        };
        let coefficients: Vec<f64> = beta
            .iter()
            .zip(&self.scale)
            .map(|(b, s)| b / s)
            .collect();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return RegressionFit::Degenerate(DegenerateReason::NonFiniteSolution);
        }

        let predictions = (0..self.basis.rows())
            .map(|r| {
                self.basis
                    .row(r)
                    .iter()
                    .zip(&coefficients[1..])
                    .fold(coefficients[0], |acc, (x, b)| acc + x * b)
            })
            .collect();

        RegressionFit::Fitted {
            coefficients,
            predictions,
        }
    }
}

/// One-shot fit and predict.
pub fn regress_continuation(basis: &BasisMatrix, target: &[f64], eligible: &[bool]) -> RegressionFit {
    CrossSection::fit(basis, eligible).regress(target)
}

/// Intercept-only fit: the mean of `target` over eligible paths, predicted
/// for every path. Used where all paths share one state, as at time zero.
pub fn intercept_only(target: &[f64], eligible: &[bool]) -> RegressionFit {
    let (sum, count) = target
        .iter()
        .zip(eligible)
        .filter(|(_, e)| **e)
        .fold((0.0_f64, 0usize), |(s, c), (y, _)| (s + y, c + 1));
    if count == 0 {
        return RegressionFit::Degenerate(DegenerateReason::EmptyEligibleSet);
    }
    let mean = sum / count as f64;
    if !mean.is_finite() {
        return RegressionFit::Degenerate(DegenerateReason::NonFiniteSolution);
    }
    RegressionFit::Fitted {
        coefficients: vec![mean],
        predictions: vec![mean; target.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{BasisConfig, PolynomialFamily};

    fn linear_basis(xs: &[f64]) -> BasisMatrix {
        BasisConfig::new(PolynomialFamily::Power, 1, false)
            .build(xs, 1)
            .unwrap()
    }

    #[test]
    fn test_recovers_exact_line() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = xs.iter().map(|x| 3.0 + 2.0 * x).collect();
        let fit = regress_continuation(&linear_basis(&xs), &y, &[true; 4]);
        let coef = fit.coefficients().unwrap();
        assert!((coef[0] - 3.0).abs() < 1e-9);
        assert!((coef[1] - 2.0).abs() < 1e-9);
        assert!((fit.continuation(2) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_predicts_for_ineligible_paths() {
        let xs = [1.0, 2.0, 3.0, 10.0];
        let y = [5.0, 7.0, 9.0, -1000.0];
        let fit = regress_continuation(&linear_basis(&xs), &y, &[true, true, true, false]);
        // fitted on the first three paths only
        assert!((fit.continuation(3) - 23.0).abs() < 1e-8);
    }

    #[test]
    fn test_quadratic_fit_with_large_regressors() {
        let xs: Vec<f64> = (0..50).map(|i| 30.0 + i as f64 * 0.4).collect();
        let y: Vec<f64> = xs.iter().map(|x| 1.0 - 0.5 * x + 0.01 * x * x).collect();
        let basis = BasisConfig::new(PolynomialFamily::Power, 2, false)
            .build(&xs, 1)
            .unwrap();
        let fit = regress_continuation(&basis, &y, &vec![true; xs.len()]);
        for (i, target) in y.iter().enumerate() {
            assert!((fit.continuation(i) - target).abs() < 1e-7);
        }
    }

    #[test]
    fn test_empty_eligible_set_is_degenerate() {
        let fit = regress_continuation(&linear_basis(&[1.0, 2.0]), &[1.0, 2.0], &[false, false]);
        assert_eq!(
            fit,
            RegressionFit::Degenerate(DegenerateReason::EmptyEligibleSet)
        );
        assert_eq!(fit.continuation(0), 0.0);
    }

    #[test]
    fn test_single_eligible_path_has_too_few_paths() {
        let fit = regress_continuation(&linear_basis(&[1.0, 2.0]), &[1.0, 2.0], &[true, false]);
        assert_eq!(
            fit,
            RegressionFit::Degenerate(DegenerateReason::TooFewEligiblePaths)
        );
    }

    #[test]
    fn test_tally_separates_underdetermined_cells() {
        let basis = linear_basis(&[1.0, 2.0, 3.0]);
        let mut tally = DegenerateTally::default();
        tally.record(&regress_continuation(&basis, &[1.0; 3], &[true, false, false]));
        tally.record(&regress_continuation(&basis, &[1.0; 3], &[false; 3]));
        tally.record(&regress_continuation(&basis, &[1.0, 2.0, 3.0], &[true; 3]));
        assert_eq!(
            tally,
            DegenerateTally {
                total: 2,
                too_few_paths: 1
            }
        );
        let warnings = tally.warnings(2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("1 regressions were degenerate"));
        assert!(warnings[1].contains("fewer eligible paths than the 2 regression coefficients"));
        assert!(DegenerateTally::default().warnings(2).is_empty());
    }

    #[test]
    fn test_constant_regressor_is_rank_deficient() {
        let xs = [36.0; 6];
        let fit = regress_continuation(&linear_basis(&xs), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[true; 6]);
        assert!(fit.is_degenerate());
        assert_eq!(fit.continuation(5), 0.0);
    }

    #[test]
    fn test_intercept_only_is_eligible_mean() {
        let fit = intercept_only(&[1.0, 2.0, 3.0, 100.0], &[true, true, true, false]);
        assert_eq!(fit.coefficients(), Some(&[2.0][..]));
        assert_eq!(fit.continuation(3), 2.0);
        assert!(intercept_only(&[1.0], &[false]).is_degenerate());
    }

    #[test]
    fn test_cross_section_reused_for_several_targets() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let basis = linear_basis(&xs);
        let cs = CrossSection::fit(&basis, &[true; 5]);
        assert_eq!(cs.eligible_count(), 5);
        assert!(cs.degenerate_reason().is_none());
        let a = cs.regress(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        let b = cs.regress(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        assert!((a.continuation(0) - 1.0).abs() < 1e-10);
        assert!((b.continuation(4) - 10.0).abs() < 1e-9);
    }
}
