use serde::{Deserialize, Deserializer, Serialize};

use crate::basis::BasisConfig;
use crate::error::LsmError;
use crate::LsmResult;

/// Continuously compounded rates expressed as decimals (0.06 = 6%).
pub type Rate = f64;

/// Year fractions.
pub type Years = f64;

/// Option flavour for vanilla payoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Intrinsic value `max(S-K,0)` for calls, `max(K-S,0)` for puts.
    pub fn intrinsic(self, spot: f64, strike: f64) -> f64 {
        match self {
            OptionType::Call => (spot - strike).max(0.0),
            OptionType::Put => (strike - spot).max(0.0),
        }
    }
}

/// Discounting and regression settings shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LsmParams {
    pub risk_free_rate: Rate,
    /// Constant step size of the time grid, in years.
    pub dt: Years,
    #[serde(default)]
    pub basis: BasisConfig,
}

impl LsmParams {
    pub fn new(risk_free_rate: Rate, dt: Years, basis: BasisConfig) -> Self {
        Self {
            risk_free_rate,
            dt,
            basis,
        }
    }

    pub fn validate(&self) -> LsmResult<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(LsmError::config("dt", "must be positive and finite"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(LsmError::config("risk_free_rate", "must be finite"));
        }
        self.basis.validate()
    }

    /// `disc^k` for `k = 0..steps`, with `disc = exp(-r * dt)`.
    pub(crate) fn discount_powers(&self, steps: usize) -> Vec<f64> {
        let disc = crate::stats::step_discount(self.risk_free_rate, self.dt);
        let mut out = Vec::with_capacity(steps);
        let mut acc = 1.0_f64;
        for _ in 0..steps {
            out.push(acc);
            acc *= disc;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Path ensemble (time x path x factor)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnsemble {
    SingleFactor(Vec<Vec<f64>>),
    MultiFactor(Vec<Vec<Vec<f64>>>),
}

/// Pre-simulated state variables indexed by (time, path, factor).
///
/// Row `t = 0` holds the initial values. Serialises as a nested
/// `[time][path][factor]` array; a `[time][path]` array is accepted for a
/// single factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Vec<Vec<Vec<f64>>>")]
pub struct PathEnsemble {
    steps: usize,
    paths: usize,
    factors: usize,
    values: Vec<f64>,
}

impl PathEnsemble {
    /// Build from a flat time-major buffer of length `steps * paths * factors`.
    pub fn new(steps: usize, paths: usize, factors: usize, values: Vec<f64>) -> LsmResult<Self> {
        if steps == 0 {
            return Err(LsmError::config("state_variables", "at least one time step is required"));
        }
        if paths == 0 {
            return Err(LsmError::config("state_variables", "at least one path is required"));
        }
        if factors == 0 {
            return Err(LsmError::config("state_variables", "at least one factor is required"));
        }
        if values.len() != steps * paths * factors {
            return Err(LsmError::config(
                "state_variables",
                format!(
                    "expected {} values for {steps} steps x {paths} paths x {factors} factors, got {}",
                    steps * paths * factors,
                    values.len()
                ),
            ));
        }
        Ok(Self {
            steps,
            paths,
            factors,
            values,
        })
    }

    /// Single-factor ensemble from `[time][path]` rows.
    pub fn from_single_factor(rows: Vec<Vec<f64>>) -> LsmResult<Self> {
        let steps = rows.len();
        let paths = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != paths) {
            return Err(LsmError::config("state_variables", "ragged time rows"));
        }
        Self::new(steps, paths, 1, rows.into_iter().flatten().collect())
    }

    /// Ensemble from `[time][path][factor]` values.
    pub fn from_nested(values: Vec<Vec<Vec<f64>>>) -> LsmResult<Self> {
        let steps = values.len();
        let paths = values.first().map_or(0, Vec::len);
        let factors = values
            .first()
            .and_then(|row| row.first())
            .map_or(0, Vec::len);
        let ragged = values
            .iter()
            .any(|row| row.len() != paths || row.iter().any(|cell| cell.len() != factors));
        if ragged {
            return Err(LsmError::config(
                "state_variables",
                "every time row must have the same path and factor counts",
            ));
        }
        Self::new(
            steps,
            paths,
            factors,
            values.into_iter().flatten().flatten().collect(),
        )
    }

    /// Stack several time x path matrices as the factors of one ensemble.
    pub fn from_factor_matrices(factors: &[PathMatrix]) -> LsmResult<Self> {
        let first = factors
            .first()
            .ok_or_else(|| LsmError::config("state_variables", "at least one factor is required"))?;
        let (steps, paths) = (first.steps(), first.paths());
        if factors
            .iter()
            .any(|m| m.steps() != steps || m.paths() != paths)
        {
            return Err(LsmError::config(
                "state_variables",
                "factor matrices must share the same time x path shape",
            ));
        }
        let mut values = Vec::with_capacity(steps * paths * factors.len());
        for t in 0..steps {
            for p in 0..paths {
                values.extend(factors.iter().map(|m| m.get(t, p)));
            }
        }
        Self::new(steps, paths, factors.len(), values)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn paths(&self) -> usize {
        self.paths
    }

    pub fn factors(&self) -> usize {
        self.factors
    }

    #[inline]
    pub fn value(&self, t: usize, path: usize, factor: usize) -> f64 {
        self.values[(t * self.paths + path) * self.factors + factor]
    }

    /// All paths at time `t`, path-major with `factors()` values per path.
    pub fn slice(&self, t: usize) -> &[f64] {
        let width = self.paths * self.factors;
        &self.values[t * width..(t + 1) * width]
    }

    /// Time x path matrix of one factor.
    pub fn factor_matrix(&self, factor: usize) -> PathMatrix {
        PathMatrix::from_fn(self.steps, self.paths, |t, p| self.value(t, p, factor))
    }

    pub(crate) fn ensure_finite(&self) -> LsmResult<()> {
        if let Some(pos) = self.values.iter().position(|v| !v.is_finite()) {
            let per_step = self.paths * self.factors;
            return Err(LsmError::NumericalInstability(format!(
                "state variable at time index {} is not finite",
                pos / per_step
            )));
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for PathEnsemble {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let built = match RawEnsemble::deserialize(deserializer)? {
            RawEnsemble::SingleFactor(rows) => PathEnsemble::from_single_factor(rows),
            RawEnsemble::MultiFactor(values) => PathEnsemble::from_nested(values),
        };
        built.map_err(serde::de::Error::custom)
    }
}

impl From<PathEnsemble> for Vec<Vec<Vec<f64>>> {
    fn from(e: PathEnsemble) -> Self {
        (0..e.steps)
            .map(|t| {
                e.slice(t)
                    .chunks(e.factors)
                    .map(<[f64]>::to_vec)
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Time x path matrix
// ---------------------------------------------------------------------------

/// Dense time x path matrix (payoffs, net cash flows, traces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct PathMatrix {
    steps: usize,
    paths: usize,
    data: Vec<f64>,
}

impl PathMatrix {
    pub fn new(steps: usize, paths: usize, data: Vec<f64>) -> LsmResult<Self> {
        if steps == 0 || paths == 0 {
            return Err(LsmError::config("matrix", "dimensions must be positive"));
        }
        if data.len() != steps * paths {
            return Err(LsmError::config(
                "matrix",
                format!(
                    "expected {} values for {steps} x {paths}, got {}",
                    steps * paths,
                    data.len()
                ),
            ));
        }
        Ok(Self { steps, paths, data })
    }

    pub fn zeros(steps: usize, paths: usize) -> Self {
        Self {
            steps,
            paths,
            data: vec![0.0; steps * paths],
        }
    }

    pub fn from_fn(steps: usize, paths: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(steps * paths);
        for t in 0..steps {
            for p in 0..paths {
                data.push(f(t, p));
            }
        }
        Self { steps, paths, data }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> LsmResult<Self> {
        let steps = rows.len();
        let paths = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != paths) {
            return Err(LsmError::config("matrix", "ragged time rows"));
        }
        Self::new(steps, paths, rows.into_iter().flatten().collect())
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn paths(&self) -> usize {
        self.paths
    }

    #[inline]
    pub fn get(&self, t: usize, path: usize) -> f64 {
        self.data[t * self.paths + path]
    }

    #[inline]
    pub fn set(&mut self, t: usize, path: usize, value: f64) {
        self.data[t * self.paths + path] = value;
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.data[t * self.paths..(t + 1) * self.paths]
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Fails unless the matrix is `steps x paths`.
    pub(crate) fn ensure_shape(&self, field: &str, steps: usize, paths: usize) -> LsmResult<()> {
        if self.steps != steps || self.paths != paths {
            return Err(LsmError::config(
                field,
                format!(
                    "shape {}x{} does not match state variables {steps}x{paths}",
                    self.steps, self.paths
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn ensure_finite(&self, field: &str) -> LsmResult<()> {
        if let Some(pos) = self.data.iter().position(|v| !v.is_finite()) {
            return Err(LsmError::NumericalInstability(format!(
                "{field} at time index {} is not finite",
                pos / self.paths
            )));
        }
        Ok(())
    }
}

impl TryFrom<Vec<Vec<f64>>> for PathMatrix {
    type Error = LsmError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        PathMatrix::from_rows(rows)
    }
}

impl From<PathMatrix> for Vec<Vec<f64>> {
    fn from(m: PathMatrix) -> Self {
        m.data.chunks(m.paths).map(<[f64]>::to_vec).collect()
    }
}

// ---------------------------------------------------------------------------
// CAPEX schedule
// ---------------------------------------------------------------------------

/// Investment cost if invested at a given time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapexSchedule {
    Constant(f64),
    PerStep(Vec<f64>),
}

impl CapexSchedule {
    /// Exponentially decaying cost `initial * exp(-learning_rate * t * dt)`.
    pub fn learning_curve(initial: f64, learning_rate: f64, dt: f64, steps: usize) -> Self {
        CapexSchedule::PerStep(
            (0..steps)
                .map(|t| initial * (-learning_rate * t as f64 * dt).exp())
                .collect(),
        )
    }

    #[inline]
    pub fn at(&self, t: usize) -> f64 {
        match self {
            CapexSchedule::Constant(c) => *c,
            CapexSchedule::PerStep(v) => v[t],
        }
    }

    pub(crate) fn validate(&self, steps: usize) -> LsmResult<()> {
        let values: &[f64] = match self {
            CapexSchedule::Constant(c) => std::slice::from_ref(c),
            CapexSchedule::PerStep(v) => {
                if v.len() != steps {
                    return Err(LsmError::config(
                        "capex",
                        format!("schedule has {} entries, expected {steps}", v.len()),
                    ));
                }
                v
            }
        };
        for (t, c) in values.iter().enumerate() {
            if !c.is_finite() || *c < 0.0 {
                return Err(LsmError::NumericalInstability(format!(
                    "capex at index {t} must be finite and non-negative, got {c}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}
