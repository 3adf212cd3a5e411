use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statrs::distribution::Normal;

use lsm_valuation_core::PathMatrix;

/// Geometric Brownian motion specification for generating state variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmSpec {
    /// Value at the valuation date.
    pub initial: f64,
    /// Annual drift (use the risk-free rate for risk-neutral paths).
    pub drift: f64,
    /// Annual volatility.
    pub volatility: f64,
    /// Horizon in years.
    pub maturity: f64,
    /// Number of time steps; the path matrix has `steps + 1` rows.
    pub steps: usize,
    pub paths: usize,
    /// Optional seed for reproducibility.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Pair every draw with its negative.
    #[serde(default)]
    pub antithetic: bool,
}

impl GbmSpec {
    pub fn dt(&self) -> f64 {
        self.maturity / self.steps as f64
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(self.initial > 0.0 && self.initial.is_finite()) {
            return Err("gbm.initial must be positive".into());
        }
        if !(self.maturity > 0.0 && self.maturity.is_finite()) {
            return Err("gbm.maturity must be positive".into());
        }
        if !(self.volatility >= 0.0 && self.volatility.is_finite()) || !self.drift.is_finite() {
            return Err("gbm.volatility must be non-negative and gbm.drift finite".into());
        }
        if self.steps == 0 || self.paths == 0 {
            return Err("gbm.steps and gbm.paths must be at least 1".into());
        }
        Ok(())
    }

    /// Simulates a `(steps + 1) x paths` matrix; row 0 equals `initial`.
    pub fn simulate(&self) -> Result<PathMatrix, Box<dyn std::error::Error>> {
        self.validate()?;
        let mut rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let normal = Normal::new(0.0, 1.0).map_err(|e| format!("Invalid Normal parameters: {e}"))?;

        let dt = self.dt();
        let drift = (self.drift - 0.5 * self.volatility * self.volatility) * dt;
        let diffusion = self.volatility * dt.sqrt();
        let rows = self.steps + 1;
        let mut m = PathMatrix::zeros(rows, self.paths);

        let stride = if self.antithetic { 2 } else { 1 };
        for first in (0..self.paths).step_by(stride) {
            let mirror = (self.antithetic && first + 1 < self.paths).then_some(first + 1);
            let (mut up, mut down) = (self.initial, self.initial);
            m.set(0, first, up);
            if let Some(p) = mirror {
                m.set(0, p, down);
            }
            for t in 1..rows {
                let z: f64 = rng.sample(normal);
                up *= (drift + diffusion * z).exp();
                m.set(t, first, up);
                if let Some(p) = mirror {
                    down *= (drift - diffusion * z).exp();
                    m.set(t, p, down);
                }
            }
        }
        Ok(m)
    }
}

/// Cash-flow model turning a price path into project net cash flows:
/// `(price * volume - fixed_cost) * dt`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CashFlowModel {
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub fixed_cost: f64,
    /// Factor of the state variables used as the price.
    #[serde(default)]
    pub factor: usize,
}

fn default_volume() -> f64 {
    1.0
}

/// Fills `state_variables` (and `dt` if absent) from a `gbm` block, then
/// `net_cash_flows` from a `cash_flow_model` block. Explicit fields win.
pub fn prepare_request(request: &mut Value) -> Result<(), Box<dyn std::error::Error>> {
    let Value::Object(map) = request else {
        return Err("input must be a JSON object".into());
    };

    if !map.contains_key("state_variables") {
        let spec: GbmSpec = match map.remove("gbm") {
            Some(block) => serde_json::from_value(block)?,
            None => return Err("input needs either 'state_variables' or a 'gbm' block".into()),
        };
        let paths = spec.simulate()?;
        map.entry("dt").or_insert(serde_json::json!(spec.dt()));
        map.insert(
            "state_variables".into(),
            serde_json::to_value(Vec::<Vec<f64>>::from(paths))?,
        );
    } else {
        map.remove("gbm");
    }

    if let Some(block) = map.remove("cash_flow_model") {
        if !map.contains_key("net_cash_flows") {
            let model: CashFlowModel = serde_json::from_value(block)?;
            let dt = map
                .get("dt")
                .and_then(Value::as_f64)
                .ok_or("'dt' is required to build net cash flows")?;
            let states = map
                .get("state_variables")
                .cloned()
                .ok_or("'state_variables' missing")?;
            let ensemble: lsm_valuation_core::PathEnsemble = serde_json::from_value(states)?;
            if model.factor >= ensemble.factors() {
                return Err(format!(
                    "cash_flow_model.factor {} out of range for {} state variables",
                    model.factor,
                    ensemble.factors()
                )
                .into());
            }
            let ncf = PathMatrix::from_fn(ensemble.steps(), ensemble.paths(), |t, p| {
                (ensemble.value(t, p, model.factor) * model.volume - model.fixed_cost) * dt
            });
            map.insert(
                "net_cash_flows".into(),
                serde_json::to_value(Vec::<Vec<f64>>::from(ncf))?,
            );
        }
    }
    Ok(())
}
