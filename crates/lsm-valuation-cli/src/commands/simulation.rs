use clap::Args;
use serde_json::{json, Value};

use crate::simulation::GbmSpec;

/// Arguments for simulating geometric Brownian motion paths
#[derive(Args)]
pub struct SimulateGbmArgs {
    /// Path to JSON or YAML file holding the GBM specification
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_simulate_gbm(args: SimulateGbmArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request = super::load_request(args.input.as_deref(), "path simulation")?;
    // accept either a bare specification or one wrapped in a "gbm" block
    if let Some(inner) = request.get_mut("gbm").map(Value::take) {
        request = inner;
    }
    let spec: GbmSpec = serde_json::from_value(request)?;
    let paths = spec.simulate()?;
    Ok(json!({
        "dt": spec.dt(),
        "state_variables": Vec::<Vec<f64>>::from(paths),
    }))
}
