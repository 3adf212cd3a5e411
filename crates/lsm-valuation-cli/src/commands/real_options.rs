use clap::Args;
use serde_json::Value;

use lsm_valuation_core::real_options::flexibility::{self, FlexibleRealOptionInput};
use lsm_valuation_core::real_options::investment::{self, RealOptionInput};
use lsm_valuation_core::LsmError;

use crate::simulation;

/// Arguments for the option to invest
#[derive(Args)]
pub struct RealOptionArgs {
    /// Path to JSON or YAML input file
    #[arg(long)]
    pub input: Option<String>,
}

/// Arguments for the option to invest with suspension, resumption and abandonment
#[derive(Args)]
pub struct FlexibleRealOptionArgs {
    /// Path to JSON or YAML input file
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_real_option(args: RealOptionArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request = super::load_request(args.input.as_deref(), "real option valuation")?;
    simulation::prepare_request(&mut request)?;
    let option_input: RealOptionInput =
        serde_json::from_value(request).map_err(LsmError::from)?;
    let result = investment::value_real_option(&option_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_flexible_real_option(
    args: FlexibleRealOptionArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request =
        super::load_request(args.input.as_deref(), "flexible real option valuation")?;
    simulation::prepare_request(&mut request)?;
    let option_input: FlexibleRealOptionInput =
        serde_json::from_value(request).map_err(LsmError::from)?;
    let result = flexibility::value_flexible_real_option(&option_input)?;
    Ok(serde_json::to_value(result)?)
}
