use clap::Args;
use serde_json::Value;

use lsm_valuation_core::american::{self, AmericanOptionInput};
use lsm_valuation_core::LsmError;

use crate::simulation;

/// Arguments for American option valuation
#[derive(Args)]
pub struct AmericanArgs {
    /// Path to JSON or YAML input file
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_american(args: AmericanArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request = super::load_request(args.input.as_deref(), "American option valuation")?;
    simulation::prepare_request(&mut request)?;
    let option_input: AmericanOptionInput =
        serde_json::from_value(request).map_err(LsmError::from)?;
    let result = american::value_american_option(&option_input)?;
    Ok(serde_json::to_value(result)?)
}
