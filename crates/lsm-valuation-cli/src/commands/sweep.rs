use clap::{Args, ValueEnum};
use serde_json::{json, Value};

use lsm_valuation_core::american::{AmericanOptionInput, Payoff};
use lsm_valuation_core::real_options::investment::RealOptionInput;
use lsm_valuation_core::scenarios::{self, SweepRange};
use lsm_valuation_core::{LsmError, LsmParams};

use crate::simulation;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SweepKind {
    /// Strike of a vanilla American option
    Strike,
    /// Constant CAPEX of the option to invest
    Capex,
}

/// Arguments for scenario sweeps over one set of paths
#[derive(Args)]
pub struct SweepArgs {
    /// Quantity to sweep
    #[arg(long, value_enum)]
    pub kind: SweepKind,

    /// Range in format min:max:step (e.g. "30:44:2")
    #[arg(long)]
    pub range: String,

    /// Path to JSON or YAML file with the base case request
    #[arg(long)]
    pub input: Option<String>,
}

fn parse_range(spec: &str) -> Result<SweepRange, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("Sweep range must be min:max:step, got '{}'", spec).into());
    }
    Ok(SweepRange {
        min: parts[0].trim().parse()?,
        max: parts[1].trim().parse()?,
        step: parts[2].trim().parse()?,
    })
}

pub fn run_sweep(args: SweepArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let levels = parse_range(&args.range)?.values()?;
    let mut request = super::load_request(args.input.as_deref(), "scenario sweeps")?;
    simulation::prepare_request(&mut request)?;

    let results = match args.kind {
        SweepKind::Strike => {
            let base: AmericanOptionInput =
                serde_json::from_value(request).map_err(LsmError::from)?;
            let Payoff::Vanilla {
                option_type,
                factor,
                ..
            } = base.payoff
            else {
                return Err("strike sweeps require a vanilla payoff".into());
            };
            let params = LsmParams::new(base.risk_free_rate, base.dt, base.basis);
            let rows = scenarios::sweep_american_strikes(
                &base.state_variables,
                option_type,
                factor,
                &levels,
                &params,
            )?;
            serde_json::to_value(rows)?
        }
        SweepKind::Capex => {
            let base: RealOptionInput =
                serde_json::from_value(request).map_err(LsmError::from)?;
            let params = LsmParams::new(base.risk_free_rate, base.dt, base.basis);
            let rows = scenarios::sweep_real_option_capex(
                &base.state_variables,
                &base.net_cash_flows,
                &levels,
                base.construction_lag,
                &params,
            )?;
            serde_json::to_value(rows)?
        }
    };

    Ok(json!({
        "sweep": format!("{:?}", args.kind).to_lowercase(),
        "range": args.range,
        "results": results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let r = parse_range("30:44:2").unwrap();
        assert_eq!(r.values().unwrap().len(), 8);
        assert!(parse_range("30:44").is_err());
        assert!(parse_range("a:1:1").is_err());
    }
}
