use clap::Args;
use serde_json::Value;

use waterfall_core::scenarios::{analyze_scenarios, ScenarioInput};

use super::load_input;

/// Arguments for downside/base/upside analysis
#[derive(Args)]
pub struct ScenariosArgs {
    /// Path to a JSON/YAML file with `configuration`, `schedules` and optional `probabilities`
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_scenarios(args: ScenariosArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let scenario_input: ScenarioInput = load_input(args.input.as_deref(), "scenario analysis")?;
    let result = analyze_scenarios(&scenario_input)?;
    Ok(serde_json::to_value(result)?)
}
