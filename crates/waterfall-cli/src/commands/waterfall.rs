use clap::Args;
use serde::Deserialize;
use serde_json::Value;

use waterfall_core::waterfall::{calculate_waterfall, WaterfallConfiguration};
use waterfall_core::CashFlowSchedule;

use super::load_input;
use crate::input;

/// A configuration and its schedule in one document.
#[derive(Debug, Deserialize)]
struct WaterfallRequest {
    configuration: WaterfallConfiguration,
    schedule: CashFlowSchedule,
}

/// Arguments for a single waterfall run
#[derive(Args)]
pub struct WaterfallArgs {
    /// Path to a JSON/YAML file holding `configuration` and `schedule`
    #[arg(long, conflicts_with_all = ["config", "schedule"])]
    pub input: Option<String>,

    /// Path to the waterfall configuration (JSON or YAML)
    #[arg(long)]
    pub config: Option<String>,

    /// Path to the cash-flow schedule; read from stdin when omitted
    #[arg(long, requires = "config")]
    pub schedule: Option<String>,

    /// Drop the per-event ledger and keep only the summary figures
    #[arg(long)]
    pub summary: bool,
}

pub fn run_waterfall(args: WaterfallArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request = match args.config {
        Some(ref config_path) => {
            let configuration: WaterfallConfiguration = input::file::read_document(config_path)?;
            let schedule: CashFlowSchedule = load_input(args.schedule.as_deref(), "the schedule")?;
            WaterfallRequest {
                configuration,
                schedule,
            }
        }
        None => load_input(args.input.as_deref(), "waterfall")?,
    };

    tracing::info!(
        events = request.schedule.events.len(),
        tiers = request.configuration.promote_tiers.len(),
        "running waterfall"
    );
    let output = calculate_waterfall(&request.configuration, &request.schedule)?;
    let mut value = serde_json::to_value(output)?;
    if args.summary {
        if let Some(result) = value.get_mut("result").and_then(Value::as_object_mut) {
            result.remove("events");
        }
    }
    Ok(value)
}
