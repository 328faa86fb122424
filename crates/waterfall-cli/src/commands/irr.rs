use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use waterfall_core::time_value::calculate_irr;
use waterfall_core::{CashFlowEvent, CashFlowSchedule};

use super::load_input;

/// Arguments for a standalone IRR calculation
#[derive(Args)]
pub struct IrrArgs {
    /// Path to a JSON/YAML cash-flow schedule (overrides --cash-flows)
    #[arg(long)]
    pub input: Option<String>,

    /// Annual cash flows starting at t=0 (comma-separated, e.g. "-100,30,30,130")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub cash_flows: Option<Vec<Decimal>>,
}

pub fn run_irr(args: IrrArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let schedule = match (args.input.as_deref(), args.cash_flows) {
        (None, Some(flows)) => annual_schedule(&flows),
        (path, _) => load_input::<CashFlowSchedule>(path, "IRR")?,
    };
    let result = calculate_irr(&schedule)?;
    Ok(serde_json::to_value(result)?)
}

fn annual_schedule(flows: &[Decimal]) -> CashFlowSchedule {
    let events = flows
        .iter()
        .zip(0i64..)
        .map(|(amount, year)| {
            let t = Decimal::from(year);
            if *amount < Decimal::ZERO {
                CashFlowEvent::contribution(t, *amount, None)
            } else {
                CashFlowEvent::distribution(t, *amount)
            }
        })
        .collect();
    CashFlowSchedule::new(events)
}
