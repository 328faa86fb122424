use clap::Args;
use serde_json::{json, Value};

use waterfall_core::waterfall::WaterfallConfiguration;

use super::load_input;

/// Arguments for configuration validation
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the waterfall configuration (JSON or YAML)
    #[arg(long)]
    pub input: Option<String>,
}

/// Validate a configuration and echo the normalised terms as fractions.
pub fn run_validate(args: ValidateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let config: WaterfallConfiguration = load_input(args.input.as_deref(), "validation")?;
    let terms = config.validate()?;
    Ok(json!({ "valid": true, "terms": terms }))
}
