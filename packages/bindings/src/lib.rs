use napi::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;

use waterfall_core::scenarios::ScenarioInput;
use waterfall_core::waterfall::WaterfallConfiguration;
use waterfall_core::CashFlowSchedule;

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

#[derive(Deserialize)]
struct WaterfallRequest {
    configuration: WaterfallConfiguration,
    schedule: CashFlowSchedule,
}

// ---------------------------------------------------------------------------
// Waterfall
// ---------------------------------------------------------------------------

/// `{ configuration, schedule }` in, `ComputationOutput<WaterfallResult>` out.
#[napi]
pub fn compute_waterfall(input_json: String) -> NapiResult<String> {
    let input: WaterfallRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        waterfall_core::waterfall::calculate_waterfall(&input.configuration, &input.schedule)
            .map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

/// Normalised terms for a configuration, or the first configuration error.
#[napi]
pub fn validate_configuration(input_json: String) -> NapiResult<String> {
    let input: WaterfallConfiguration =
        serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let terms = input.validate().map_err(to_napi_error)?;
    let output = serde_json::json!({ "valid": true, "terms": terms });
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[napi]
pub fn analyze_scenarios(input_json: String) -> NapiResult<String> {
    let input: ScenarioInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        waterfall_core::scenarios::analyze_scenarios(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Time value
// ---------------------------------------------------------------------------

#[napi]
pub fn calculate_irr(input_json: String) -> NapiResult<String> {
    let input: CashFlowSchedule = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = waterfall_core::time_value::calculate_irr(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
