use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaterfallError {
    #[error("Configuration error: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Invalid cash flow at event {index}: {reason}")]
    InvalidCashFlow { index: usize, reason: String },

    #[error("Insufficient cash flows: {0}")]
    InsufficientCashFlows(String),

    #[error("No convergence: {function} after {iterations} iterations (npv: {last_npv})")]
    NoConvergence {
        function: String,
        iterations: u32,
        last_npv: Decimal,
    },

    #[error("Undefined IRR: {0}")]
    UndefinedIrr(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl WaterfallError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WaterfallError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for errors the caller fixes by editing the configuration rather
    /// than the cash-flow data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, WaterfallError::Configuration { .. })
    }
}

impl From<serde_json::Error> for WaterfallError {
    fn from(e: serde_json::Error) -> Self {
        WaterfallError::SerializationError(e.to_string())
    }
}
