use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.08 = 8%). Authored percentages are
/// converted at the configuration boundary.
pub type Rate = Decimal;

/// Multiples (e.g., 1.8x equity multiple)
pub type Multiple = Decimal;

/// Year fractions or counts
pub type Years = Decimal;

/// Capital pool a cash flow belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Lp,
    Gp,
}

/// A single capital call or distribution on the project timeline.
///
/// Negative amounts are contributions, positive amounts are cash available
/// for distribution. Timing is either an offset in years from the start of
/// the schedule or a calendar date resolved against `CashFlowSchedule::start_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_offset_years: Option<Years>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub amount: Money,
    /// Pool funding a contribution. Untagged contributions are split by the
    /// capital structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CashFlowEvent {
    pub fn contribution(time_offset_years: Years, amount: Money, party: Option<Party>) -> Self {
        Self {
            time_offset_years: Some(time_offset_years),
            date: None,
            amount: -amount.abs(),
            party,
            label: None,
        }
    }

    pub fn distribution(time_offset_years: Years, amount: Money) -> Self {
        Self {
            time_offset_years: Some(time_offset_years),
            date: None,
            amount: amount.abs(),
            party: None,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_contribution(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

/// Project cash-flow timeline produced by the pro-forma projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowSchedule {
    pub events: Vec<CashFlowEvent>,
    /// Anchor for dated events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// End of the construction period, in years from the start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construction_end_years: Option<Years>,
}

impl CashFlowSchedule {
    pub fn new(events: Vec<CashFlowEvent>) -> Self {
        Self {
            events,
            start_date: None,
            construction_end_years: None,
        }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
