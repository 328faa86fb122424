pub mod accrual;
pub mod catch_up;
pub mod clawback;
pub mod config;
pub mod engine;
pub mod fees;
pub mod schedule;
pub mod tiers;

pub use config::{WaterfallConfiguration, WaterfallTerms, WaterfallTermsBuilder};
pub use engine::{calculate_waterfall, run_waterfall, WaterfallResult};
