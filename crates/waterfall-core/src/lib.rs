pub mod error;
pub mod time_value;
pub mod types;
pub mod waterfall;

#[cfg(feature = "scenarios")]
pub mod scenarios;

pub use error::WaterfallError;
pub use types::*;

/// Standard result type for all waterfall operations
pub type EngineResult<T> = Result<T, WaterfallError>;
