pub mod runner;

pub use runner::{
    analyze_scenarios, run_scenarios, ScenarioInput, ScenarioOutcome, ScenarioSchedules,
};
