use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use crate::error::WaterfallError;
use crate::types::*;
use crate::waterfall::config::{WaterfallConfiguration, WaterfallTerms};
use crate::waterfall::engine::{run_waterfall, WaterfallResult};
use crate::EngineResult;

pub const DOWNSIDE: &str = "downside";
pub const BASE: &str = "base";
pub const UPSIDE: &str = "upside";

const PROBABILITY_TOLERANCE: Decimal = dec!(0.001);

/// Independent cash-flow projections for the three cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSchedules {
    pub downside: CashFlowSchedule,
    pub base: CashFlowSchedule,
    pub upside: CashFlowSchedule,
}

impl ScenarioSchedules {
    fn named(&self) -> [(&'static str, &CashFlowSchedule); 3] {
        [
            (DOWNSIDE, &self.downside),
            (BASE, &self.base),
            (UPSIDE, &self.upside),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioProbabilities {
    pub downside: Rate,
    pub base: Rate,
    pub upside: Rate,
}

impl ScenarioProbabilities {
    fn of(&self, name: &str) -> Rate {
        match name {
            DOWNSIDE => self.downside,
            UPSIDE => self.upside,
            _ => self.base,
        }
    }
}

/// Input for a full scenario analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInput {
    pub configuration: WaterfallConfiguration,
    pub schedules: ScenarioSchedules,
    /// Optional case weights; must sum to 1 when given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<ScenarioProbabilities>,
}

/// Result slot of one scenario. A failed run never aborts the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Completed {
        result: Box<WaterfallResult>,
        warnings: Vec<String>,
    },
    Failed {
        error: String,
    },
}

impl ScenarioOutcome {
    pub fn result(&self) -> Option<&WaterfallResult> {
        match self {
            ScenarioOutcome::Completed { result, .. } => Some(result.as_ref()),
            ScenarioOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScenarioOutcome::Failed { .. })
    }
}

/// Run the engine once per case, in parallel, against the same terms.
///
/// Each run owns its schedule borrow and shares only the immutable terms.
pub fn run_scenarios(
    terms: &WaterfallTerms,
    schedules: &ScenarioSchedules,
) -> BTreeMap<String, ScenarioOutcome> {
    thread::scope(|scope| {
        let handles: Vec<_> = schedules
            .named()
            .into_iter()
            .map(|(name, schedule)| (name, scope.spawn(move || run_waterfall(terms, schedule))))
            .collect();

        handles
            .into_iter()
            .map(|(name, handle)| {
                let outcome = match handle.join() {
                    Ok(Ok((result, warnings))) => ScenarioOutcome::Completed {
                        result: Box::new(result),
                        warnings,
                    },
                    Ok(Err(e)) => {
                        tracing::warn!(scenario = name, error = %e, "scenario run failed");
                        ScenarioOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                    Err(_) => ScenarioOutcome::Failed {
                        error: "scenario run panicked".into(),
                    },
                };
                (name.to_string(), outcome)
            })
            .collect()
    })
}

/// Headline numbers of one case, with deviation from the base case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<Rate>,
    pub lp_irr: Option<Rate>,
    pub gp_irr: Option<Rate>,
    pub lp_distributed: Money,
    pub gp_distributed: Money,
    pub total_gp_promote: Money,
    pub lp_irr_deviation_from_base: Option<Rate>,
    pub lp_distributed_deviation_from_base: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityWeighted {
    /// Absent when any case lacks an LP IRR
    pub lp_irr: Option<Rate>,
    pub lp_distributed: Money,
    pub gp_distributed: Money,
}

/// Output of scenario analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAnalysis {
    pub outcomes: BTreeMap<String, ScenarioOutcome>,
    pub summaries: Vec<ScenarioSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability_weighted: Option<ProbabilityWeighted>,
}

fn validate_probabilities(p: &ScenarioProbabilities) -> EngineResult<()> {
    for (name, value) in [(DOWNSIDE, p.downside), (BASE, p.base), (UPSIDE, p.upside)] {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(WaterfallError::config(
                format!("probabilities.{name}"),
                "probability must be between 0 and 1",
            ));
        }
    }
    let total = p.downside + p.base + p.upside;
    if (total - Decimal::ONE).abs() > PROBABILITY_TOLERANCE {
        return Err(WaterfallError::config(
            "probabilities",
            format!("probabilities must sum to 1.0 (got {total})"),
        ));
    }
    Ok(())
}

/// Validate once, run the three cases, and compare them.
///
/// Configuration and probability errors fail the whole analysis; a case that
/// fails on its own cash flows is reported in its slot and as a warning.
pub fn analyze_scenarios(
    input: &ScenarioInput,
) -> EngineResult<ComputationOutput<ScenarioAnalysis>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let terms = input.configuration.validate()?;
    if let Some(p) = &input.probabilities {
        validate_probabilities(p)?;
    }

    let outcomes = run_scenarios(&terms, &input.schedules);
    for (name, outcome) in &outcomes {
        if let ScenarioOutcome::Failed { error } = outcome {
            warnings.push(format!("Scenario '{name}' failed: {error}"));
        }
    }

    let base = outcomes.get(BASE).and_then(ScenarioOutcome::result);
    let summaries: Vec<ScenarioSummary> = [DOWNSIDE, BASE, UPSIDE]
        .iter()
        .filter_map(|name| {
            let result = outcomes.get(*name)?.result()?;
            let lp = &result.final_results.lp;
            let lp_irr_deviation_from_base = base.and_then(|b| {
                let base_irr = b.final_results.lp.irr?;
                Some(lp.irr? - base_irr)
            });
            Some(ScenarioSummary {
                name: name.to_string(),
                probability: input.probabilities.map(|p| p.of(name)),
                lp_irr: lp.irr,
                gp_irr: result.final_results.gp.irr,
                lp_distributed: lp.total_distributed,
                gp_distributed: result.final_results.gp.total_distributed,
                total_gp_promote: result.total_gp_promote,
                lp_irr_deviation_from_base,
                lp_distributed_deviation_from_base: base
                    .map(|b| lp.total_distributed - b.final_results.lp.total_distributed),
            })
        })
        .collect();

    let probability_weighted = match input.probabilities {
        Some(p) if summaries.len() == 3 => {
            let lp_irr = summaries
                .iter()
                .map(|s| s.lp_irr.map(|r| r * p.of(&s.name)))
                .sum::<Option<Decimal>>();
            Some(ProbabilityWeighted {
                lp_irr,
                lp_distributed: summaries.iter().map(|s| s.lp_distributed * p.of(&s.name)).sum(),
                gp_distributed: summaries.iter().map(|s| s.gp_distributed * p.of(&s.name)).sum(),
            })
        }
        Some(_) => {
            warnings.push(
                "Probability-weighted results omitted: not every scenario completed".into(),
            );
            None
        }
        None => None,
    };

    let output = ScenarioAnalysis {
        outcomes,
        summaries,
        probability_weighted,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Downside/Base/Upside Waterfall Scenario Analysis",
        &serde_json::json!({
            "configuration": input.configuration,
            "probabilities": input.probabilities,
        }),
        warnings,
        elapsed,
        output,
    ))
}
