use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::WaterfallError;
use crate::types::*;
use crate::EngineResult;

const DAYS_PER_YEAR: Decimal = dec!(365.25);

/// A schedule event with its timing resolved to a year offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    /// Position in the originating schedule
    pub index: usize,
    pub time: Years,
    pub amount: Money,
    pub party: Option<Party>,
    pub label: Option<String>,
}

impl ResolvedEvent {
    pub fn is_contribution(&self) -> bool {
        self.amount < Decimal::ZERO
    }
}

/// Resolve every event to a year offset and check the timeline.
///
/// Offsets must be non-negative and non-decreasing in schedule order. Dated
/// events need `start_date` and convert at actual/365.25. Party tags are only
/// meaningful on contributions.
pub fn resolve_schedule(schedule: &CashFlowSchedule) -> EngineResult<Vec<ResolvedEvent>> {
    if schedule.events.is_empty() {
        return Err(WaterfallError::InsufficientCashFlows(
            "cash-flow schedule has no events".into(),
        ));
    }
    if let Some(end) = schedule.construction_end_years {
        if end < Decimal::ZERO {
            return Err(WaterfallError::config(
                "construction_end_years",
                "construction end cannot be negative",
            ));
        }
    }

    let mut resolved = Vec::with_capacity(schedule.events.len());
    let mut previous = Decimal::ZERO;

    for (index, event) in schedule.events.iter().enumerate() {
        let invalid = |reason: &str| WaterfallError::InvalidCashFlow {
            index,
            reason: reason.to_string(),
        };

        let time = match (event.time_offset_years, event.date) {
            (Some(_), Some(_)) => {
                return Err(invalid("specify either time_offset_years or date, not both"))
            }
            (Some(t), None) => t,
            (None, Some(date)) => {
                let start = schedule
                    .start_date
                    .ok_or_else(|| invalid("dated event requires a schedule start_date"))?;
                Decimal::from((date - start).num_days()) / DAYS_PER_YEAR
            }
            (None, None) => return Err(invalid("event has neither time_offset_years nor date")),
        };

        if time < Decimal::ZERO {
            return Err(invalid("event falls before the start of the schedule"));
        }
        if time < previous {
            return Err(invalid("events must be in chronological order"));
        }
        if event.party.is_some() && !event.is_contribution() {
            return Err(invalid("party tags apply to contributions only"));
        }
        previous = time;

        resolved.push(ResolvedEvent {
            index,
            time,
            amount: event.amount,
            party: event.party,
            label: event.label.clone(),
        });
    }

    Ok(resolved)
}

/// Index of the last event carrying positive cash.
pub fn final_distribution(events: &[ResolvedEvent]) -> Option<usize> {
    events.iter().rposition(|e| e.amount > Decimal::ZERO)
}
