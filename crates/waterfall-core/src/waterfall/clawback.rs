use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::{ClawbackTerms, TrueUpFrequency};
use super::schedule::ResolvedEvent;
use crate::types::*;

/// Outcome of one clawback true-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClawbackTrueUp {
    pub event_index: usize,
    pub time_offset_years: Years,
    pub gp_promote_paid_to_date: Money,
    /// Promote the realized results support in hindsight
    pub gp_promote_justified: Money,
    /// Transferred from the GP to the LP at this true-up
    pub clawback_amount: Money,
    /// Most the GP could be asked to return at this true-up
    pub cap: Money,
    /// Part of the clawback funded from withheld promote
    pub funded_from_holdback: Money,
    pub lp_irr_to_date: Option<Rate>,
    pub gp_irr_to_date: Option<Rate>,
}

/// Every true-up of a run; present only when clawback is enabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClawbackSummary {
    /// Total returned by the GP across all true-ups
    pub clawback_amount: Money,
    pub true_ups: Vec<ClawbackTrueUp>,
}

/// Amounts settled at one true-up, before IRRs are attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub justified: Money,
    pub amount: Money,
    pub cap: Money,
}

/// Decides when true-ups happen and keeps the running clawback total.
#[derive(Debug, Clone)]
pub struct ClawbackTracker {
    terms: ClawbackTerms,
    next_anniversary: Years,
    returned: Money,
    true_ups: Vec<ClawbackTrueUp>,
}

impl ClawbackTracker {
    pub fn new(terms: ClawbackTerms) -> Self {
        Self {
            terms,
            next_anniversary: Decimal::ONE,
            returned: Decimal::ZERO,
            true_ups: Vec::new(),
        }
    }

    /// Whether the distribution event at `t` is a true-up point. Annual
    /// true-ups fall on the first distribution at or after each whole year;
    /// the final distribution always trues up.
    pub fn is_due(&mut self, t: Years, is_final: bool) -> bool {
        match self.terms.frequency {
            TrueUpFrequency::EveryDistribution => true,
            TrueUpFrequency::AtExit => is_final,
            TrueUpFrequency::Annually => {
                if t >= self.next_anniversary {
                    self.next_anniversary = t.floor() + Decimal::ONE;
                    true
                } else {
                    is_final
                }
            }
        }
    }

    /// `max(0, paid - justified - returned)`, capped at the escrow share of
    /// promote paid less what has already been returned.
    pub fn settle(&mut self, paid_to_date: Money, justified: Money) -> Settlement {
        let cap = (self.terms.escrow_share * paid_to_date - self.returned).max(Decimal::ZERO);
        let excess = (paid_to_date - justified - self.returned).max(Decimal::ZERO);
        let amount = excess.min(cap);
        self.returned += amount;
        Settlement {
            justified,
            amount,
            cap,
        }
    }

    pub fn record(&mut self, true_up: ClawbackTrueUp) {
        self.true_ups.push(true_up);
    }

    pub fn returned(&self) -> Money {
        self.returned
    }

    pub fn into_summary(self) -> ClawbackSummary {
        ClawbackSummary {
            clawback_amount: self.returned,
            true_ups: self.true_ups,
        }
    }
}

/// Realized-to-date timeline for the hindsight cascade.
///
/// Takes the events through `through` (inclusive) and moves every
/// contribution to no later than the first distribution, so capital called
/// after promote was paid counts against that promote. Contributions sort
/// ahead of a distribution at the same time.
pub fn hindsight_events(events: &[ResolvedEvent], through: usize) -> Vec<ResolvedEvent> {
    let realized = &events[..=through.min(events.len().saturating_sub(1))];
    let first_distribution = realized
        .iter()
        .find(|e| e.amount > Decimal::ZERO)
        .map(|e| e.time);

    let mut moved: Vec<ResolvedEvent> = realized
        .iter()
        .cloned()
        .map(|mut e| {
            if let Some(first) = first_distribution {
                if e.is_contribution() && e.time > first {
                    e.time = first;
                }
            }
            e
        })
        .collect();
    moved.sort_by(|a, b| {
        a.time
            .cmp(&b.time)
            .then_with(|| b.is_contribution().cmp(&a.is_contribution()))
    });
    moved
}
