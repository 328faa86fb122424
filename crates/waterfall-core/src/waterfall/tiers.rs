use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::config::{Hurdle, HurdleLogic, TierTerms};
use crate::time_value::{growth_factor, npv_at};
use crate::types::*;
use crate::EngineResult;

/// Iteration cap for the boundary bisection.
pub const MAX_BOUNDARY_ITERATIONS: u32 = 200;
/// Width in cash at which the boundary bisection stops.
pub const BOUNDARY_TOLERANCE: Money = dec!(0.000000001);

/// Running totals for one promote tier across distribution events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierState {
    pub tier_number: u32,
    pub lp_distributed: Money,
    pub gp_distributed: Money,
    pub gp_promote: Money,
    /// First event at which the tier's hurdle was reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crossed_at_event: Option<usize>,
}

impl TierState {
    pub fn for_tiers(tiers: &[TierTerms]) -> Vec<TierState> {
        tiers
            .iter()
            .map(|t| TierState {
                tier_number: t.tier_number,
                ..TierState::default()
            })
            .collect()
    }
}

/// Cash one tier received at one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAllocation {
    pub tier_number: u32,
    pub to_lp: Money,
    pub to_gp: Money,
    /// GP cash above its pro-rata equity share of the tier
    pub gp_promote: Money,
    /// The tier's hurdle stood met once this event's cash passed through it
    pub hurdle_crossed: bool,
}

/// LP realized position that hurdles are tested against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LpPosition {
    flows: Vec<(Years, Money)>,
    contributed: Money,
    distributed: Money,
}

impl LpPosition {
    pub fn contribute(&mut self, t: Years, amount: Money) {
        let amount = amount.abs();
        if !amount.is_zero() {
            self.flows.push((t, -amount));
            self.contributed += amount;
        }
    }

    pub fn receive(&mut self, t: Years, amount: Money) {
        if !amount.is_zero() {
            self.flows.push((t, amount));
            self.distributed += amount;
        }
    }

    pub fn flows(&self) -> &[(Years, Money)] {
        &self.flows
    }

    pub fn contributed(&self) -> Money {
        self.contributed
    }

    pub fn distributed(&self) -> Money {
        self.distributed
    }
}

/// Hurdle test for additional LP cash received at a fixed time.
struct HurdleProbe {
    /// LP NPV at the hurdle rate (`None` when the discount factor leaves the
    /// Decimal range) and the discount factor at the event time
    irr: Option<(Option<Money>, Option<Decimal>)>,
    multiple: Option<(Money, Money)>,
    logic: HurdleLogic,
}

impl HurdleProbe {
    fn new(hurdle: &Hurdle, lp: &LpPosition, t: Years) -> Option<Self> {
        // IRR >= rate exactly when the NPV at rate is non-negative. A rate
        // whose discount factor overflows over the horizon is out of reach.
        let irr = hurdle.irr_rate().map(|rate| {
            let prior = npv_at(rate, lp.flows()).ok();
            (prior, growth_factor(Decimal::ONE + rate, t))
        });
        let multiple = hurdle
            .multiple()
            .map(|m| (m * lp.contributed(), lp.distributed()));
        let logic = match hurdle {
            Hurdle::Both { logic, .. } => *logic,
            _ => HurdleLogic::And,
        };
        if irr.is_none() && multiple.is_none() {
            return None;
        }
        Some(Self {
            irr,
            multiple,
            logic,
        })
    }

    fn met(&self, extra_lp: Money) -> bool {
        let irr_met = self.irr.map(|(prior, discount)| match (prior, discount) {
            (None, _) => false,
            (Some(prior), Some(d)) if !d.is_zero() => prior + extra_lp / d >= Decimal::ZERO,
            (Some(prior), _) => prior >= Decimal::ZERO,
        });
        let multiple_met = self
            .multiple
            .map(|(required, distributed)| distributed + extra_lp >= required);

        match (irr_met, multiple_met) {
            (Some(a), Some(b)) => match self.logic {
                HurdleLogic::And => a && b,
                HurdleLogic::Or => a || b,
            },
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => false,
        }
    }
}

/// Smallest tier cash in `[0, available]` at which the hurdle is met,
/// assuming `met` is monotone in the cash.
fn search_boundary(available: Money, lp_share: Rate, probe: &HurdleProbe) -> Money {
    let met = |cash: Money| probe.met(cash * lp_share);
    if met(Decimal::ZERO) {
        return Decimal::ZERO;
    }
    if !met(available) {
        return available;
    }

    let mut lo = Decimal::ZERO;
    let mut hi = available;
    for _ in 0..MAX_BOUNDARY_ITERATIONS {
        if hi - lo <= BOUNDARY_TOLERANCE {
            break;
        }
        let mid = (lo + hi) / dec!(2);
        if met(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Walk the promote tiers in order for one event's remaining cash.
///
/// Each tier takes cash up to the point its hurdle is reached, split by its
/// LP/GP shares; the LP part is credited to `lp` before the next tier is
/// tested. The unbounded final tier takes whatever is left. One allocation is
/// returned per tier, zero once the cash is exhausted.
pub fn cascade_tiers(
    tiers: &[TierTerms],
    states: &mut [TierState],
    lp: &mut LpPosition,
    event_time: Years,
    event_index: usize,
    available: Money,
    gp_equity_share: Rate,
) -> EngineResult<Vec<TierAllocation>> {
    let mut remaining = available.max(Decimal::ZERO);
    let mut allocations = Vec::with_capacity(tiers.len());

    for (tier, state) in tiers.iter().zip(states.iter_mut()) {
        if remaining.is_zero() {
            allocations.push(TierAllocation {
                tier_number: tier.tier_number,
                to_lp: Decimal::ZERO,
                to_gp: Decimal::ZERO,
                gp_promote: Decimal::ZERO,
                hurdle_crossed: false,
            });
            continue;
        }

        let (tier_cash, crossed) = match HurdleProbe::new(&tier.hurdle, lp, event_time) {
            Some(probe) => {
                let cash = search_boundary(remaining, tier.lp_share, &probe);
                (cash, cash < remaining)
            }
            None => (remaining, false),
        };

        let to_lp = tier_cash * tier.lp_share;
        let to_gp = tier_cash - to_lp;
        let gp_promote = (to_gp - tier_cash * gp_equity_share).max(Decimal::ZERO);

        lp.receive(event_time, to_lp);
        remaining -= tier_cash;

        state.lp_distributed += to_lp;
        state.gp_distributed += to_gp;
        state.gp_promote += gp_promote;
        if crossed && state.crossed_at_event.is_none() {
            state.crossed_at_event = Some(event_index);
            tracing::debug!(
                tier = tier.tier_number,
                event = event_index,
                cash = %tier_cash,
                "promote tier hurdle reached"
            );
        }

        allocations.push(TierAllocation {
            tier_number: tier.tier_number,
            to_lp,
            to_gp,
            gp_promote,
            hurdle_crossed: crossed,
        });
    }

    Ok(allocations)
}
