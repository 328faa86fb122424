use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::accrual::{AccrualTracker, PreferredReturnLedger};
use super::catch_up::{allocate_catch_up, CatchUpAllocation};
use super::clawback::{hindsight_events, ClawbackSummary, ClawbackTracker, ClawbackTrueUp};
use super::config::{StructureType, WaterfallConfiguration, WaterfallTerms};
use super::fees::FeeTracker;
use super::schedule::{final_distribution, resolve_schedule, ResolvedEvent};
use super::tiers::{cascade_tiers, LpPosition, TierAllocation, TierState};
use crate::time_value::{equity_multiple, irr};
use crate::types::*;
use crate::EngineResult;

const IRR_GUESS: Rate = dec!(0.10);

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Cascade steps in the order every distribution event runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterfallStep {
    ReturnOfCapital,
    PreferredReturnLp,
    PreferredReturnGp,
    CatchUp,
    PromoteTiers,
}

impl WaterfallStep {
    pub const ORDER: [WaterfallStep; 5] = [
        WaterfallStep::ReturnOfCapital,
        WaterfallStep::PreferredReturnLp,
        WaterfallStep::PreferredReturnGp,
        WaterfallStep::CatchUp,
        WaterfallStep::PromoteTiers,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            WaterfallStep::ReturnOfCapital => "Return of Capital",
            WaterfallStep::PreferredReturnLp => "Preferred Return (LP)",
            WaterfallStep::PreferredReturnGp => "Preferred Return (GP)",
            WaterfallStep::CatchUp => "GP Catch-Up",
            WaterfallStep::PromoteTiers => "Promote Tiers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAllocation {
    pub step: WaterfallStep,
    pub to_lp: Money,
    pub to_gp: Money,
}

impl StepAllocation {
    fn new(step: WaterfallStep, to_lp: Money, to_gp: Money) -> Self {
        Self { step, to_lp, to_gp }
    }

    pub fn total(&self) -> Money {
        self.to_lp + self.to_gp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Contribution,
    Distribution,
}

/// Audit record of one schedule event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub index: usize,
    pub kind: EventKind,
    pub time_offset_years: Years,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Signed amount as scheduled
    pub amount: Money,
    pub lp_contribution: Money,
    pub gp_contribution: Money,
    pub management_fee: Money,
    /// Gross cash less the management fee
    pub distributable: Money,
    pub steps: Vec<StepAllocation>,
    pub tier_allocations: Vec<TierAllocation>,
    pub gp_promote_earned: Money,
    /// Promote withheld from the GP at this event (European deferral, hybrid escrow)
    pub gp_promote_withheld: Money,
    pub gp_promote_released: Money,
    /// Net cash to each party after holdbacks, releases and clawback
    pub lp_cash: Money,
    pub gp_cash: Money,
    pub lp_ledger: PreferredReturnLedger,
    pub gp_ledger: PreferredReturnLedger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_up: Option<ClawbackTrueUp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolResult {
    pub irr: Option<Rate>,
    pub equity_multiple: Option<Multiple>,
    pub total_contributed: Money,
    pub total_distributed: Money,
    pub profit: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResults {
    pub lp: PoolResult,
    pub gp: PoolResult,
    /// Whole-project flows: all contributions and gross distributions
    pub project: PoolResult,
}

/// Cumulative split of one cascade step or promote tier across the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub tier_name: String,
    pub lp_distribution: Money,
    pub gp_distribution: Money,
    pub gp_promote_in_tier: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallResult {
    pub final_results: FinalResults,
    pub tier_results: Vec<TierResult>,
    pub events: Vec<EventResult>,
    pub management_fees_paid: Money,
    /// Capital-based fees still owed at the end of the schedule
    pub management_fees_unpaid: Money,
    pub total_gp_promote: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clawback: Option<ClawbackSummary>,
}

// ---------------------------------------------------------------------------
// Event state machine
// ---------------------------------------------------------------------------

struct Cascade<'a> {
    terms: &'a WaterfallTerms,
    construction_end: Option<Years>,
    lp_pref: AccrualTracker,
    gp_pref: AccrualTracker,
    fees: Option<FeeTracker>,
    lp: LpPosition,
    gp_flows: Vec<(Years, Money)>,
    gp_contributed: Money,
    gp_received: Money,
    project_flows: Vec<(Years, Money)>,
    project_contributed: Money,
    project_distributed: Money,
    tier_states: Vec<TierState>,
    step_totals: Vec<StepAllocation>,
    gp_catch_up_paid: Money,
    catch_up_promote: Money,
    promote_earned: Money,
    promote_held: Money,
    clawback: Option<ClawbackTracker>,
    events: Vec<EventResult>,
}

impl<'a> Cascade<'a> {
    fn new(terms: &'a WaterfallTerms, construction_end: Option<Years>) -> Self {
        let (lp_pref, gp_pref) = match &terms.preferred {
            Some(pref) => (
                AccrualTracker::new(pref.lp_rate, pref, construction_end),
                match pref.gp_rate {
                    Some(rate) => AccrualTracker::new(rate, pref, construction_end),
                    None => AccrualTracker::capital_only(),
                },
            ),
            None => (AccrualTracker::capital_only(), AccrualTracker::capital_only()),
        };

        Self {
            terms,
            construction_end,
            lp_pref,
            gp_pref,
            fees: terms.management_fee.map(FeeTracker::new),
            lp: LpPosition::default(),
            gp_flows: Vec::new(),
            gp_contributed: Decimal::ZERO,
            gp_received: Decimal::ZERO,
            project_flows: Vec::new(),
            project_contributed: Decimal::ZERO,
            project_distributed: Decimal::ZERO,
            tier_states: TierState::for_tiers(&terms.tiers),
            step_totals: WaterfallStep::ORDER
                .iter()
                .map(|s| StepAllocation::new(*s, Decimal::ZERO, Decimal::ZERO))
                .collect(),
            gp_catch_up_paid: Decimal::ZERO,
            catch_up_promote: Decimal::ZERO,
            promote_earned: Decimal::ZERO,
            promote_held: Decimal::ZERO,
            clawback: terms.clawback.map(ClawbackTracker::new),
            events: Vec::new(),
        }
    }

    fn run(&mut self, events: &[ResolvedEvent]) -> EngineResult<()> {
        let last = final_distribution(events);
        for (position, event) in events.iter().enumerate() {
            self.advance(event.time);
            let result = if event.is_contribution() {
                self.contribute(event)
            } else {
                self.distribute(events, position, Some(position) == last)?
            };
            self.events.push(result);
        }
        Ok(())
    }

    /// Accrue preferred return and fees up to `t`, before the event's cash moves.
    fn advance(&mut self, t: Years) {
        self.lp_pref.accrue_to(t);
        self.gp_pref.accrue_to(t);
        if let Some(fees) = self.fees.as_mut() {
            let lp = self.lp_pref.ledger();
            let gp = self.gp_pref.ledger();
            fees.accrue_to(
                t,
                lp.contributed_capital + gp.contributed_capital,
                lp.outstanding_principal() + gp.outstanding_principal(),
            );
        }
    }

    fn contribute(&mut self, event: &ResolvedEvent) -> EventResult {
        let t = event.time;
        let total = -event.amount;
        let (lp_amount, gp_amount) = match event.party {
            Some(Party::Lp) => (total, Decimal::ZERO),
            Some(Party::Gp) => (Decimal::ZERO, total),
            None => {
                let lp = total * self.terms.lp_equity_share;
                (lp, total - lp)
            }
        };

        self.lp_pref.contribute(lp_amount);
        self.gp_pref.contribute(gp_amount);
        self.lp.contribute(t, lp_amount);
        if !gp_amount.is_zero() {
            self.gp_flows.push((t, -gp_amount));
            self.gp_contributed += gp_amount;
        }
        self.project_flows.push((t, event.amount));
        self.project_contributed += total;

        EventResult {
            index: event.index,
            kind: EventKind::Contribution,
            time_offset_years: t,
            label: event.label.clone(),
            amount: event.amount,
            lp_contribution: lp_amount,
            gp_contribution: gp_amount,
            management_fee: Decimal::ZERO,
            distributable: Decimal::ZERO,
            steps: Vec::new(),
            tier_allocations: Vec::new(),
            gp_promote_earned: Decimal::ZERO,
            gp_promote_withheld: Decimal::ZERO,
            gp_promote_released: Decimal::ZERO,
            lp_cash: -lp_amount,
            gp_cash: -gp_amount,
            lp_ledger: self.lp_pref.ledger(),
            gp_ledger: self.gp_pref.ledger(),
            true_up: None,
        }
    }

    fn distribute(
        &mut self,
        events: &[ResolvedEvent],
        position: usize,
        is_final: bool,
    ) -> EngineResult<EventResult> {
        let event = &events[position];
        let t = event.time;
        let gross = event.amount;
        let fee = self.fees.as_mut().map_or(Decimal::ZERO, |f| f.deduct(gross));
        let distributable = gross - fee;
        let mut remaining = distributable;

        // Return of capital, pro-rata to outstanding principal
        let lp_outstanding = self.lp_pref.ledger().outstanding_principal();
        let outstanding = lp_outstanding + self.gp_pref.ledger().outstanding_principal();
        let roc = remaining.min(outstanding);
        let (lp_roc, gp_roc) = if roc > Decimal::ZERO {
            let lp_applied = self.lp_pref.return_capital(roc * lp_outstanding / outstanding);
            let gp_applied = self.gp_pref.return_capital(roc - lp_applied);
            (lp_applied, gp_applied)
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };
        remaining -= lp_roc + gp_roc;

        let lp_preferred = self.lp_pref.pay_preferred(remaining);
        remaining -= lp_preferred;
        let gp_preferred = self.gp_pref.pay_preferred(remaining);
        remaining -= gp_preferred;

        let lp_current = self.lp_pref.ledger().unpaid_preferred() <= Decimal::ZERO;
        self.lp_pref.close_distribution();
        self.gp_pref.close_distribution();

        let catch_up = match &self.terms.catch_up {
            Some(terms) => allocate_catch_up(
                terms,
                self.lp_pref.ledger().paid_preferred,
                self.gp_catch_up_paid,
                remaining,
                lp_current,
            ),
            None => CatchUpAllocation::default(),
        };
        self.gp_catch_up_paid += catch_up.to_gp;
        remaining -= catch_up.total();
        let catch_up_promote =
            (catch_up.to_gp - catch_up.total() * self.terms.gp_equity_share).max(Decimal::ZERO);

        self.lp.receive(t, lp_roc + lp_preferred + catch_up.to_lp);
        let tier_allocations = cascade_tiers(
            &self.terms.tiers,
            &mut self.tier_states,
            &mut self.lp,
            t,
            event.index,
            remaining,
            self.terms.gp_equity_share,
        )?;
        let tiers_lp: Money = tier_allocations.iter().map(|a| a.to_lp).sum();
        let tiers_gp: Money = tier_allocations.iter().map(|a| a.to_gp).sum();

        let steps = vec![
            StepAllocation::new(WaterfallStep::ReturnOfCapital, lp_roc, gp_roc),
            StepAllocation::new(WaterfallStep::PreferredReturnLp, lp_preferred, Decimal::ZERO),
            StepAllocation::new(WaterfallStep::PreferredReturnGp, Decimal::ZERO, gp_preferred),
            StepAllocation::new(WaterfallStep::CatchUp, catch_up.to_lp, catch_up.to_gp),
            StepAllocation::new(WaterfallStep::PromoteTiers, tiers_lp, tiers_gp),
        ];
        for (total, step) in self.step_totals.iter_mut().zip(&steps) {
            total.to_lp += step.to_lp;
            total.to_gp += step.to_gp;
        }

        let tier_promote: Money = tier_allocations.iter().map(|a| a.gp_promote).sum();
        let promote = catch_up_promote + tier_promote;
        self.catch_up_promote += catch_up_promote;
        self.promote_earned += promote;

        let withheld = match self.terms.structure {
            StructureType::American => Decimal::ZERO,
            StructureType::European => promote,
            StructureType::Hybrid => self
                .terms
                .clawback
                .map_or(Decimal::ZERO, |cb| promote * cb.escrow_share),
        };
        self.promote_held += withheld;

        let mut lp_cash: Money = steps.iter().map(|s| s.to_lp).sum();
        let mut gp_cash: Money = steps.iter().map(|s| s.to_gp).sum::<Money>() - withheld;

        let due = match self.clawback.as_mut() {
            Some(cb) => cb.is_due(t, is_final),
            None => false,
        };
        let mut settled = None;
        if due {
            let justified = justified_promote(self.terms, self.construction_end, events, position)?;
            let paid_to_date = self.promote_earned;
            let settlement = self
                .clawback
                .as_mut()
                .map(|cb| cb.settle(paid_to_date, justified));
            if let Some(settlement) = settlement {
                let from_holdback = settlement.amount.min(self.promote_held);
                self.promote_held -= from_holdback;
                gp_cash -= settlement.amount - from_holdback;
                lp_cash += settlement.amount;
                self.lp.receive(t, settlement.amount);
                settled = Some((settlement, paid_to_date, from_holdback));
            }
        }

        let mut released = Decimal::ZERO;
        if is_final && self.promote_held > Decimal::ZERO {
            released = self.promote_held;
            self.promote_held = Decimal::ZERO;
            gp_cash += released;
        }

        if !gp_cash.is_zero() {
            self.gp_flows.push((t, gp_cash));
        }
        self.gp_received += gp_cash;
        self.project_flows.push((t, gross));
        self.project_distributed += gross;

        let true_up = settled.map(|(s, paid_to_date, from_holdback)| ClawbackTrueUp {
            event_index: event.index,
            time_offset_years: t,
            gp_promote_paid_to_date: paid_to_date,
            gp_promote_justified: s.justified,
            clawback_amount: s.amount,
            cap: s.cap,
            funded_from_holdback: from_holdback,
            lp_irr_to_date: irr(self.lp.flows(), IRR_GUESS).ok(),
            gp_irr_to_date: irr(&self.gp_flows, IRR_GUESS).ok(),
        });
        if let (Some(tu), Some(cb)) = (&true_up, self.clawback.as_mut()) {
            cb.record(tu.clone());
        }

        tracing::debug!(
            event = event.index,
            t = %t,
            gross = %gross,
            fee = %fee,
            promote = %promote,
            "distribution event processed"
        );

        Ok(EventResult {
            index: event.index,
            kind: EventKind::Distribution,
            time_offset_years: t,
            label: event.label.clone(),
            amount: gross,
            lp_contribution: Decimal::ZERO,
            gp_contribution: Decimal::ZERO,
            management_fee: fee,
            distributable,
            steps,
            tier_allocations,
            gp_promote_earned: promote,
            gp_promote_withheld: withheld,
            gp_promote_released: released,
            lp_cash,
            gp_cash,
            lp_ledger: self.lp_pref.ledger(),
            gp_ledger: self.gp_pref.ledger(),
            true_up,
        })
    }

    fn finish(self, warnings: &mut Vec<String>) -> EngineResult<WaterfallResult> {
        let lp = pool_result(
            "LP",
            self.lp.flows(),
            self.lp.contributed(),
            self.lp.distributed(),
            warnings,
        );
        let gp = pool_result(
            "GP",
            &self.gp_flows,
            self.gp_contributed,
            self.gp_received,
            warnings,
        );
        let project = PoolResult {
            irr: Some(irr(&self.project_flows, IRR_GUESS)?),
            equity_multiple: equity_multiple(self.project_contributed, self.project_distributed),
            total_contributed: self.project_contributed,
            total_distributed: self.project_distributed,
            profit: self.project_distributed - self.project_contributed,
        };

        let mut tier_results: Vec<TierResult> = self
            .step_totals
            .iter()
            .filter(|s| s.step != WaterfallStep::PromoteTiers)
            .map(|s| TierResult {
                tier_name: s.step.label().to_string(),
                lp_distribution: s.to_lp,
                gp_distribution: s.to_gp,
                gp_promote_in_tier: if s.step == WaterfallStep::CatchUp {
                    self.catch_up_promote
                } else {
                    Decimal::ZERO
                },
            })
            .collect();
        tier_results.extend(self.terms.tiers.iter().zip(&self.tier_states).map(|(tier, state)| {
            TierResult {
                tier_name: tier.name.clone(),
                lp_distribution: state.lp_distributed,
                gp_distribution: state.gp_distributed,
                gp_promote_in_tier: state.gp_promote,
            }
        }));

        let (management_fees_paid, management_fees_unpaid) = self
            .fees
            .as_ref()
            .map_or((Decimal::ZERO, Decimal::ZERO), |f| (f.paid(), f.accrued_unpaid()));
        if management_fees_unpaid > Decimal::ZERO {
            warnings.push(format!(
                "Management fees of {management_fees_unpaid} accrued but were not covered \
                 by distributions"
            ));
        }
        let lp_unpaid = self.lp_pref.ledger().unpaid_preferred();
        if lp_unpaid > Decimal::ZERO {
            warnings.push(format!("LP preferred return of {lp_unpaid} remains unpaid"));
        }

        Ok(WaterfallResult {
            final_results: FinalResults { lp, gp, project },
            tier_results,
            events: self.events,
            management_fees_paid,
            management_fees_unpaid,
            total_gp_promote: self.promote_earned,
            clawback: self.clawback.map(ClawbackTracker::into_summary),
        })
    }
}

/// Promote the realized-to-date results support, from a hindsight run paid
/// as earned with every contribution called by the first distribution.
fn justified_promote(
    terms: &WaterfallTerms,
    construction_end: Option<Years>,
    events: &[ResolvedEvent],
    through: usize,
) -> EngineResult<Money> {
    let hindsight = hindsight_events(events, through);
    let as_earned = terms.as_earned();
    let mut cascade = Cascade::new(&as_earned, construction_end);
    cascade.run(&hindsight)?;
    Ok(cascade.promote_earned)
}

fn pool_result(
    pool: &str,
    flows: &[(Years, Money)],
    contributed: Money,
    distributed: Money,
    warnings: &mut Vec<String>,
) -> PoolResult {
    let pool_irr = match irr(flows, IRR_GUESS) {
        Ok(rate) => Some(rate),
        Err(e) => {
            tracing::warn!(pool, error = %e, "pool IRR unavailable");
            warnings.push(format!("{pool} IRR unavailable: {e}"));
            None
        }
    };
    PoolResult {
        irr: pool_irr,
        equity_multiple: equity_multiple(contributed, distributed),
        total_contributed: contributed,
        total_distributed: distributed,
        profit: distributed - contributed,
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run validated terms over a cash-flow schedule.
///
/// Pure: the same terms and schedule always give the same result. Returns
/// the result with any warnings raised along the way.
pub fn run_waterfall(
    terms: &WaterfallTerms,
    schedule: &CashFlowSchedule,
) -> EngineResult<(WaterfallResult, Vec<String>)> {
    let events = resolve_schedule(schedule)?;
    let mut cascade = Cascade::new(terms, schedule.construction_end_years);
    cascade.run(&events)?;

    let mut warnings = Vec::new();
    let result = cascade.finish(&mut warnings)?;
    Ok((result, warnings))
}

/// Validate an authored configuration and run it over a schedule.
///
/// The configuration is checked in full before any cash flow is processed;
/// the envelope's `assumptions` carry it verbatim.
pub fn calculate_waterfall(
    config: &WaterfallConfiguration,
    schedule: &CashFlowSchedule,
) -> EngineResult<ComputationOutput<WaterfallResult>> {
    let start = Instant::now();
    let terms = config.validate()?;
    let (result, warnings) = run_waterfall(&terms, schedule)?;

    let methodology = match terms.structure {
        StructureType::American => "Real-Estate Distribution Waterfall (American)",
        StructureType::European => "Real-Estate Distribution Waterfall (European)",
        StructureType::Hybrid => "Real-Estate Distribution Waterfall (Hybrid)",
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        methodology,
        terms.source(),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
