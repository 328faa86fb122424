use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use waterfall_core::time_value;
use waterfall_core::waterfall::config::{
    FeeBasis, HurdleLogic, PreferredReturnConfig, PromoteTier, StructureType, TrueUpFrequency,
    WaterfallConfiguration, WaterfallTerms,
};
use waterfall_core::waterfall::engine::{
    calculate_waterfall, run_waterfall, EventKind, StepAllocation, WaterfallResult, WaterfallStep,
};
use waterfall_core::{CashFlowEvent, CashFlowSchedule, Money, Party, WaterfallError};

// ===========================================================================
// Fixtures
// ===========================================================================

fn reference_configuration() -> WaterfallConfiguration {
    serde_json::from_value(serde_json::json!({
        "structure_type": "american",
        "capital_structure": { "lp_equity_percent": "90", "gp_equity_percent": "10" },
        "preferred_return": {
            "enabled": true,
            "lp_rate": "8",
            "accrual_type": "cumulative",
            "catch_up_enabled": false
        },
        "promote_tiers": [
            { "tier_number": 1, "name": "Residual", "hurdle_type": "none",
              "lp_share": "80", "gp_share": "20" }
        ],
        "clawback": { "enabled": false }
    }))
    .unwrap()
}

fn reference_schedule() -> CashFlowSchedule {
    CashFlowSchedule::new(vec![
        CashFlowEvent::contribution(dec!(0), dec!(900), Some(Party::Lp)),
        CashFlowEvent::contribution(dec!(0), dec!(100), Some(Party::Gp)),
        CashFlowEvent::distribution(dec!(5), dec!(1400)).with_label("Sale"),
    ])
}

/// Catch-up, three tiers, fees: exercises every step.
fn full_terms(structure: StructureType) -> WaterfallTerms {
    let mut builder = WaterfallConfiguration::builder()
        .structure(structure)
        .capital_structure(dec!(90), dec!(10))
        .preferred_return(PreferredReturnConfig::cumulative(dec!(8)))
        .catch_up(dec!(100), dec!(20))
        .tier(PromoteTier::irr(1, dec!(12), dec!(80), dec!(20)).named("Up to 12% IRR"))
        .tier(PromoteTier::both(2, dec!(18), dec!(2.0), HurdleLogic::Or, dec!(70), dec!(30)))
        .tier(PromoteTier::residual(3, dec!(60), dec!(40)))
        .management_fees(dec!(1), FeeBasis::OutstandingCapital);
    if structure == StructureType::Hybrid {
        builder = builder.clawback(dec!(30), TrueUpFrequency::AtExit);
    }
    builder.build().unwrap()
}

fn staged_schedule(exit: Money) -> CashFlowSchedule {
    CashFlowSchedule::new(vec![
        CashFlowEvent::contribution(dec!(0), dec!(6000), None),
        CashFlowEvent::contribution(dec!(0.5), dec!(4000), None),
        CashFlowEvent::distribution(dec!(1), dec!(600)),
        CashFlowEvent::distribution(dec!(2), dec!(900)),
        CashFlowEvent::distribution(dec!(3), dec!(12000)).with_label("Refinance"),
        CashFlowEvent::distribution(dec!(5), exit),
    ])
}

fn step(result: &WaterfallResult, event: usize, step: WaterfallStep) -> StepAllocation {
    result.events[event]
        .steps
        .iter()
        .find(|s| s.step == step)
        .cloned()
        .unwrap()
}

fn approx(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} within {tolerance}, got {actual}"
    );
}

// ===========================================================================
// Reference scenario
// ===========================================================================

#[test]
fn test_reference_scenario() {
    let out = calculate_waterfall(&reference_configuration(), &reference_schedule()).unwrap();
    let result = &out.result;

    // 900 * 8% * 5
    assert_eq!(step(result, 2, WaterfallStep::PreferredReturnLp).to_lp, dec!(360));
    // 1400 - 1000 - 360 = 40, split 80/20
    assert_eq!(step(result, 2, WaterfallStep::PromoteTiers).to_lp, dec!(32));
    assert_eq!(step(result, 2, WaterfallStep::PromoteTiers).to_gp, dec!(8));

    let lp = &result.final_results.lp;
    assert_eq!(lp.total_contributed, dec!(900));
    assert_eq!(lp.total_distributed, dec!(1292));
    assert_eq!(lp.profit, dec!(392));
    approx(
        dec!(900) * (Decimal::ONE + lp.irr.unwrap()).powi(5),
        dec!(1292),
        dec!(0.00001),
    );

    let project = &result.final_results.project;
    approx(
        dec!(1000) * (Decimal::ONE + project.irr.unwrap()).powi(5),
        dec!(1400),
        dec!(0.00001),
    );
    assert_eq!(project.equity_multiple, Some(dec!(1.4)));

    assert_eq!(result.tier_results.last().unwrap().tier_name, "Residual");
    assert_eq!(out.assumptions, serde_json::to_value(reference_configuration()).unwrap());
    assert_eq!(out.methodology, "Real-Estate Distribution Waterfall (American)");
}

#[test]
fn test_single_flow_irr_identity() {
    for (c, d, years) in [(dec!(1000), dec!(1400), 5i64), (dec!(5000), dec!(4200), 3i64)] {
        let flows = [(Decimal::ZERO, -c), (Decimal::from(years), d)];
        let r = time_value::irr(&flows, dec!(0.1)).unwrap();
        approx(c * (Decimal::ONE + r).powi(years), d, dec!(0.00001));
    }

    // fractional horizon: the solved rate zeroes the NPV
    let flows = [(Decimal::ZERO, dec!(-250)), (dec!(1.5), dec!(310))];
    let r = time_value::irr(&flows, dec!(0.1)).unwrap();
    assert!(time_value::npv_at(r, &flows).unwrap().abs() < time_value::NPV_TOLERANCE);
}

#[test]
fn test_clawback_absent_when_disabled() {
    let out = calculate_waterfall(&reference_configuration(), &reference_schedule()).unwrap();
    assert!(out.result.clawback.is_none());
    let json = serde_json::to_value(&out.result).unwrap();
    assert!(json.get("clawback").is_none());
}

#[test]
fn test_configuration_checked_before_cash_flows() {
    let mut config = reference_configuration();
    config.promote_tiers = vec![
        PromoteTier::residual(1, dec!(80), dec!(20)),
        PromoteTier::irr(2, dec!(15), dec!(70), dec!(30)),
    ];
    // the schedule is also invalid; the configuration error must win
    let err = calculate_waterfall(&config, &CashFlowSchedule::default()).unwrap_err();
    assert!(err.is_configuration(), "got {err:?}");
    match err {
        WaterfallError::Configuration { field, .. } => {
            assert_eq!(field, "promote_tiers[0].hurdle_type")
        }
        other => panic!("Expected Configuration error, got: {other:?}"),
    }
}

// ===========================================================================
// Catch-up and tiers
// ===========================================================================

#[test]
fn test_full_catch_up() {
    let terms = WaterfallConfiguration::builder()
        .capital_structure(dec!(90), dec!(10))
        .preferred_return(PreferredReturnConfig::cumulative(dec!(8)))
        .catch_up(dec!(100), dec!(20))
        .tier(PromoteTier::residual(1, dec!(80), dec!(20)))
        .build()
        .unwrap();
    let schedule = CashFlowSchedule::new(vec![
        CashFlowEvent::contribution(dec!(0), dec!(1000), None),
        CashFlowEvent::distribution(dec!(1), dec!(1500)),
    ]);
    let (result, _) = run_waterfall(&terms, &schedule).unwrap();

    // LP pref 900 * 8% = 72; catch-up 0.2 / 0.8 * 72 = 18
    assert_eq!(step(&result, 1, WaterfallStep::PreferredReturnLp).to_lp, dec!(72));
    assert_eq!(step(&result, 1, WaterfallStep::CatchUp).to_gp, dec!(18));
    assert_eq!(step(&result, 1, WaterfallStep::PromoteTiers).total(), dec!(410));

    let catch_up_row = &result.tier_results[3];
    assert_eq!(catch_up_row.tier_name, "GP Catch-Up");
    // 18 less the GP's 10% pro-rata share of 18
    assert_eq!(catch_up_row.gp_promote_in_tier, dec!(16.2));
}

#[test]
fn test_irr_tier_boundary() {
    let terms = WaterfallConfiguration::builder()
        .capital_structure(dec!(100), dec!(0))
        .tier(PromoteTier::irr(1, dec!(12), dec!(80), dec!(20)))
        .tier(PromoteTier::residual(2, dec!(70), dec!(30)))
        .build()
        .unwrap();
    let schedule = CashFlowSchedule::new(vec![
        CashFlowEvent::contribution(dec!(0), dec!(1000), None),
        CashFlowEvent::distribution(dec!(2), dec!(2000)),
    ]);
    let (result, _) = run_waterfall(&terms, &schedule).unwrap();

    // LP needs 1254.4 back at t=2 for 12%; 254.4 of it from tier 1 at 80%
    let tier1 = &result.tier_results[4];
    approx(tier1.lp_distribution, dec!(254.4), dec!(0.00001));
    approx(tier1.lp_distribution + tier1.gp_distribution, dec!(318), dec!(0.00001));
    let tier2 = &result.tier_results[5];
    approx(tier2.lp_distribution + tier2.gp_distribution, dec!(682), dec!(0.00001));
    assert!(result.final_results.lp.irr.unwrap() > dec!(0.12));
    assert!(result.events[1].tier_allocations[0].hurdle_crossed);
}

#[test]
fn test_construction_period_excluded_from_accrual() {
    let mut pref = PreferredReturnConfig::cumulative(dec!(8));
    pref.accrues_during_construction = false;
    let terms = WaterfallConfiguration::builder()
        .capital_structure(dec!(90), dec!(10))
        .preferred_return(pref)
        .tier(PromoteTier::residual(1, dec!(80), dec!(20)))
        .build()
        .unwrap();
    let mut schedule = reference_schedule();
    schedule.construction_end_years = Some(dec!(2));
    let (result, _) = run_waterfall(&terms, &schedule).unwrap();
    // three post-construction years on 900
    assert_eq!(step(&result, 2, WaterfallStep::PreferredReturnLp).to_lp, dec!(216));
}

#[test]
fn test_dated_schedule() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let dated = |y: i32, amount: Money| CashFlowEvent {
        time_offset_years: None,
        date: NaiveDate::from_ymd_opt(y, 1, 1),
        amount,
        party: None,
        label: None,
    };
    let mut schedule =
        CashFlowSchedule::new(vec![dated(2024, dec!(-1000)), dated(2027, dec!(1300))]);
    schedule.start_date = Some(start);

    let out = calculate_waterfall(&reference_configuration(), &schedule).unwrap();
    let exit = &out.result.events[1];
    // 2024-01-01 to 2027-01-01 is 1096 days
    assert_eq!(exit.time_offset_years, dec!(1096) / dec!(365.25));
    assert_eq!(exit.kind, EventKind::Distribution);
}

// ===========================================================================
// Properties
// ===========================================================================

#[test]
fn test_conservation_every_event() {
    for structure in [StructureType::American, StructureType::European, StructureType::Hybrid] {
        let (result, _) =
            run_waterfall(&full_terms(structure), &staged_schedule(dec!(14000))).unwrap();
        let mut gross = Decimal::ZERO;
        for event in result.events.iter().filter(|e| e.kind == EventKind::Distribution) {
            let allocated: Money = event.steps.iter().map(StepAllocation::total).sum();
            assert_eq!(allocated, event.distributable, "event {}", event.index);
            assert_eq!(event.distributable + event.management_fee, event.amount);
            gross += event.amount;
        }
        let lp = &result.final_results.lp;
        let gp = &result.final_results.gp;
        assert_eq!(
            lp.total_distributed + gp.total_distributed + result.management_fees_paid,
            gross,
            "{structure:?}"
        );
        let tier_total: Money = result
            .tier_results
            .iter()
            .map(|t| t.lp_distribution + t.gp_distribution)
            .sum();
        assert_eq!(tier_total + result.management_fees_paid, gross);
    }
}

#[test]
fn test_lp_gp_share_sum_to_one() {
    let terms = full_terms(StructureType::American);
    for tier in &terms.tiers {
        assert_eq!(tier.lp_share + tier.gp_share, Decimal::ONE);
    }
}

#[test]
fn test_more_cash_never_pays_less() {
    let terms = full_terms(StructureType::American);
    let mut previous: Option<(Money, Money)> = None;
    for step_cash in 0..12 {
        let exit = dec!(6000) + Decimal::from(step_cash) * dec!(750);
        let (result, _) = run_waterfall(&terms, &staged_schedule(exit)).unwrap();
        let lp = result.final_results.lp.total_distributed;
        let gp = result.final_results.gp.total_distributed;
        if let Some((prev_lp, prev_gp)) = previous {
            assert!(lp >= prev_lp, "LP fell from {prev_lp} to {lp} at exit {exit}");
            assert!(gp >= prev_gp, "GP fell from {prev_gp} to {gp} at exit {exit}");
        }
        previous = Some((lp, gp));
    }
}

#[test]
fn test_deterministic() {
    let terms = full_terms(StructureType::Hybrid);
    let (first, w1) = run_waterfall(&terms, &staged_schedule(dec!(12500))).unwrap();
    let (second, w2) = run_waterfall(&terms, &staged_schedule(dec!(12500))).unwrap();
    assert_eq!(first, second);
    assert_eq!(w1, w2);
}

// ===========================================================================
// Structure types
// ===========================================================================

#[test]
fn test_european_defers_promote_to_exit() {
    let schedule = staged_schedule(dec!(14000));
    let american = run_waterfall(&full_terms(StructureType::American), &schedule).unwrap().0;
    let european = run_waterfall(&full_terms(StructureType::European), &schedule).unwrap().0;

    // identical allocations, different timing
    assert_eq!(american.tier_results, european.tier_results);
    assert_eq!(american.total_gp_promote, european.total_gp_promote);
    assert_eq!(
        american.final_results.gp.total_distributed,
        european.final_results.gp.total_distributed
    );

    let interim_withheld: Money = european.events[..5].iter().map(|e| e.gp_promote_withheld).sum();
    assert!(interim_withheld > Decimal::ZERO);
    let exit = european.events.last().unwrap();
    assert_eq!(
        exit.gp_promote_released,
        interim_withheld + exit.gp_promote_withheld
    );
    assert!(european.final_results.gp.irr.unwrap() < american.final_results.gp.irr.unwrap());
}

// ===========================================================================
// Clawback
// ===========================================================================

fn late_call_terms(structure: StructureType, escrow: Decimal) -> WaterfallTerms {
    WaterfallConfiguration::builder()
        .structure(structure)
        .capital_structure(dec!(100), dec!(0))
        .tier(PromoteTier::irr(1, dec!(15), dec!(100), dec!(0)))
        .tier(PromoteTier::residual(2, dec!(80), dec!(20)))
        .clawback(escrow, TrueUpFrequency::AtExit)
        .build()
        .unwrap()
}

/// Promote is paid on the first sale before the second capital call lands.
fn late_call_schedule() -> CashFlowSchedule {
    CashFlowSchedule::new(vec![
        CashFlowEvent::contribution(dec!(0), dec!(1000), None),
        CashFlowEvent::distribution(dec!(1), dec!(1500)),
        CashFlowEvent::contribution(dec!(2), dec!(1000), None),
        CashFlowEvent::distribution(dec!(3), dec!(1100)),
    ])
}

#[test]
fn test_clawback_after_late_capital_call() {
    let terms = late_call_terms(StructureType::American, dec!(100));
    let (result, _) = run_waterfall(&terms, &late_call_schedule()).unwrap();

    // 70 at the first sale, 20 at exit
    assert_eq!(result.total_gp_promote, dec!(90));
    let summary = result.clawback.unwrap();
    assert_eq!(summary.true_ups.len(), 1);
    let true_up = &summary.true_ups[0];
    assert_eq!(true_up.event_index, 3);
    // hindsight: both calls by t=1, tier 1 takes 359.625 at exit, GP gets 20% of 240.375
    approx(true_up.gp_promote_justified, dec!(48.075), dec!(0.0001));
    approx(summary.clawback_amount, dec!(41.925), dec!(0.0001));
    assert!(summary.clawback_amount <= true_up.cap);

    let lp = &result.final_results.lp;
    let gp = &result.final_results.gp;
    assert_eq!(lp.total_distributed + gp.total_distributed, dec!(2600));
    assert_eq!(gp.total_distributed, dec!(90) - summary.clawback_amount);
    assert!(true_up.lp_irr_to_date.is_some());
}

#[test]
fn test_clawback_capped_by_escrow() {
    let terms = late_call_terms(StructureType::American, dec!(25));
    let (result, _) = run_waterfall(&terms, &late_call_schedule()).unwrap();
    let summary = result.clawback.unwrap();
    // 25% of 90
    assert_eq!(summary.true_ups[0].cap, dec!(22.5));
    assert_eq!(summary.clawback_amount, dec!(22.5));
}

#[test]
fn test_hybrid_clawback_funded_from_escrow() {
    let terms = late_call_terms(StructureType::Hybrid, dec!(50));
    let (result, _) = run_waterfall(&terms, &late_call_schedule()).unwrap();
    let summary = result.clawback.unwrap();
    let true_up = &summary.true_ups[0];
    assert_eq!(true_up.funded_from_holdback, summary.clawback_amount);

    // 35 held at the first sale, 10 at exit; what the clawback leaves is released
    assert_eq!(result.events[1].gp_promote_withheld, dec!(35));
    let exit = &result.events[3];
    assert_eq!(exit.gp_promote_released, dec!(45) - summary.clawback_amount);
    approx(result.final_results.gp.total_distributed, dec!(48.075), dec!(0.0001));
}

#[test]
fn test_every_distribution_true_ups() {
    let terms = WaterfallConfiguration::builder()
        .capital_structure(dec!(100), dec!(0))
        .tier(PromoteTier::irr(1, dec!(15), dec!(100), dec!(0)))
        .tier(PromoteTier::residual(2, dec!(80), dec!(20)))
        .clawback(dec!(100), TrueUpFrequency::EveryDistribution)
        .build()
        .unwrap();
    let (result, _) = run_waterfall(&terms, &late_call_schedule()).unwrap();
    let summary = result.clawback.unwrap();
    let indices: Vec<usize> = summary.true_ups.iter().map(|t| t.event_index).collect();
    assert_eq!(indices, vec![1, 3]);
    // nothing to claw back before the late call
    assert_eq!(summary.true_ups[0].clawback_amount, Decimal::ZERO);
}
