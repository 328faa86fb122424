use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::WaterfallError;
use crate::types::{
    with_metadata, CashFlowSchedule, ComputationOutput, Money, Multiple, Rate, Years,
};
use crate::waterfall::schedule::resolve_schedule;
use crate::EngineResult;

/// Absolute NPV at which a rate is accepted as the IRR.
pub const NPV_TOLERANCE: Decimal = dec!(0.000001);
/// Hard cap on solver iterations (Newton and bisection combined).
pub const MAX_IRR_ITERATIONS: u32 = 200;

const MAX_NEWTON_ITERATIONS: u32 = 50;
const MIN_RATE: Rate = dec!(-0.99);
const MAX_RATE: Rate = dec!(10.0);
const RATE_RESOLUTION: Decimal = dec!(0.000000000000000001);

/// Bracketing grid scanned when Newton-Raphson fails to converge.
const BRACKET_GRID: [Rate; 14] = [
    dec!(-0.99),
    dec!(-0.9),
    dec!(-0.75),
    dec!(-0.5),
    dec!(-0.25),
    dec!(-0.1),
    dec!(0),
    dec!(0.1),
    dec!(0.25),
    dec!(0.5),
    dec!(1),
    dec!(2),
    dec!(5),
    dec!(10),
];

/// `base^t`, using integer powers where possible. `None` on overflow.
pub(crate) fn growth_factor(base: Decimal, t: Years) -> Option<Decimal> {
    if t.is_zero() {
        return Some(Decimal::ONE);
    }
    if t.fract().is_zero() {
        if let Some(n) = t.to_i64() {
            return base.checked_powi(n);
        }
    }
    base.checked_powd(t)
}

/// `cf / (1 + rate)^t`; `None` when the discount factor vanishes or overflows.
fn discounted(one_plus_r: Decimal, t: Years, cf: Money) -> Option<Money> {
    let factor = growth_factor(one_plus_r, t)?;
    if factor.is_zero() {
        return None;
    }
    cf.checked_div(factor)
}

fn npv_checked(rate: Rate, flows: &[(Years, Money)]) -> Option<Money> {
    let one_plus_r = Decimal::ONE + rate;
    flows
        .iter()
        .filter(|(_, cf)| !cf.is_zero())
        .try_fold(Decimal::ZERO, |npv, (t, cf)| {
            npv.checked_add(discounted(one_plus_r, *t, *cf)?)
        })
}

/// NPV and its derivative with respect to the rate. Every operation is
/// checked: near -100% the terms grow past the Decimal range.
fn npv_and_derivative(rate: Rate, flows: &[(Years, Money)]) -> Option<(Money, Money)> {
    let one_plus_r = Decimal::ONE + rate;
    let mut npv = Decimal::ZERO;
    let mut dnpv = Decimal::ZERO;

    for (t, cf) in flows {
        if cf.is_zero() {
            continue;
        }
        let term = discounted(one_plus_r, *t, *cf)?;
        npv = npv.checked_add(term)?;
        let slope = t.checked_mul(term)?.checked_div(one_plus_r)?;
        dnpv = dnpv.checked_sub(slope)?;
    }

    Some((npv, dnpv))
}

/// Net present value of time-offset cash flows at an annual rate.
///
/// Offsets are measured in years; `t = 0` is undiscounted.
pub fn npv_at(rate: Rate, flows: &[(Years, Money)]) -> EngineResult<Money> {
    if rate <= dec!(-1) {
        return Err(WaterfallError::UndefinedIrr(
            "discount rate must be greater than -100%".into(),
        ));
    }
    npv_checked(rate, flows).ok_or_else(|| WaterfallError::DivisionByZero {
            context: format!("NPV discount factor at rate {rate}"),
        })
}

/// Internal Rate of Return for irregularly timed cash flows.
///
/// Newton-Raphson from `guess`, falling back to bisection over a bracket
/// found on a fixed grid between -99% and +1000%. Deterministic and capped
/// at `MAX_IRR_ITERATIONS` evaluations.
pub fn irr(flows: &[(Years, Money)], guess: Rate) -> EngineResult<Rate> {
    let signed: Vec<(Years, Money)> = flows
        .iter()
        .filter(|(_, cf)| !cf.is_zero())
        .copied()
        .collect();

    if signed.len() < 2 {
        return Err(WaterfallError::InsufficientCashFlows(
            "IRR requires at least 2 non-zero cash flows".into(),
        ));
    }
    let has_negative = signed.iter().any(|(_, cf)| cf.is_sign_negative());
    let has_positive = signed.iter().any(|(_, cf)| cf.is_sign_positive());
    if !has_negative || !has_positive {
        return Err(WaterfallError::InsufficientCashFlows(
            "IRR requires at least one negative and one positive cash flow".into(),
        ));
    }

    // IRR is invariant to shifting the time origin; anchoring at the earliest
    // flow keeps exponents small.
    let origin = signed
        .iter()
        .map(|(t, _)| *t)
        .min()
        .unwrap_or(Decimal::ZERO);
    let shifted: Vec<(Years, Money)> = signed.iter().map(|(t, cf)| (*t - origin, *cf)).collect();

    let mut iterations = 0u32;
    let mut rate = guess.clamp(MIN_RATE, MAX_RATE);

    while iterations < MAX_NEWTON_ITERATIONS {
        iterations += 1;
        let Some((npv, dnpv)) = npv_and_derivative(rate, &shifted) else {
            break;
        };
        if npv.abs() < NPV_TOLERANCE {
            return Ok(rate);
        }
        if dnpv.is_zero() {
            break;
        }
        // an overflowing step leaves the root to the bracket search
        let Some(next) = npv.checked_div(dnpv).and_then(|step| rate.checked_sub(step)) else {
            break;
        };
        let next = next.clamp(MIN_RATE, MAX_RATE);
        if next == rate {
            break;
        }
        rate = next;
    }

    tracing::trace!(iterations, "newton did not converge, falling back to bisection");
    bisect(&shifted, iterations)
}

fn bisect(flows: &[(Years, Money)], mut iterations: u32) -> EngineResult<Rate> {
    let sampled: Vec<(Rate, Money)> = BRACKET_GRID
        .iter()
        .filter_map(|r| npv_checked(*r, flows).map(|npv| (*r, npv)))
        .collect();

    if let Some((r, _)) = sampled.iter().find(|(_, npv)| npv.abs() < NPV_TOLERANCE) {
        return Ok(*r);
    }

    let bracket = sampled
        .windows(2)
        .find(|w| w[0].1.is_sign_negative() != w[1].1.is_sign_negative());
    let Some(pair) = bracket else {
        return Err(WaterfallError::UndefinedIrr(
            "NPV does not change sign between -99% and +1000%".into(),
        ));
    };

    let (mut lo, mut npv_lo) = pair[0];
    let (mut hi, _) = pair[1];
    let mut last_npv = npv_lo;

    while iterations < MAX_IRR_ITERATIONS {
        iterations += 1;
        let mid = (lo + hi) / dec!(2);
        let Some(npv_mid) = npv_checked(mid, flows) else {
            return Err(WaterfallError::NoConvergence {
                function: "IRR".into(),
                iterations,
                last_npv,
            });
        };
        last_npv = npv_mid;
        if npv_mid.abs() < NPV_TOLERANCE || (hi - lo).abs() < RATE_RESOLUTION {
            return Ok(mid);
        }
        if npv_mid.is_sign_negative() == npv_lo.is_sign_negative() {
            lo = mid;
            npv_lo = npv_mid;
        } else {
            hi = mid;
        }
    }

    Err(WaterfallError::NoConvergence {
        function: "IRR".into(),
        iterations,
        last_npv,
    })
}

/// Distributions over contributions; `None` when nothing was contributed.
pub fn equity_multiple(total_contributed: Money, total_distributed: Money) -> Option<Decimal> {
    if total_contributed.is_zero() {
        None
    } else {
        Some(total_distributed / total_contributed)
    }
}

/// Standalone return metrics for a single cash-flow schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrAnalysis {
    pub irr: Rate,
    pub equity_multiple: Option<Multiple>,
    pub total_contributed: Money,
    pub total_distributed: Money,
    pub holding_period_years: Years,
}

/// IRR and multiple of a schedule, without any LP/GP split.
pub fn calculate_irr(schedule: &CashFlowSchedule) -> EngineResult<ComputationOutput<IrrAnalysis>> {
    let start = Instant::now();
    let events = resolve_schedule(schedule)?;
    let flows: Vec<(Years, Money)> = events.iter().map(|e| (e.time, e.amount)).collect();

    let rate = irr(&flows, dec!(0.10))?;
    let total_contributed: Money = flows
        .iter()
        .filter(|(_, cf)| *cf < Decimal::ZERO)
        .map(|(_, cf)| -*cf)
        .sum();
    let total_distributed: Money = flows
        .iter()
        .filter(|(_, cf)| *cf > Decimal::ZERO)
        .map(|(_, cf)| *cf)
        .sum();
    let first = flows.first().map(|(t, _)| *t).unwrap_or_default();
    let last = flows.last().map(|(t, _)| *t).unwrap_or_default();

    let analysis = IrrAnalysis {
        irr: rate,
        equity_multiple: equity_multiple(total_contributed, total_distributed),
        total_contributed,
        total_distributed,
        holding_period_years: last - first,
    };

    Ok(with_metadata(
        "Internal Rate of Return (Newton-Raphson with bisection fallback)",
        schedule,
        Vec::new(),
        start.elapsed().as_micros() as u64,
        analysis,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_npv_basic() {
        let flows = vec![
            (dec!(0), dec!(-1000)),
            (dec!(1), dec!(300)),
            (dec!(2), dec!(400)),
            (dec!(3), dec!(500)),
        ];
        let result = npv_at(dec!(0.10), &flows).unwrap();
        // -1000 + 300/1.1 + 400/1.21 + 500/1.331 ≈ -21.04
        assert!((result - dec!(-21.04)).abs() < dec!(0.01));
    }

    #[test]
    fn test_npv_zero_rate() {
        let flows = vec![(dec!(0), dec!(-100)), (dec!(1), dec!(50)), (dec!(2), dec!(80))];
        assert_eq!(npv_at(dec!(0), &flows).unwrap(), dec!(30));
    }

    #[test]
    fn test_irr_even_annual_flows() {
        let flows = vec![
            (dec!(0), dec!(-1000)),
            (dec!(1), dec!(400)),
            (dec!(2), dec!(400)),
            (dec!(3), dec!(400)),
        ];
        let r = irr(&flows, dec!(0.10)).unwrap();
        // ~9.70%
        assert!((r - dec!(0.0970)).abs() < dec!(0.0005));
        assert!(npv_at(r, &flows).unwrap().abs() < NPV_TOLERANCE);
    }

    #[test]
    fn test_irr_single_contribution_single_distribution() {
        let flows = vec![(dec!(0), dec!(-1000)), (dec!(5), dec!(1610.51))];
        let r = irr(&flows, dec!(0.10)).unwrap();
        let fv = dec!(1000) * (Decimal::ONE + r).powi(5);
        assert!((fv - dec!(1610.51)).abs() < dec!(0.000001), "fv was {fv}");
    }

    #[test]
    fn test_irr_fractional_offsets() {
        let flows = vec![(dec!(0), dec!(-500)), (dec!(2.5), dec!(700))];
        let r = irr(&flows, dec!(0.10)).unwrap();
        // (1.4)^(1/2.5) - 1 ≈ 14.4%
        assert!((r - dec!(0.1441)).abs() < dec!(0.001));
    }

    #[test]
    fn test_irr_shifted_origin_matches() {
        let a = vec![(dec!(0), dec!(-100)), (dec!(3), dec!(150))];
        let b = vec![(dec!(2), dec!(-100)), (dec!(5), dec!(150))];
        let ra = irr(&a, dec!(0.1)).unwrap();
        let rb = irr(&b, dec!(0.1)).unwrap();
        assert!((ra - rb).abs() < dec!(0.0000001));
    }

    #[test]
    fn test_irr_total_loss_is_deeply_negative() {
        let flows = vec![(dec!(0), dec!(-1000)), (dec!(1), dec!(50))];
        let r = irr(&flows, dec!(0.10)).unwrap();
        assert!((r - dec!(-0.95)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_irr_bad_guess_still_converges() {
        let flows = vec![(dec!(0), dec!(-100)), (dec!(1), dec!(300))];
        let r = irr(&flows, dec!(9.5)).unwrap();
        assert!((r - dec!(2)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_irr_requires_two_flows() {
        let err = irr(&[(dec!(0), dec!(-100))], dec!(0.1)).unwrap_err();
        assert!(matches!(err, WaterfallError::InsufficientCashFlows(_)));
    }

    #[test]
    fn test_irr_requires_sign_change() {
        let flows = vec![(dec!(0), dec!(100)), (dec!(1), dec!(100))];
        let err = irr(&flows, dec!(0.1)).unwrap_err();
        assert!(matches!(err, WaterfallError::InsufficientCashFlows(_)));
    }

    #[test]
    fn test_irr_ignores_zero_flows() {
        let flows = vec![(dec!(0), dec!(-100)), (dec!(1), dec!(0))];
        assert!(irr(&flows, dec!(0.1)).is_err());
    }

    #[test]
    fn test_irr_deterministic() {
        let flows = vec![
            (dec!(0), dec!(-750)),
            (dec!(0.5), dec!(-250)),
            (dec!(2), dec!(120)),
            (dec!(4.25), dec!(1400)),
        ];
        assert_eq!(irr(&flows, dec!(0.1)).unwrap(), irr(&flows, dec!(0.1)).unwrap());
    }

    #[test]
    fn test_equity_multiple() {
        assert_eq!(equity_multiple(dec!(100), dec!(250)), Some(dec!(2.5)));
        assert_eq!(equity_multiple(dec!(0), dec!(10)), None);
    }

    #[test]
    fn test_calculate_irr_envelope() {
        let schedule: CashFlowSchedule = serde_json::from_value(serde_json::json!({
            "events": [
                { "time_offset_years": "0", "amount": "-1000" },
                { "time_offset_years": "2", "amount": "200" },
                { "time_offset_years": "4", "amount": "1300" }
            ]
        }))
        .unwrap();
        let out = calculate_irr(&schedule).unwrap();
        assert_eq!(out.result.total_contributed, dec!(1000));
        assert_eq!(out.result.total_distributed, dec!(1500));
        assert_eq!(out.result.equity_multiple, Some(dec!(1.5)));
        assert_eq!(out.result.holding_period_years, dec!(4));
        assert!(out.methodology.contains("Internal Rate of Return"));
    }

    #[test]
    fn test_irr_long_horizon_loss() {
        // Newton jumps to the -99% floor, where the derivative leaves the
        // Decimal range; the bracket search still finds the root.
        let flows = vec![(dec!(0), dec!(-1000)), (dec!(13), dec!(100))];
        let r = irr(&flows, dec!(0.10)).unwrap();
        assert!((r - dec!(-0.16232)).abs() < dec!(0.0001), "irr was {r}");
        assert!(npv_at(r, &flows).unwrap().abs() < dec!(0.00001));
    }

    #[test]
    fn test_npv_at_near_total_loss_rate() {
        let flows = vec![(dec!(0), dec!(-1000)), (dec!(13), dec!(100))];
        let npv = npv_at(dec!(-0.99), &flows).unwrap();
        assert!(npv > dec!(1000000000000000000000000000));
    }

    #[test]
    fn test_irr_multiple_sign_changes() {
        let flows = vec![
            (dec!(0), dec!(-1000)),
            (dec!(1), dec!(1500)),
            (dec!(2), dec!(-1000)),
            (dec!(3), dec!(1100)),
        ];
        let r = irr(&flows, dec!(0.10)).unwrap();
        assert!((r - dec!(0.35957)).abs() < dec!(0.0001), "irr was {r}");
        assert!(npv_at(r, &flows).unwrap().abs() < NPV_TOLERANCE);
    }
}
