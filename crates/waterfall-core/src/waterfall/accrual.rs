use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::{AccrualType, PaymentFrequency, PreferredTerms};
use crate::types::*;

/// Capital and preferred-return position of one pool at a point in time.
///
/// Every cumulative field only grows; the outstanding balances are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferredReturnLedger {
    pub contributed_capital: Money,
    pub returned_capital: Money,
    pub accrued_preferred: Money,
    pub paid_preferred: Money,
    /// Non-cumulative accrual lost at period ends
    pub forfeited_preferred: Money,
}

impl PreferredReturnLedger {
    pub fn outstanding_principal(&self) -> Money {
        self.contributed_capital - self.returned_capital
    }

    pub fn unpaid_preferred(&self) -> Money {
        self.accrued_preferred - self.paid_preferred - self.forfeited_preferred
    }
}

/// Accrues the preferred return of a single capital pool over time.
#[derive(Debug, Clone)]
pub struct AccrualTracker {
    rate: Rate,
    accrual: AccrualType,
    frequency: PaymentFrequency,
    accrues_during_construction: bool,
    construction_end: Option<Years>,
    ledger: PreferredReturnLedger,
    as_of: Years,
    last_boundary_closed: Option<u64>,
}

impl AccrualTracker {
    pub fn new(rate: Rate, terms: &PreferredTerms, construction_end: Option<Years>) -> Self {
        Self {
            rate,
            accrual: terms.accrual,
            frequency: terms.frequency,
            accrues_during_construction: terms.accrues_during_construction,
            construction_end,
            ledger: PreferredReturnLedger::default(),
            as_of: Decimal::ZERO,
            last_boundary_closed: None,
        }
    }

    /// Tracks capital only; nothing ever accrues.
    pub fn capital_only() -> Self {
        Self {
            rate: Decimal::ZERO,
            accrual: AccrualType::Cumulative,
            frequency: PaymentFrequency::AtDistribution,
            accrues_during_construction: true,
            construction_end: None,
            ledger: PreferredReturnLedger::default(),
            as_of: Decimal::ZERO,
            last_boundary_closed: None,
        }
    }

    pub fn ledger(&self) -> PreferredReturnLedger {
        self.ledger
    }

    pub fn as_of(&self) -> Years {
        self.as_of
    }

    /// Accrue from the last accrual point to `t`, closing any payment-period
    /// boundaries passed on the way.
    pub fn accrue_to(&mut self, t: Years) {
        if t <= self.as_of {
            return;
        }

        let mut cursor = self.as_of;
        if let Some(n) = self.frequency.periods_per_year() {
            let per_year = Decimal::from(n);
            let mut k = (cursor * per_year).floor().to_u64().unwrap_or(0);
            loop {
                let boundary = Decimal::from(k) / per_year;
                if boundary >= t {
                    break;
                }
                if boundary >= cursor && self.last_boundary_closed.map_or(true, |last| k > last) {
                    self.accrue_segment(cursor, boundary);
                    cursor = boundary;
                    self.close_period();
                    self.last_boundary_closed = Some(k);
                }
                k += 1;
            }
        }

        self.accrue_segment(cursor, t);
        self.as_of = t;
    }

    fn accrue_segment(&mut self, from: Years, to: Years) {
        if to <= from || self.rate.is_zero() {
            return;
        }
        let mut fraction = to - from;
        if !self.accrues_during_construction {
            if let Some(end) = self.construction_end {
                let overlap = (end.min(to) - from).max(Decimal::ZERO);
                fraction -= overlap;
            }
        }
        if fraction <= Decimal::ZERO {
            return;
        }

        let base = match self.accrual {
            AccrualType::Cumulative | AccrualType::NonCumulative => {
                self.ledger.outstanding_principal()
            }
            AccrualType::Compounding => {
                self.ledger.outstanding_principal() + self.ledger.unpaid_preferred()
            }
        };
        if base > Decimal::ZERO {
            self.ledger.accrued_preferred += base * self.rate * fraction;
        }
    }

    /// Non-cumulative accrual left unpaid at a period end is forfeited.
    fn close_period(&mut self) {
        if self.accrual == AccrualType::NonCumulative {
            let unpaid = self.ledger.unpaid_preferred();
            if unpaid > Decimal::ZERO {
                self.ledger.forfeited_preferred += unpaid;
            }
        }
    }

    /// Called after the preferred step of a distribution event; closes the
    /// period when periods end at distributions.
    pub fn close_distribution(&mut self) {
        if self.frequency == PaymentFrequency::AtDistribution {
            self.close_period();
        }
    }

    pub fn contribute(&mut self, amount: Money) {
        self.ledger.contributed_capital += amount.abs();
    }

    /// Returns capital up to the outstanding principal; yields the amount applied.
    pub fn return_capital(&mut self, amount: Money) -> Money {
        let applied = amount.min(self.ledger.outstanding_principal()).max(Decimal::ZERO);
        self.ledger.returned_capital += applied;
        applied
    }

    /// Pays preferred up to the unpaid balance; yields the amount applied.
    /// Any excess stays with the caller for the next cascade step.
    pub fn pay_preferred(&mut self, available: Money) -> Money {
        let applied = available.min(self.ledger.unpaid_preferred()).max(Decimal::ZERO);
        self.ledger.paid_preferred += applied;
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn terms(accrual: AccrualType, frequency: PaymentFrequency) -> PreferredTerms {
        PreferredTerms {
            lp_rate: dec!(0.08),
            gp_rate: None,
            accrual,
            frequency,
            accrues_during_construction: true,
        }
    }

    #[test]
    fn test_simple_cumulative_accrual() {
        let mut tracker = AccrualTracker::new(
            dec!(0.08),
            &terms(AccrualType::Cumulative, PaymentFrequency::AtDistribution),
            None,
        );
        tracker.contribute(dec!(900));
        tracker.accrue_to(dec!(5));
        // 900 * 8% * 5
        assert_eq!(tracker.ledger().accrued_preferred, dec!(360));
        assert_eq!(tracker.ledger().unpaid_preferred(), dec!(360));
    }

    #[test]
    fn test_cumulative_ignores_calendar_frequency() {
        let mut tracker = AccrualTracker::new(
            dec!(0.08),
            &terms(AccrualType::Cumulative, PaymentFrequency::Quarterly),
            None,
        );
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(2));
        assert_eq!(tracker.ledger().accrued_preferred, dec!(160));
    }

    #[test]
    fn test_compounding_annual() {
        let mut tracker = AccrualTracker::new(
            dec!(0.08),
            &terms(AccrualType::Compounding, PaymentFrequency::Annually),
            None,
        );
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(2));
        // 80 in year one, then 1080 * 8% = 86.4
        assert_eq!(tracker.ledger().accrued_preferred, dec!(166.4));
    }

    #[test]
    fn test_non_cumulative_forfeits_at_period_end() {
        let mut tracker = AccrualTracker::new(
            dec!(0.08),
            &terms(AccrualType::NonCumulative, PaymentFrequency::Quarterly),
            None,
        );
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(1));
        let ledger = tracker.ledger();
        // three closed quarters of 20 each; the fourth is still open
        assert_eq!(ledger.forfeited_preferred, dec!(60));
        assert_eq!(ledger.unpaid_preferred(), dec!(20));

        assert_eq!(tracker.pay_preferred(dec!(50)), dec!(20));
        tracker.accrue_to(dec!(1.25));
        // boundary at 1.0 closes with nothing unpaid
        assert_eq!(tracker.ledger().forfeited_preferred, dec!(60));
        assert_eq!(tracker.ledger().unpaid_preferred(), dec!(20));
    }

    #[test]
    fn test_non_cumulative_at_distribution() {
        let mut tracker = AccrualTracker::new(
            dec!(0.10),
            &terms(AccrualType::NonCumulative, PaymentFrequency::AtDistribution),
            None,
        );
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(1));
        assert_eq!(tracker.pay_preferred(dec!(60)), dec!(60));
        tracker.close_distribution();
        assert_eq!(tracker.ledger().forfeited_preferred, dec!(40));
        assert_eq!(tracker.ledger().unpaid_preferred(), Decimal::ZERO);
    }

    #[test]
    fn test_construction_period_excluded() {
        let mut t = terms(AccrualType::Cumulative, PaymentFrequency::AtDistribution);
        t.accrues_during_construction = false;
        let mut tracker = AccrualTracker::new(dec!(0.08), &t, Some(dec!(1.5)));
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(1));
        assert_eq!(tracker.ledger().accrued_preferred, Decimal::ZERO);
        tracker.accrue_to(dec!(3));
        // only 1.5 years after construction accrue
        assert_eq!(tracker.ledger().accrued_preferred, dec!(120));
    }

    #[test]
    fn test_payment_capped_at_unpaid() {
        let mut tracker = AccrualTracker::new(
            dec!(0.08),
            &terms(AccrualType::Cumulative, PaymentFrequency::AtDistribution),
            None,
        );
        tracker.contribute(dec!(100));
        tracker.accrue_to(dec!(1));
        assert_eq!(tracker.pay_preferred(dec!(50)), dec!(8));
        assert_eq!(tracker.pay_preferred(dec!(50)), Decimal::ZERO);
        assert_eq!(tracker.ledger().unpaid_preferred(), Decimal::ZERO);
    }

    #[test]
    fn test_return_of_capital_reduces_accrual_base() {
        let mut tracker = AccrualTracker::new(
            dec!(0.10),
            &terms(AccrualType::Cumulative, PaymentFrequency::AtDistribution),
            None,
        );
        tracker.contribute(dec!(1000));
        tracker.accrue_to(dec!(1));
        assert_eq!(tracker.return_capital(dec!(600)), dec!(600));
        tracker.accrue_to(dec!(2));
        // 100 + 400 * 10%
        assert_eq!(tracker.ledger().accrued_preferred, dec!(140));
        assert_eq!(tracker.return_capital(dec!(1000)), dec!(400));
        assert_eq!(tracker.ledger().outstanding_principal(), Decimal::ZERO);
    }

    #[test]
    fn test_capital_only_never_accrues() {
        let mut tracker = AccrualTracker::capital_only();
        tracker.contribute(dec!(500));
        tracker.accrue_to(dec!(10));
        assert_eq!(tracker.ledger().accrued_preferred, Decimal::ZERO);
        assert_eq!(tracker.ledger().contributed_capital, dec!(500));
    }
}
