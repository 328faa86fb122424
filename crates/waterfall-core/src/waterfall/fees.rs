use rust_decimal::Decimal;

use super::config::{FeeBasis, FeeTerms};
use crate::types::*;

/// Management fee owed to the sponsor, taken off gross cash before the
/// waterfall runs.
#[derive(Debug, Clone)]
pub struct FeeTracker {
    terms: FeeTerms,
    as_of: Years,
    accrued_unpaid: Money,
    paid: Money,
}

impl FeeTracker {
    pub fn new(terms: FeeTerms) -> Self {
        Self {
            terms,
            as_of: Decimal::ZERO,
            accrued_unpaid: Decimal::ZERO,
            paid: Decimal::ZERO,
        }
    }

    /// Accrue capital-based fees from the last accrual point to `t`.
    pub fn accrue_to(&mut self, t: Years, contributed: Money, outstanding: Money) {
        if t <= self.as_of {
            return;
        }
        let basis = match self.terms.basis {
            FeeBasis::ContributedCapital => contributed,
            FeeBasis::OutstandingCapital => outstanding,
            FeeBasis::GrossDistributions => Decimal::ZERO,
        };
        if basis > Decimal::ZERO {
            self.accrued_unpaid += basis * self.terms.rate * (t - self.as_of);
        }
        self.as_of = t;
    }

    /// Fee taken from one event's gross cash; never more than the cash.
    pub fn deduct(&mut self, gross: Money) -> Money {
        if gross <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let fee = match self.terms.basis {
            FeeBasis::GrossDistributions => gross * self.terms.rate,
            FeeBasis::ContributedCapital | FeeBasis::OutstandingCapital => {
                let fee = self.accrued_unpaid.min(gross);
                self.accrued_unpaid -= fee;
                fee
            }
        };
        self.paid += fee;
        fee
    }

    pub fn paid(&self) -> Money {
        self.paid
    }

    /// Capital-based fees accrued but not yet covered by distributions.
    pub fn accrued_unpaid(&self) -> Money {
        self.accrued_unpaid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_on_contributed_capital() {
        let mut fees = FeeTracker::new(FeeTerms {
            rate: dec!(0.01),
            basis: FeeBasis::ContributedCapital,
        });
        fees.accrue_to(dec!(2), dec!(1000), dec!(1000));
        assert_eq!(fees.deduct(dec!(500)), dec!(20));
        assert_eq!(fees.paid(), dec!(20));
    }

    #[test]
    fn test_unpaid_fee_carries_forward() {
        let mut fees = FeeTracker::new(FeeTerms {
            rate: dec!(0.02),
            basis: FeeBasis::OutstandingCapital,
        });
        fees.accrue_to(dec!(1), dec!(1000), dec!(1000));
        assert_eq!(fees.deduct(dec!(5)), dec!(5));
        assert_eq!(fees.accrued_unpaid(), dec!(15));
        fees.accrue_to(dec!(2), dec!(1000), dec!(0));
        assert_eq!(fees.deduct(dec!(100)), dec!(15));
    }

    #[test]
    fn test_fee_on_gross_distributions() {
        let mut fees = FeeTracker::new(FeeTerms {
            rate: dec!(0.03),
            basis: FeeBasis::GrossDistributions,
        });
        fees.accrue_to(dec!(5), dec!(1000), dec!(1000));
        assert_eq!(fees.deduct(dec!(200)), dec!(6));
        assert_eq!(fees.deduct(Decimal::ZERO), Decimal::ZERO);
    }
}
