use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::CatchUpTerms;
use crate::types::*;

/// Cash consumed by the catch-up step of one distribution event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchUpAllocation {
    pub to_gp: Money,
    /// LP share when the catch-up is less than 100% to the GP
    pub to_lp: Money,
}

impl CatchUpAllocation {
    pub fn total(&self) -> Money {
        self.to_gp + self.to_lp
    }
}

/// GP catch-up still owed:
/// `target / (1 - target) * lp_preferred_paid - gp_catch_up_paid`.
pub fn required_catch_up(
    terms: &CatchUpTerms,
    cumulative_lp_preferred_paid: Money,
    cumulative_gp_catch_up_paid: Money,
) -> Money {
    let ratio = terms.target_share / (Decimal::ONE - terms.target_share);
    ratio * cumulative_lp_preferred_paid - cumulative_gp_catch_up_paid
}

/// Allocate catch-up cash for one event.
///
/// Nothing is allocated until the LP preferred return is fully current. The
/// GP receives `min(required, available * gp_percent, available)`; the LP
/// receives the rest of the cash the step consumes.
pub fn allocate_catch_up(
    terms: &CatchUpTerms,
    cumulative_lp_preferred_paid: Money,
    cumulative_gp_catch_up_paid: Money,
    available: Money,
    lp_preferred_current: bool,
) -> CatchUpAllocation {
    if !lp_preferred_current || available <= Decimal::ZERO {
        return CatchUpAllocation::default();
    }

    let required = required_catch_up(
        terms,
        cumulative_lp_preferred_paid,
        cumulative_gp_catch_up_paid,
    );
    if required <= Decimal::ZERO {
        return CatchUpAllocation::default();
    }

    let consumed = available.min(required / terms.gp_percent);
    let to_gp = (consumed * terms.gp_percent).min(required).min(consumed);
    CatchUpAllocation {
        to_gp,
        to_lp: consumed - to_gp,
    }
}
