use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::WaterfallError;
use crate::types::*;
use crate::EngineResult;

const HUNDRED: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Timing of GP promote payments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    /// Promote paid as earned at each distribution event
    #[default]
    American,
    /// Promote earned before exit is deferred and released at the final distribution
    European,
    /// Promote paid as earned with the clawback escrow share withheld until exit
    Hybrid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccrualType {
    #[default]
    Cumulative,
    NonCumulative,
    Compounding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Monthly,
    Quarterly,
    SemiAnnually,
    Annually,
    #[default]
    AtDistribution,
}

impl PaymentFrequency {
    /// Length of a payment period in years; `None` when periods end at
    /// distribution events.
    pub fn period_years(&self) -> Option<Years> {
        match self {
            PaymentFrequency::Monthly => Some(Decimal::ONE / dec!(12)),
            PaymentFrequency::Quarterly => Some(dec!(0.25)),
            PaymentFrequency::SemiAnnually => Some(dec!(0.5)),
            PaymentFrequency::Annually => Some(Decimal::ONE),
            PaymentFrequency::AtDistribution => None,
        }
    }

    pub(crate) fn periods_per_year(&self) -> Option<u32> {
        match self {
            PaymentFrequency::Monthly => Some(12),
            PaymentFrequency::Quarterly => Some(4),
            PaymentFrequency::SemiAnnually => Some(2),
            PaymentFrequency::Annually => Some(1),
            PaymentFrequency::AtDistribution => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HurdleType {
    #[default]
    None,
    Irr,
    EquityMultiple,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HurdleLogic {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeBasis {
    #[default]
    ContributedCapital,
    OutstandingCapital,
    GrossDistributions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrueUpFrequency {
    EveryDistribution,
    Annually,
    #[default]
    AtExit,
}

// ---------------------------------------------------------------------------
// Authored configuration (percentages 0-100)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalStructure {
    pub lp_equity_percent: Decimal,
    pub gp_equity_percent: Decimal,
    #[serde(default)]
    pub gp_co_invest_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferredReturnConfig {
    pub enabled: bool,
    /// LP preferred rate, percent per annum
    pub lp_rate: Decimal,
    /// GP preferred rate, percent per annum; absent when the GP pool earns none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gp_rate: Option<Decimal>,
    #[serde(default)]
    pub accrual_type: AccrualType,
    #[serde(default)]
    pub payment_frequency: PaymentFrequency,
    #[serde(default)]
    pub catch_up_enabled: bool,
    /// Share of catch-up cash paid to the GP, percent
    #[serde(default = "default_catch_up_percent")]
    pub catch_up_percent: Decimal,
    /// GP share of profit the catch-up targets, percent
    #[serde(default = "default_catch_up_target_share")]
    pub catch_up_target_share: Decimal,
    #[serde(default = "default_true")]
    pub accrues_during_construction: bool,
}

fn default_catch_up_percent() -> Decimal {
    HUNDRED
}

fn default_catch_up_target_share() -> Decimal {
    dec!(20)
}

fn default_true() -> bool {
    true
}

impl PreferredReturnConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            lp_rate: Decimal::ZERO,
            gp_rate: None,
            accrual_type: AccrualType::Cumulative,
            payment_frequency: PaymentFrequency::AtDistribution,
            catch_up_enabled: false,
            catch_up_percent: default_catch_up_percent(),
            catch_up_target_share: default_catch_up_target_share(),
            accrues_during_construction: true,
        }
    }

    /// Simple cumulative LP preferred return at `lp_rate` percent.
    pub fn cumulative(lp_rate: Decimal) -> Self {
        Self {
            enabled: true,
            lp_rate,
            ..Self::disabled()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteTier {
    pub tier_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub hurdle_type: HurdleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hurdle_logic: Option<HurdleLogic>,
    /// LP IRR ceiling of the tier, percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irr_hurdle: Option<Decimal>,
    /// LP equity multiple ceiling of the tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_hurdle: Option<Decimal>,
    pub lp_share: Decimal,
    pub gp_share: Decimal,
}

impl PromoteTier {
    pub fn irr(
        tier_number: u32,
        irr_hurdle: Decimal,
        lp_share: Decimal,
        gp_share: Decimal,
    ) -> Self {
        Self {
            tier_number,
            name: None,
            hurdle_type: HurdleType::Irr,
            hurdle_logic: None,
            irr_hurdle: Some(irr_hurdle),
            multiple_hurdle: None,
            lp_share,
            gp_share,
        }
    }

    pub fn equity_multiple(
        tier_number: u32,
        multiple_hurdle: Decimal,
        lp_share: Decimal,
        gp_share: Decimal,
    ) -> Self {
        Self {
            hurdle_type: HurdleType::EquityMultiple,
            irr_hurdle: None,
            multiple_hurdle: Some(multiple_hurdle),
            ..Self::irr(tier_number, Decimal::ZERO, lp_share, gp_share)
        }
    }

    pub fn both(
        tier_number: u32,
        irr_hurdle: Decimal,
        multiple_hurdle: Decimal,
        logic: HurdleLogic,
        lp_share: Decimal,
        gp_share: Decimal,
    ) -> Self {
        Self {
            hurdle_type: HurdleType::Both,
            hurdle_logic: Some(logic),
            multiple_hurdle: Some(multiple_hurdle),
            ..Self::irr(tier_number, irr_hurdle, lp_share, gp_share)
        }
    }

    /// Unbounded final tier.
    pub fn residual(tier_number: u32, lp_share: Decimal, gp_share: Decimal) -> Self {
        Self {
            hurdle_type: HurdleType::None,
            irr_hurdle: None,
            ..Self::irr(tier_number, Decimal::ZERO, lp_share, gp_share)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementFeeConfig {
    pub enabled: bool,
    /// Percent of basis per annum, or percent of gross cash for `gross_distributions`
    #[serde(default)]
    pub rate: Decimal,
    #[serde(default)]
    pub basis: FeeBasis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClawbackConfig {
    pub enabled: bool,
    /// Share of cumulative promote available to fund a clawback, percent
    #[serde(default)]
    pub escrow_percent: Decimal,
    #[serde(default)]
    pub true_up_frequency: TrueUpFrequency,
}

/// Waterfall configuration as authored by the UI editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallConfiguration {
    #[serde(default)]
    pub structure_type: StructureType,
    pub capital_structure: CapitalStructure,
    pub preferred_return: PreferredReturnConfig,
    pub promote_tiers: Vec<PromoteTier>,
    #[serde(default)]
    pub management_fees: ManagementFeeConfig,
    #[serde(default)]
    pub clawback: ClawbackConfig,
}

// ---------------------------------------------------------------------------
// Validated terms (fractions)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreferredTerms {
    pub lp_rate: Rate,
    pub gp_rate: Option<Rate>,
    pub accrual: AccrualType,
    pub frequency: PaymentFrequency,
    pub accrues_during_construction: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatchUpTerms {
    /// Fraction of catch-up cash paid to the GP
    pub gp_percent: Rate,
    /// GP share of profit targeted
    pub target_share: Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hurdle {
    None,
    Irr { rate: Rate },
    EquityMultiple { multiple: Multiple },
    Both {
        rate: Rate,
        multiple: Multiple,
        logic: HurdleLogic,
    },
}

impl Hurdle {
    pub fn irr_rate(&self) -> Option<Rate> {
        match self {
            Hurdle::Irr { rate } | Hurdle::Both { rate, .. } => Some(*rate),
            _ => None,
        }
    }

    pub fn multiple(&self) -> Option<Multiple> {
        match self {
            Hurdle::EquityMultiple { multiple } | Hurdle::Both { multiple, .. } => Some(*multiple),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierTerms {
    pub tier_number: u32,
    pub name: String,
    pub hurdle: Hurdle,
    pub lp_share: Rate,
    pub gp_share: Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeTerms {
    pub rate: Rate,
    pub basis: FeeBasis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClawbackTerms {
    pub escrow_share: Rate,
    pub frequency: TrueUpFrequency,
}

/// Strongly-typed, fully validated waterfall terms.
///
/// Only obtainable through [`WaterfallConfiguration::validate`] or
/// [`WaterfallTermsBuilder::build`], so the engine never sees a partially
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterfallTerms {
    pub structure: StructureType,
    pub lp_equity_share: Rate,
    pub gp_equity_share: Rate,
    pub preferred: Option<PreferredTerms>,
    pub catch_up: Option<CatchUpTerms>,
    pub tiers: Vec<TierTerms>,
    pub management_fee: Option<FeeTerms>,
    pub clawback: Option<ClawbackTerms>,
    #[serde(skip)]
    source: WaterfallConfiguration,
}

impl WaterfallTerms {
    /// The configuration these terms were validated from, verbatim.
    pub fn source(&self) -> &WaterfallConfiguration {
        &self.source
    }

    /// Same terms with clawback switched off and promote paid as earned.
    pub(crate) fn as_earned(&self) -> WaterfallTerms {
        WaterfallTerms {
            structure: StructureType::American,
            clawback: None,
            ..self.clone()
        }
    }
}

fn percent_in_range(field: &str, value: Decimal) -> EngineResult<Rate> {
    if value < Decimal::ZERO || value > HUNDRED {
        return Err(WaterfallError::config(
            field,
            format!("must be between 0 and 100 (got {value})"),
        ));
    }
    Ok(value / HUNDRED)
}

impl WaterfallConfiguration {
    pub fn builder() -> WaterfallTermsBuilder {
        WaterfallTermsBuilder::default()
    }

    /// Validate every field and convert percentages to fractions.
    ///
    /// Runs to completion before any cash flow is touched; the first
    /// violation found is returned.
    pub fn validate(&self) -> EngineResult<WaterfallTerms> {
        let cs = &self.capital_structure;
        let lp_equity_share =
            percent_in_range("capital_structure.lp_equity_percent", cs.lp_equity_percent)?;
        let gp_equity_share =
            percent_in_range("capital_structure.gp_equity_percent", cs.gp_equity_percent)?;
        if cs.lp_equity_percent + cs.gp_equity_percent != HUNDRED {
            return Err(WaterfallError::config(
                "capital_structure",
                format!(
                    "LP and GP equity must sum to 100 (got {} + {})",
                    cs.lp_equity_percent, cs.gp_equity_percent
                ),
            ));
        }
        if cs.gp_co_invest_required && cs.gp_equity_percent.is_zero() {
            return Err(WaterfallError::config(
                "capital_structure.gp_equity_percent",
                "GP co-invest is required but GP equity is zero",
            ));
        }

        let (preferred, catch_up) = self.validate_preferred()?;
        let tiers = self.validate_tiers()?;

        let mf = &self.management_fees;
        let management_fee = if mf.enabled {
            Some(FeeTerms {
                rate: percent_in_range("management_fees.rate", mf.rate)?,
                basis: mf.basis,
            })
        } else {
            None
        };

        let cb = &self.clawback;
        let clawback = if cb.enabled {
            Some(ClawbackTerms {
                escrow_share: percent_in_range("clawback.escrow_percent", cb.escrow_percent)?,
                frequency: cb.true_up_frequency,
            })
        } else {
            None
        };

        Ok(WaterfallTerms {
            structure: self.structure_type,
            lp_equity_share,
            gp_equity_share,
            preferred,
            catch_up,
            tiers,
            management_fee,
            clawback,
            source: self.clone(),
        })
    }

    fn validate_preferred(&self) -> EngineResult<(Option<PreferredTerms>, Option<CatchUpTerms>)> {
        let pr = &self.preferred_return;
        if !pr.enabled {
            return Ok((None, None));
        }

        let lp_rate = percent_in_range("preferred_return.lp_rate", pr.lp_rate)?;
        let gp_rate = pr
            .gp_rate
            .map(|r| percent_in_range("preferred_return.gp_rate", r))
            .transpose()?
            .filter(|r| !r.is_zero());

        let preferred = PreferredTerms {
            lp_rate,
            gp_rate,
            accrual: pr.accrual_type,
            frequency: pr.payment_frequency,
            accrues_during_construction: pr.accrues_during_construction,
        };

        let catch_up = if pr.catch_up_enabled {
            let gp_percent =
                percent_in_range("preferred_return.catch_up_percent", pr.catch_up_percent)?;
            if gp_percent.is_zero() {
                return Err(WaterfallError::config(
                    "preferred_return.catch_up_percent",
                    "catch-up percent must be greater than zero",
                ));
            }
            let target_share = percent_in_range(
                "preferred_return.catch_up_target_share",
                pr.catch_up_target_share,
            )?;
            if target_share.is_zero() || target_share == Decimal::ONE {
                return Err(WaterfallError::config(
                    "preferred_return.catch_up_target_share",
                    "target share must be strictly between 0 and 100",
                ));
            }
            Some(CatchUpTerms {
                gp_percent,
                target_share,
            })
        } else {
            None
        };

        Ok((Some(preferred), catch_up))
    }

    fn validate_tiers(&self) -> EngineResult<Vec<TierTerms>> {
        if self.promote_tiers.is_empty() {
            return Err(WaterfallError::config(
                "promote_tiers",
                "at least one promote tier is required",
            ));
        }

        let last_index = self.promote_tiers.len() - 1;
        let mut tiers = Vec::with_capacity(self.promote_tiers.len());
        let mut last_irr: Option<Rate> = None;
        let mut last_multiple: Option<Multiple> = None;

        for (i, tier) in self.promote_tiers.iter().enumerate() {
            let field = format!("promote_tiers[{i}]");
            let expected = (i + 1) as u32;
            if tier.tier_number != expected {
                return Err(WaterfallError::config(
                    format!("{field}.tier_number"),
                    format!(
                        "tiers must be numbered 1..n in order (expected {expected}, got {})",
                        tier.tier_number
                    ),
                ));
            }

            let lp_share = percent_in_range(&format!("{field}.lp_share"), tier.lp_share)?;
            let gp_share = percent_in_range(&format!("{field}.gp_share"), tier.gp_share)?;
            if tier.lp_share + tier.gp_share != HUNDRED {
                return Err(WaterfallError::config(
                    field.clone(),
                    format!(
                        "lp_share + gp_share must equal 100 (got {} + {})",
                        tier.lp_share, tier.gp_share
                    ),
                ));
            }

            let hurdle = tier_hurdle(&field, tier)?;
            if matches!(hurdle, Hurdle::None) && i != last_index {
                return Err(WaterfallError::config(
                    format!("{field}.hurdle_type"),
                    "a tier without a hurdle absorbs all remaining cash and must be last",
                ));
            }
            if i == last_index && !matches!(hurdle, Hurdle::None) {
                return Err(WaterfallError::config(
                    format!("{field}.hurdle_type"),
                    "the final tier must be unbounded (hurdle_type none)",
                ));
            }
            // hurdles are tested on LP cash, so a bounded tier must pay the LP
            if lp_share.is_zero() && !matches!(hurdle, Hurdle::None) {
                return Err(WaterfallError::config(
                    format!("{field}.lp_share"),
                    "a tier with a hurdle must give the LP a share of its cash",
                ));
            }

            if let Some(rate) = hurdle.irr_rate() {
                if last_irr.is_some_and(|prev| rate <= prev) {
                    return Err(WaterfallError::config(
                        format!("{field}.irr_hurdle"),
                        "IRR hurdles must be strictly increasing",
                    ));
                }
                last_irr = Some(rate);
            }
            if let Some(multiple) = hurdle.multiple() {
                if last_multiple.is_some_and(|prev| multiple <= prev) {
                    return Err(WaterfallError::config(
                        format!("{field}.multiple_hurdle"),
                        "equity multiple hurdles must be strictly increasing",
                    ));
                }
                last_multiple = Some(multiple);
            }

            tiers.push(TierTerms {
                tier_number: tier.tier_number,
                name: tier
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Tier {}", tier.tier_number)),
                hurdle,
                lp_share,
                gp_share,
            });
        }

        Ok(tiers)
    }
}

fn tier_hurdle(field: &str, tier: &PromoteTier) -> EngineResult<Hurdle> {
    let irr = || -> EngineResult<Rate> {
        let pct = tier.irr_hurdle.ok_or_else(|| {
            WaterfallError::config(format!("{field}.irr_hurdle"), "required for this hurdle type")
        })?;
        if pct <= Decimal::ZERO || pct > dec!(1000) {
            return Err(WaterfallError::config(
                format!("{field}.irr_hurdle"),
                format!("must be between 0 and 1000 percent (got {pct})"),
            ));
        }
        Ok(pct / HUNDRED)
    };
    let multiple = || -> EngineResult<Multiple> {
        let m = tier.multiple_hurdle.ok_or_else(|| {
            WaterfallError::config(
                format!("{field}.multiple_hurdle"),
                "required for this hurdle type",
            )
        })?;
        if m <= Decimal::ZERO {
            return Err(WaterfallError::config(
                format!("{field}.multiple_hurdle"),
                format!("must be positive (got {m})"),
            ));
        }
        Ok(m)
    };

    Ok(match tier.hurdle_type {
        HurdleType::None => Hurdle::None,
        HurdleType::Irr => Hurdle::Irr { rate: irr()? },
        HurdleType::EquityMultiple => Hurdle::EquityMultiple {
            multiple: multiple()?,
        },
        HurdleType::Both => Hurdle::Both {
            rate: irr()?,
            multiple: multiple()?,
            logic: tier.hurdle_logic.ok_or_else(|| {
                WaterfallError::config(
                    format!("{field}.hurdle_logic"),
                    "required when hurdle_type is both",
                )
            })?,
        },
    })
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incrementally assembles a configuration; nothing is usable until
/// [`build`](Self::build) validates the whole.
#[derive(Debug, Clone, Default)]
pub struct WaterfallTermsBuilder {
    structure_type: StructureType,
    capital_structure: Option<CapitalStructure>,
    preferred_return: Option<PreferredReturnConfig>,
    promote_tiers: Vec<PromoteTier>,
    management_fees: ManagementFeeConfig,
    clawback: ClawbackConfig,
}

impl WaterfallTermsBuilder {
    pub fn structure(mut self, structure_type: StructureType) -> Self {
        self.structure_type = structure_type;
        self
    }

    pub fn capital_structure(
        mut self,
        lp_equity_percent: Decimal,
        gp_equity_percent: Decimal,
    ) -> Self {
        self.capital_structure = Some(CapitalStructure {
            lp_equity_percent,
            gp_equity_percent,
            gp_co_invest_required: false,
        });
        self
    }

    pub fn require_gp_co_invest(mut self) -> Self {
        if let Some(cs) = self.capital_structure.as_mut() {
            cs.gp_co_invest_required = true;
        }
        self
    }

    pub fn preferred_return(mut self, preferred: PreferredReturnConfig) -> Self {
        self.preferred_return = Some(preferred);
        self
    }

    /// Enables the GP catch-up on the configured preferred return.
    pub fn catch_up(mut self, catch_up_percent: Decimal, target_share: Decimal) -> Self {
        let pr = self
            .preferred_return
            .get_or_insert_with(PreferredReturnConfig::disabled);
        pr.catch_up_enabled = true;
        pr.catch_up_percent = catch_up_percent;
        pr.catch_up_target_share = target_share;
        self
    }

    pub fn tier(mut self, tier: PromoteTier) -> Self {
        self.promote_tiers.push(tier);
        self
    }

    pub fn management_fees(mut self, rate: Decimal, basis: FeeBasis) -> Self {
        self.management_fees = ManagementFeeConfig {
            enabled: true,
            rate,
            basis,
        };
        self
    }

    pub fn clawback(mut self, escrow_percent: Decimal, true_up_frequency: TrueUpFrequency) -> Self {
        self.clawback = ClawbackConfig {
            enabled: true,
            escrow_percent,
            true_up_frequency,
        };
        self
    }

    pub fn configuration(self) -> EngineResult<WaterfallConfiguration> {
        let capital_structure = self.capital_structure.ok_or_else(|| {
            WaterfallError::config("capital_structure", "capital structure is required")
        })?;
        Ok(WaterfallConfiguration {
            structure_type: self.structure_type,
            capital_structure,
            preferred_return: self
                .preferred_return
                .unwrap_or_else(PreferredReturnConfig::disabled),
            promote_tiers: self.promote_tiers,
            management_fees: self.management_fees,
            clawback: self.clawback,
        })
    }

    pub fn build(self) -> EngineResult<WaterfallTerms> {
        self.configuration()?.validate()
    }
}
