//! Eligibility and DSCR Rules
//!
//! Underwriting checks evaluated before a quote is requested or issued.
//! A failing check declines the loan; it is a business outcome, not a fault.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::config::EligibilityConfig;
use crate::models::PropertyInfo;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// propertyValue x ltv / 100
pub fn loan_amount(property: &PropertyInfo) -> Option<Decimal> {
    let value = property.property_value?;
    let ltv = property.requested_ltv?;
    Some((value * ltv / HUNDRED).round_dp(2))
}

/// annualRentalIncome - annualOperatingExpenses
pub fn net_operating_income(property: &PropertyInfo) -> Option<Decimal> {
    Some(property.annual_rental_income? - property.annual_operating_expenses?)
}

/// NOI / annualLoanPayments at full precision.
///
/// None when any input is missing or the payments are not positive.
pub fn exact_dscr(property: &PropertyInfo) -> Option<Decimal> {
    let payments = property.annual_loan_payments?;
    if payments <= Decimal::ZERO {
        return None;
    }
    Some(net_operating_income(property)? / payments)
}

/// DSCR as stored on the loan, rounded to four places
pub fn dscr(property: &PropertyInfo) -> Option<Decimal> {
    exact_dscr(property).map(|ratio| ratio.round_dp(4))
}

/// Four places, rounded toward zero so a failing ratio never displays as passing
fn below_floor(ratio: Decimal) -> Decimal {
    ratio.round_dp_with_strategy(4, RoundingStrategy::ToZero)
}

/// Outcome of an eligibility evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum EligibilityDecision {
    Eligible {
        dscr: Option<Decimal>,
    },
    /// DSCR below the minimum but the property/transaction type is exempt
    Exempt {
        dscr: Decimal,
        basis: String,
    },
    Declined {
        reason: String,
        dscr: Option<Decimal>,
    },
}

impl EligibilityDecision {
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Declined { .. })
    }
}

fn matches_any(value: Option<&str>, candidates: &[String]) -> Option<String> {
    let value = value?.trim();
    candidates
        .iter()
        .find(|c| c.eq_ignore_ascii_case(value))
        .cloned()
}

/// Exemption basis, e.g. `property type land`, if the loan is DSCR-exempt
pub fn exemption(property: &PropertyInfo, config: &EligibilityConfig) -> Option<String> {
    if let Some(t) = matches_any(property.property_type.as_deref(), &config.exempt_property_types)
    {
        return Some(format!("property type {t}"));
    }
    matches_any(property.request_type.as_deref(), &config.exempt_request_types)
        .map(|t| format!("request type {t}"))
}

/// Evaluate the loan-to-value cap and the DSCR floor
pub fn evaluate(property: &PropertyInfo, config: &EligibilityConfig) -> EligibilityDecision {
    let exact = exact_dscr(property);
    let ratio = exact.map(|r| r.round_dp(4));

    if let Some(ltv) = property.requested_ltv {
        if ltv > config.max_ltv {
            return EligibilityDecision::Declined {
                reason: format!(
                    "Requested LTV of {}% exceeds the {}% maximum",
                    ltv.normalize(),
                    config.max_ltv.normalize()
                ),
                dscr: ratio,
            };
        }
    }

    // The floor is checked before any rounding
    match exact {
        Some(value) if value < config.min_dscr => {
            let value = below_floor(value);
            match exemption(property, config) {
                Some(basis) => {
                    tracing::debug!(%value, %basis, "DSCR below minimum but exempt");
                    EligibilityDecision::Exempt { dscr: value, basis }
                }
                None => {
                    let mut shown = value.round_dp(2);
                    if shown >= config.min_dscr {
                        shown = value;
                    }
                    EligibilityDecision::Declined {
                        reason: format!(
                            "DSCR of {} is below the minimum of {} required for this property",
                            shown,
                            config.min_dscr.round_dp(2)
                        ),
                        dscr: Some(value),
                    }
                }
            }
        }
        _ => EligibilityDecision::Eligible { dscr: ratio },
    }
}
