//! Soft Quote Generation
//!
//! Pure pricing: the same loan inputs and pricing config always produce the
//! same rate range, fees and payment. Only `generated_at` differs.

use chrono::Utc;
use rust_decimal::Decimal;

use loan_types::{FeeType, QuoteData, QuoteFees, RateRange};

use crate::config::LoanConfig;
use crate::eligibility;
use crate::models::PropertyInfo;

/// Inputs the pricing rules cannot do without
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Quote input missing: {field}")]
pub struct MissingQuoteInput {
    pub field: &'static str,
}

pub fn generate_quote(
    property: &PropertyInfo,
    config: &LoanConfig,
) -> Result<QuoteData, MissingQuoteInput> {
    let ltv = property.requested_ltv.ok_or(MissingQuoteInput {
        field: "requestedLtv",
    })?;
    let loan_amount = eligibility::loan_amount(property).ok_or(MissingQuoteInput {
        field: "propertyValue",
    })?;

    let pricing = &config.pricing;
    let tier = pricing
        .tiers
        .iter()
        .find(|t| ltv <= t.max_ltv)
        .or_else(|| pricing.tiers.last())
        .ok_or(MissingQuoteInput {
            field: "pricing.tiers",
        })?;

    let adjustment = property
        .property_type
        .as_deref()
        .and_then(|t| {
            pricing
                .property_adjustments
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(t.trim()))
                .map(|(_, v)| *v)
        })
        .unwrap_or(Decimal::ZERO);

    let min_rate = tier.base_rate + adjustment;
    let max_rate = min_rate + pricing.rate_spread;
    let midpoint = (min_rate + max_rate) / Decimal::TWO;
    let monthly_payment =
        (loan_amount * midpoint / Decimal::ONE_HUNDRED / Decimal::from(12)).round_dp(2);

    let fees = QuoteFees {
        origination_points: pricing.origination_points,
        origination_fee: (loan_amount * pricing.origination_points / Decimal::ONE_HUNDRED)
            .round_dp(2),
        application_fee: config.fees.amount(FeeType::Application),
        appraisal_fee: config.fees.amount(FeeType::Appraisal),
        underwriting_fee: config.fees.amount(FeeType::Underwriting),
        closing_fee: config.fees.amount(FeeType::Closing),
    };

    Ok(QuoteData {
        loan_amount,
        ltv,
        rate_range: RateRange { min_rate, max_rate },
        fees,
        monthly_payment,
        term_months: pricing.term_months,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(ltv: i64, property_type: &str) -> PropertyInfo {
        PropertyInfo {
            property_type: Some(property_type.into()),
            request_type: Some("purchase".into()),
            property_value: Some(Decimal::from(500_000)),
            requested_ltv: Some(Decimal::from(ltv)),
            ..Default::default()
        }
    }

    #[test]
    fn test_tier_selection_and_payment() {
        let config = LoanConfig::default();
        let quote = generate_quote(&property(70, "multifamily"), &config).unwrap();

        assert_eq!(quote.loan_amount, Decimal::from(350_000));
        assert_eq!(quote.rate_range.min_rate, Decimal::new(1025, 2));
        assert_eq!(quote.rate_range.max_rate, Decimal::new(1075, 2));
        // 350,000 x 10.50% / 12
        assert_eq!(quote.monthly_payment, Decimal::new(306250, 2));
        assert_eq!(quote.fees.origination_fee, Decimal::from(7_000));
        assert_eq!(quote.fees.appraisal_fee, Decimal::from(650));
        assert_eq!(quote.term_months, 12);
    }

    #[test]
    fn test_property_adjustment() {
        let config = LoanConfig::default();
        let quote = generate_quote(&property(55, "Mixed_Use"), &config).unwrap();
        assert_eq!(quote.rate_range.min_rate, Decimal::new(975, 2));
    }

    #[test]
    fn test_deterministic_pricing() {
        let config = LoanConfig::default();
        let a = generate_quote(&property(65, "multifamily"), &config).unwrap();
        let b = generate_quote(&property(65, "multifamily"), &config).unwrap();
        assert_eq!(a.rate_range, b.rate_range);
        assert_eq!(a.fees, b.fees);
        assert_eq!(a.monthly_payment, b.monthly_payment);
    }

    #[test]
    fn test_missing_ltv() {
        let config = LoanConfig::default();
        let mut p = property(70, "multifamily");
        p.requested_ltv = None;
        assert_eq!(
            generate_quote(&p, &config).unwrap_err().field,
            "requestedLtv"
        );
    }
}
