//! Loan Request Record
//!
//! The loan row owned by the lifecycle engine plus its append-only status
//! history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loan_types::{FeeType, LoanStatus, QuoteData};

use crate::eligibility;

/// Property and financial inputs supplied by the borrower
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInfo {
    pub property_address: Option<String>,
    pub property_type: Option<String>,
    pub request_type: Option<String>,
    pub property_value: Option<Decimal>,
    /// Requested loan-to-value, percent
    pub requested_ltv: Option<Decimal>,
    pub annual_rental_income: Option<Decimal>,
    pub annual_operating_expenses: Option<Decimal>,
    pub annual_loan_payments: Option<Decimal>,
}

impl PropertyInfo {
    /// Names of the fields required before a quote can be requested
    pub fn missing_quote_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.property_type.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("propertyType");
        }
        if self.request_type.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("requestType");
        }
        if self.property_value.is_none() {
            missing.push("propertyValue");
        }
        missing
    }
}

/// Boolean gates on a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    SoftQuoteGenerated,
    TermSheetSigned,
    CreditAuthorized,
    AppraisalPaid,
    ApplicationFeePaid,
    UnderwritingFeePaid,
    ClosingFeePaid,
    FullApplicationCompleted,
    DscrAutoDeclined,
}

impl Flag {
    /// Flag set when a fee of this type is confirmed
    pub fn for_fee(fee: FeeType) -> Self {
        match fee {
            FeeType::Credit => Self::CreditAuthorized,
            FeeType::Application => Self::ApplicationFeePaid,
            FeeType::Appraisal => Self::AppraisalPaid,
            FeeType::Underwriting => Self::UnderwritingFeePaid,
            FeeType::Closing => Self::ClosingFeePaid,
        }
    }
}

/// Set-once gating flags.
///
/// There is deliberately no way to clear a flag: `set` only raises it and
/// `union` keeps whatever either side has raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanFlags {
    pub soft_quote_generated: bool,
    pub term_sheet_signed: bool,
    pub credit_authorized: bool,
    pub appraisal_paid: bool,
    pub application_fee_paid: bool,
    pub underwriting_fee_paid: bool,
    pub closing_fee_paid: bool,
    pub full_application_completed: bool,
    pub dscr_auto_declined: bool,
}

impl LoanFlags {
    pub fn is_set(&self, flag: Flag) -> bool {
        *self.slot(flag)
    }

    pub fn set(&mut self, flag: Flag) {
        *self.slot_mut(flag) = true;
    }

    pub fn fee_paid(&self, fee: FeeType) -> bool {
        self.is_set(Flag::for_fee(fee))
    }

    /// Flags raised on either side
    pub fn union(self, other: LoanFlags) -> LoanFlags {
        LoanFlags {
            soft_quote_generated: self.soft_quote_generated || other.soft_quote_generated,
            term_sheet_signed: self.term_sheet_signed || other.term_sheet_signed,
            credit_authorized: self.credit_authorized || other.credit_authorized,
            appraisal_paid: self.appraisal_paid || other.appraisal_paid,
            application_fee_paid: self.application_fee_paid || other.application_fee_paid,
            underwriting_fee_paid: self.underwriting_fee_paid || other.underwriting_fee_paid,
            closing_fee_paid: self.closing_fee_paid || other.closing_fee_paid,
            full_application_completed: self.full_application_completed
                || other.full_application_completed,
            dscr_auto_declined: self.dscr_auto_declined || other.dscr_auto_declined,
        }
    }

    /// True when every flag raised in `earlier` is still raised here
    pub fn preserves(&self, earlier: &LoanFlags) -> bool {
        self.union(*earlier) == *self
    }

    fn slot(&self, flag: Flag) -> &bool {
        match flag {
            Flag::SoftQuoteGenerated => &self.soft_quote_generated,
            Flag::TermSheetSigned => &self.term_sheet_signed,
            Flag::CreditAuthorized => &self.credit_authorized,
            Flag::AppraisalPaid => &self.appraisal_paid,
            Flag::ApplicationFeePaid => &self.application_fee_paid,
            Flag::UnderwritingFeePaid => &self.underwriting_fee_paid,
            Flag::ClosingFeePaid => &self.closing_fee_paid,
            Flag::FullApplicationCompleted => &self.full_application_completed,
            Flag::DscrAutoDeclined => &self.dscr_auto_declined,
        }
    }

    fn slot_mut(&mut self, flag: Flag) -> &mut bool {
        match flag {
            Flag::SoftQuoteGenerated => &mut self.soft_quote_generated,
            Flag::TermSheetSigned => &mut self.term_sheet_signed,
            Flag::CreditAuthorized => &mut self.credit_authorized,
            Flag::AppraisalPaid => &mut self.appraisal_paid,
            Flag::ApplicationFeePaid => &mut self.application_fee_paid,
            Flag::UnderwritingFeePaid => &mut self.underwriting_fee_paid,
            Flag::ClosingFeePaid => &mut self.closing_fee_paid,
            Flag::FullApplicationCompleted => &mut self.full_application_completed,
            Flag::DscrAutoDeclined => &mut self.dscr_auto_declined,
        }
    }
}

/// One borrower-property application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRequest {
    pub id: Uuid,
    /// `RPC-{year}-{seq:04}`
    pub loan_number: String,
    pub borrower_id: Uuid,
    pub broker_id: Option<Uuid>,

    pub status: LoanStatus,
    /// Progress watermark, 1-12, never decreases
    pub current_step: u8,

    pub property: PropertyInfo,
    pub loan_amount: Option<Decimal>,
    pub noi: Option<Decimal>,
    pub dscr_ratio: Option<Decimal>,

    pub flags: LoanFlags,
    pub credit_payment_id: Option<String>,
    pub soft_quote: Option<QuoteData>,
    pub application_data: Option<serde_json::Value>,
    pub application_pdf_url: Option<String>,
    pub term_sheet_url: Option<String>,
    pub term_sheet_signed_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,

    /// Optimistic concurrency token, bumped on every commit
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRequest {
    pub fn new(
        loan_number: String,
        borrower_id: Uuid,
        broker_id: Option<Uuid>,
        property: PropertyInfo,
    ) -> Self {
        let now = Utc::now();
        let mut loan = Self {
            id: Uuid::new_v4(),
            loan_number,
            borrower_id,
            broker_id,
            status: LoanStatus::NewRequest,
            current_step: 1,
            property,
            loan_amount: None,
            noi: None,
            dscr_ratio: None,
            flags: LoanFlags::default(),
            credit_payment_id: None,
            soft_quote: None,
            application_data: None,
            application_pdf_url: None,
            term_sheet_url: None,
            term_sheet_signed_at: None,
            decline_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        loan.recompute_derived();
        loan
    }

    /// Advance the watermark; never moves it backwards
    pub fn advance_step(&mut self, target: u8) {
        self.current_step = self.current_step.max(target);
    }

    /// Recompute loan amount, NOI and DSCR from the property inputs
    pub fn recompute_derived(&mut self) {
        self.loan_amount = eligibility::loan_amount(&self.property);
        self.noi = eligibility::net_operating_income(&self.property);
        self.dscr_ratio = eligibility::dscr(&self.property);
    }
}

/// Append-only audit row, one per committed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanStatusHistory {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub status: LoanStatus,
    pub step: u8,
    /// None for system-originated changes (payment webhooks)
    pub changed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LoanStatusHistory {
    /// History row capturing the loan as it stands
    pub fn snapshot(loan: &LoanRequest, changed_by: Option<Uuid>, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            status: loan.status,
            step: loan.current_step,
            changed_by,
            notes,
            created_at: Utc::now(),
        }
    }
}

/// Confirmed fee payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub fee_type: FeeType,
    /// Provider-side payment id; unique
    pub payment_id: String,
    pub amount: Option<Decimal>,
    pub confirmed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property() -> PropertyInfo {
        PropertyInfo {
            property_address: Some("12 Harbor Way".to_string()),
            property_type: Some("multifamily".to_string()),
            request_type: Some("purchase".to_string()),
            property_value: Some(Decimal::from(500_000)),
            requested_ltv: Some(Decimal::from(70)),
            annual_rental_income: Some(Decimal::from(20_000)),
            annual_operating_expenses: Some(Decimal::from(5_000)),
            annual_loan_payments: Some(Decimal::from(8_000)),
        }
    }

    #[test]
    fn test_new_loan_derives_financials() {
        let loan = LoanRequest::new("RPC-2026-0001".into(), Uuid::new_v4(), None, property());

        assert_eq!(loan.status, LoanStatus::NewRequest);
        assert_eq!(loan.current_step, 1);
        assert_eq!(loan.loan_amount, Some(Decimal::from(350_000)));
        assert_eq!(loan.noi, Some(Decimal::from(15_000)));
        assert_eq!(loan.dscr_ratio, Some(Decimal::new(1875, 3)));
    }

    #[test]
    fn test_advance_step_never_regresses() {
        let mut loan = LoanRequest::new("RPC-2026-0001".into(), Uuid::new_v4(), None, property());
        loan.advance_step(6);
        loan.advance_step(2);
        assert_eq!(loan.current_step, 6);
    }

    #[test]
    fn test_flags_are_set_once() {
        let mut flags = LoanFlags::default();
        flags.set(Flag::for_fee(FeeType::Appraisal));
        assert!(flags.appraisal_paid);
        assert!(flags.fee_paid(FeeType::Appraisal));

        let stale = LoanFlags::default();
        let merged = stale.union(flags);
        assert!(merged.appraisal_paid);
        assert!(merged.preserves(&flags));
        assert!(!stale.preserves(&flags));
    }

    #[test]
    fn test_missing_quote_fields() {
        let mut info = property();
        assert!(info.missing_quote_fields().is_empty());

        info.property_type = Some("  ".to_string());
        info.property_value = None;
        assert_eq!(
            info.missing_quote_fields(),
            vec!["propertyType", "propertyValue"]
        );
    }
}
