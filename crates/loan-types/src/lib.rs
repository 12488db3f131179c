//! Shared loan lifecycle types
//!
//! Single source of truth for the enums and DTOs that cross the boundary
//! between the lifecycle engine, the persistence layer and API callers.
//! Every enum serializes as its snake_case wire name.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Loan status
// ============================================================================

/// Canonical loan status.
///
/// Ordered progression from `NewRequest` to `Funded`; `Declined` is the
/// terminal exception state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    NewRequest,
    QuoteRequested,
    SoftQuoteIssued,
    TermSheetIssued,
    TermSheetSigned,
    NeedsListSent,
    NeedsListComplete,
    AppraisalOrdered,
    AppraisalReceived,
    ConditionallyApproved,
    ConditionalItemsNeeded,
    ClearToClose,
    ClosingScheduled,
    Funded,
    Declined,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 15] = [
        Self::NewRequest,
        Self::QuoteRequested,
        Self::SoftQuoteIssued,
        Self::TermSheetIssued,
        Self::TermSheetSigned,
        Self::NeedsListSent,
        Self::NeedsListComplete,
        Self::AppraisalOrdered,
        Self::AppraisalReceived,
        Self::ConditionallyApproved,
        Self::ConditionalItemsNeeded,
        Self::ClearToClose,
        Self::ClosingScheduled,
        Self::Funded,
        Self::Declined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewRequest => "new_request",
            Self::QuoteRequested => "quote_requested",
            Self::SoftQuoteIssued => "soft_quote_issued",
            Self::TermSheetIssued => "term_sheet_issued",
            Self::TermSheetSigned => "term_sheet_signed",
            Self::NeedsListSent => "needs_list_sent",
            Self::NeedsListComplete => "needs_list_complete",
            Self::AppraisalOrdered => "appraisal_ordered",
            Self::AppraisalReceived => "appraisal_received",
            Self::ConditionallyApproved => "conditionally_approved",
            Self::ConditionalItemsNeeded => "conditional_items_needed",
            Self::ClearToClose => "clear_to_close",
            Self::ClosingScheduled => "closing_scheduled",
            Self::Funded => "funded",
            Self::Declined => "declined",
        }
    }

    /// Progress step a loan has reached once it sits in this status.
    ///
    /// Used when a status is set without a catalogued transition (operations
    /// override, staff advance). Always combined with `max(current, ..)`.
    pub fn milestone_step(&self) -> u8 {
        match self {
            Self::NewRequest => 1,
            Self::QuoteRequested | Self::SoftQuoteIssued => 2,
            Self::Declined => 3,
            Self::TermSheetIssued | Self::TermSheetSigned | Self::NeedsListSent => 6,
            Self::NeedsListComplete => 7,
            Self::AppraisalOrdered | Self::AppraisalReceived => 8,
            Self::ConditionallyApproved | Self::ConditionalItemsNeeded => 9,
            Self::ClearToClose => 10,
            Self::ClosingScheduled => 11,
            Self::Funded => 12,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Funded | Self::Declined)
    }

    /// Human-readable label for notifications and emails
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewRequest => "New request",
            Self::QuoteRequested => "Quote requested",
            Self::SoftQuoteIssued => "Soft quote issued",
            Self::TermSheetIssued => "Term sheet issued",
            Self::TermSheetSigned => "Term sheet signed",
            Self::NeedsListSent => "Needs list sent",
            Self::NeedsListComplete => "Needs list complete",
            Self::AppraisalOrdered => "Appraisal ordered",
            Self::AppraisalReceived => "Appraisal received",
            Self::ConditionallyApproved => "Conditionally approved",
            Self::ConditionalItemsNeeded => "Conditional items needed",
            Self::ClearToClose => "Clear to close",
            Self::ClosingScheduled => "Closing scheduled",
            Self::Funded => "Funded",
            Self::Declined => "Declined",
        }
    }
}

impl FromStr for LoanStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue::new("loan status", s))
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Fees
// ============================================================================

/// Staged fee kinds. Each has a sticky paid flag on the loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    /// Credit report authorization
    Credit,
    Application,
    Appraisal,
    Underwriting,
    Closing,
}

impl FeeType {
    pub const ALL: [FeeType; 5] = [
        Self::Credit,
        Self::Application,
        Self::Appraisal,
        Self::Underwriting,
        Self::Closing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Application => "application",
            Self::Appraisal => "appraisal",
            Self::Underwriting => "underwriting",
            Self::Closing => "closing",
        }
    }
}

impl FromStr for FeeType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|fee| fee.as_str() == s)
            .ok_or_else(|| UnknownValue::new("fee type", s))
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Borrower,
    Broker,
    Investor,
    Operations,
    Admin,
}

impl Role {
    /// Operations and admin users may override borrower-facing preconditions
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Operations | Self::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrower => "borrower",
            Self::Broker => "broker",
            Self::Investor => "investor",
            Self::Operations => "operations",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrower" => Ok(Self::Borrower),
            "broker" => Ok(Self::Broker),
            "investor" => Ok(Self::Investor),
            "operations" | "ops" => Ok(Self::Operations),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownValue::new("role", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Documents and needs list
// ============================================================================

/// Review status of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Reviewed,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "reviewed" => Ok(Self::Reviewed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownValue::new("document status", s)),
        }
    }
}

/// Folder coloring shown on the needs-list dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderColor {
    /// No documents
    Tan,
    /// At least one document, none recent
    Blue,
    /// A document arrived inside the recent-upload window
    Red,
}

/// Per-item fulfillment of a needs-list slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentState {
    None,
    Some,
    Reviewed,
}

impl FulfillmentState {
    pub fn is_fulfilled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// ============================================================================
// Quote and payment DTOs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRange {
    /// Annual rate in percent
    pub min_rate: Decimal,
    pub max_rate: Decimal,
}

/// Fee schedule attached to a quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteFees {
    pub origination_points: Decimal,
    pub origination_fee: Decimal,
    pub application_fee: Decimal,
    pub appraisal_fee: Decimal,
    pub underwriting_fee: Decimal,
    pub closing_fee: Decimal,
}

/// Soft quote data, stored on the loan and reused for the formal term sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteData {
    pub loan_amount: Decimal,
    pub ltv: Decimal,
    pub rate_range: RateRange,
    pub fees: QuoteFees,
    /// Interest-only payment at the midpoint rate
    pub monthly_payment: Decimal,
    pub term_months: u32,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub fee_type: FeeType,
}
