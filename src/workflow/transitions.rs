//! Transition Catalog
//!
//! The forward status graph and the catalogued transitions the engine
//! applies. Steps always move through `max(current, target)`.

use loan_types::LoanStatus;

use crate::models::LoanRequest;

use LoanStatus::*;

/// Statuses reachable from `from` without an operations override
pub fn next_statuses(from: LoanStatus) -> &'static [LoanStatus] {
    match from {
        NewRequest => &[QuoteRequested, SoftQuoteIssued, Declined],
        QuoteRequested => &[SoftQuoteIssued, Declined],
        SoftQuoteIssued => &[SoftQuoteIssued, TermSheetIssued, Declined],
        TermSheetIssued => &[TermSheetSigned],
        TermSheetSigned => &[NeedsListSent],
        NeedsListSent => &[NeedsListComplete],
        NeedsListComplete => &[AppraisalOrdered],
        AppraisalOrdered => &[AppraisalReceived],
        AppraisalReceived => &[ConditionallyApproved],
        ConditionallyApproved => &[ConditionalItemsNeeded, ClearToClose],
        ConditionalItemsNeeded => &[ClearToClose],
        ClearToClose => &[ClosingScheduled],
        ClosingScheduled => &[Funded],
        Funded | Declined => &[],
    }
}

pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    next_statuses(from).contains(&to)
}

/// Stages staff move a loan through by hand once the needs list is complete
pub fn is_staff_advanced(status: LoanStatus) -> bool {
    matches!(
        status,
        AppraisalOrdered
            | AppraisalReceived
            | ConditionallyApproved
            | ConditionalItemsNeeded
            | ClearToClose
            | ClosingScheduled
            | Funded
    )
}

/// A catalogued status-changing transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SubmitForQuote,
    AutoDecline,
    IssueSoftQuote,
    IssueTermSheet,
    SignTermSheet,
    SendNeedsList,
    CompleteNeedsList,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitForQuote => "submit for quote",
            Self::AutoDecline => "decline",
            Self::IssueSoftQuote => "generate soft quote",
            Self::IssueTermSheet => "submit full application",
            Self::SignTermSheet => "sign term sheet",
            Self::SendNeedsList => "send needs list",
            Self::CompleteNeedsList => "complete needs list",
        }
    }

    pub fn target(&self) -> LoanStatus {
        match self {
            Self::SubmitForQuote => QuoteRequested,
            Self::AutoDecline => Declined,
            Self::IssueSoftQuote => SoftQuoteIssued,
            Self::IssueTermSheet => TermSheetIssued,
            Self::SignTermSheet => TermSheetSigned,
            Self::SendNeedsList => NeedsListSent,
            Self::CompleteNeedsList => NeedsListComplete,
        }
    }

    /// Step floor the loan reaches through this transition
    pub fn target_step(&self) -> u8 {
        match self {
            Self::SubmitForQuote => 2,
            Self::AutoDecline => 3,
            Self::IssueSoftQuote => 1,
            Self::IssueTermSheet | Self::SignTermSheet | Self::SendNeedsList => 6,
            Self::CompleteNeedsList => 7,
        }
    }

    /// Statuses this transition may start from
    pub fn allowed_from(&self) -> &'static [LoanStatus] {
        match self {
            Self::SubmitForQuote => &[NewRequest],
            Self::AutoDecline => &[NewRequest, QuoteRequested, SoftQuoteIssued],
            Self::IssueSoftQuote => &[NewRequest, QuoteRequested, SoftQuoteIssued],
            Self::IssueTermSheet => &[SoftQuoteIssued],
            Self::SignTermSheet => &[TermSheetIssued],
            Self::SendNeedsList => &[TermSheetSigned],
            Self::CompleteNeedsList => &[NeedsListSent],
        }
    }

    pub fn permits(&self, from: LoanStatus) -> bool {
        self.allowed_from().contains(&from)
    }

    /// Set status and advance the step watermark
    pub fn apply(&self, loan: &mut LoanRequest) {
        loan.status = self.target();
        loan.advance_step(self.target_step());
    }
}
