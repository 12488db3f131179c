//! Guard Evaluation
//!
//! Each catalogued transition has a guard that lists every unmet
//! precondition. `clear` turns a guard result into a go/no-go decision,
//! applying an operations override when the actor carries one.

use tracing::{debug, warn};

use loan_types::FeeType;

use super::state::{Blocker, BlockerType};
use super::transitions::Transition;
use crate::error::LoanError;
use crate::models::{Actor, LoanRequest};
use crate::needs_list::Reconciliation;

/// Result of guard evaluation
#[derive(Debug, Clone, Default)]
pub struct GuardResult {
    /// Did the guard pass?
    pub passed: bool,
    /// Blockers if not passed
    pub blockers: Vec<Blocker>,
}

impl GuardResult {
    pub fn passed() -> Self {
        Self {
            passed: true,
            blockers: vec![],
        }
    }

    pub fn blocked(blockers: Vec<Blocker>) -> Self {
        Self {
            passed: false,
            blockers,
        }
    }

    fn from_blockers(blockers: Vec<Blocker>) -> Self {
        if blockers.is_empty() {
            Self::passed()
        } else {
            Self::blocked(blockers)
        }
    }
}

/// How a guarded transition was allowed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clearance {
    /// Every precondition holds
    Clear,
    /// Preconditions were bypassed; the note goes into the history row
    Overridden { note: String },
}

impl Clearance {
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Clear => None,
            Self::Overridden { note } => Some(note),
        }
    }
}

// ============================================================================
// Guards
// ============================================================================

pub fn submit_for_quote(loan: &LoanRequest, borrower_email_verified: bool) -> GuardResult {
    let mut blockers: Vec<Blocker> = loan
        .property
        .missing_quote_fields()
        .into_iter()
        .map(Blocker::field)
        .collect();
    if !borrower_email_verified {
        blockers.push(Blocker::new(
            BlockerType::EmailNotVerified,
            "Email address must be verified before requesting a quote",
        ));
    }
    GuardResult::from_blockers(blockers)
}

pub fn full_application(loan: &LoanRequest) -> GuardResult {
    let mut blockers = Vec::new();
    if loan.credit_payment_id.is_none() {
        blockers.push(Blocker::payment(FeeType::Credit));
    }
    if !loan.flags.application_fee_paid {
        blockers.push(Blocker::payment(FeeType::Application));
    }
    if loan.soft_quote.is_none() {
        blockers.push(Blocker::new(
            BlockerType::SoftQuoteMissing,
            "A soft quote must be generated before the full application",
        ));
    }
    GuardResult::from_blockers(blockers)
}

pub fn sign_term_sheet(loan: &LoanRequest) -> GuardResult {
    let mut blockers = Vec::new();
    if loan.term_sheet_url.is_none() {
        blockers.push(Blocker::new(
            BlockerType::ArtifactMissing {
                artifact: "term_sheet".to_string(),
            },
            "No formal term sheet has been issued for this loan",
        ));
    }
    if !loan.flags.appraisal_paid {
        blockers.push(Blocker::payment(FeeType::Appraisal));
    }
    GuardResult::from_blockers(blockers)
}

pub fn complete_needs_list(reconciliation: &Reconciliation) -> GuardResult {
    let blockers = reconciliation
        .items
        .iter()
        .filter(|item| item.required && !item.fulfillment.is_fulfilled())
        .map(|item| {
            Blocker::missing_document(item.name.clone(), item.category.clone())
                .with_detail("itemId", serde_json::json!(item.item_id))
        })
        .collect();
    GuardResult::from_blockers(blockers)
}

// ============================================================================
// Clearance
// ============================================================================

/// Decide whether a transition may proceed.
///
/// Staff with an override reason bypass every overridable blocker. A
/// development flag (needs list only) has the same effect. Either way the
/// bypass is logged and described in the returned note.
pub fn clear(
    result: GuardResult,
    transition: Transition,
    loan: &LoanRequest,
    actor: &Actor,
    dev_bypass: bool,
) -> Result<Clearance, LoanError> {
    if result.passed {
        debug!(loan_id = %loan.id, transition = transition.name(), "Guards passed");
        return Ok(Clearance::Clear);
    }

    let blocked = || LoanError::PreconditionFailed {
        transition: transition.name(),
        blockers: result.blockers.clone(),
    };

    if result
        .blockers
        .iter()
        .any(|b| !b.blocker_type.is_overridable())
    {
        return Err(blocked());
    }

    let bypassed = result
        .blockers
        .iter()
        .map(|b| b.description.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    if let Some(reason) = actor.bypass_reason() {
        warn!(
            loan_id = %loan.id,
            actor_id = %actor.user_id,
            role = %actor.role,
            reason,
            bypassed = %bypassed,
            "Operations override on {}",
            transition.name()
        );
        return Ok(Clearance::Overridden {
            note: format!("[override] {reason} (bypassed: {bypassed})"),
        });
    }

    if dev_bypass {
        warn!(
            loan_id = %loan.id,
            actor_id = %actor.user_id,
            bypassed = %bypassed,
            "Development bypass flag on {}",
            transition.name()
        );
        return Ok(Clearance::Overridden {
            note: format!("[override] development bypass flag (bypassed: {bypassed})"),
        });
    }

    Err(blocked())
}
