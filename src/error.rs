//! Error handling for the loan lifecycle engine
//!
//! Every rejected operation says exactly what is missing. Preconditions are
//! carried as typed blockers; an eligibility decline is a committed business
//! outcome reported through the error channel.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use loan_types::LoanStatus;

use crate::services::ServiceError;
use crate::store::StoreError;
use crate::workflow::state::{Blocker, BlockerType};

/// Main error type for lifecycle operations
#[derive(Error, Debug)]
pub enum LoanError {
    #[error("Cannot {transition}: {}", describe(.blockers))]
    PreconditionFailed {
        transition: &'static str,
        blockers: Vec<Blocker>,
    },

    /// The loan has been declined and the decline is already committed
    #[error("Loan declined: {reason}")]
    EligibilityDeclined {
        reason: String,
        dscr: Option<Decimal>,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Access denied: {reason}")]
    AccessDenied {
        reason: String,
        /// The principal's email matches the owner's; an admin may reassign
        reassignable: bool,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Loan {0} was modified concurrently; reload and retry")]
    ConcurrentModification(Uuid),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

fn describe(blockers: &[Blocker]) -> String {
    blockers
        .iter()
        .map(|b| b.description.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for LoanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { loan_id, .. } => Self::ConcurrentModification(loan_id),
            StoreError::LoanNotFound(id) => Self::NotFound { entity: "Loan", id },
            other => Self::Store(other),
        }
    }
}

impl LoanError {
    pub fn loan_not_found(id: Uuid) -> Self {
        Self::NotFound { entity: "Loan", id }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
            reassignable: false,
        }
    }

    pub fn blockers(&self) -> &[Blocker] {
        match self {
            Self::PreconditionFailed { blockers, .. } => blockers,
            _ => &[],
        }
    }

    /// Names of the needs-list items reported as missing
    pub fn missing_items(&self) -> Vec<String> {
        self.blockers()
            .iter()
            .filter_map(|b| match &b.blocker_type {
                BlockerType::MissingDocument { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Structured body a caller can route remediation on
    pub fn response_body(&self) -> Value {
        let mut body = json!({ "error": self.to_string() });
        match self {
            Self::PreconditionFailed {
                transition,
                blockers,
            } => {
                let payment = blockers.iter().find_map(Blocker::payment_type);
                body["transition"] = json!(transition);
                body["paymentRequired"] = json!(payment.is_some());
                if let Some(fee) = payment {
                    body["paymentType"] = json!(fee);
                }
                let missing = self.missing_items();
                if !missing.is_empty() {
                    body["missingItems"] = json!(missing);
                }
                body["blockers"] = json!(blockers);
            }
            Self::EligibilityDeclined { reason, dscr } => {
                body["declined"] = json!(true);
                body["reason"] = json!(reason);
                if let Some(dscr) = dscr {
                    body["dscr"] = json!(dscr);
                }
            }
            Self::AccessDenied { reassignable, .. } => {
                body["reassignable"] = json!(reassignable);
            }
            _ => {}
        }
        body
    }
}
