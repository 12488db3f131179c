//! Users, Access and Read Models

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use loan_types::{LoanStatus, Role};

use super::engine::LoanWorkflow;
use crate::error::LoanError;
use crate::models::{Actor, LoanRequest, LoanStatusHistory, User};
use crate::store::LoanFilter;

/// Statuses visible to investors
const INVESTOR_STATUSES: [LoanStatus; 5] = [
    LoanStatus::ConditionallyApproved,
    LoanStatus::ConditionalItemsNeeded,
    LoanStatus::ClearToClose,
    LoanStatus::ClosingScheduled,
    LoanStatus::Funded,
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: LoanStatus,
    pub label: &'static str,
    pub count: usize,
}

/// Loan counts per status for the operations dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub total: usize,
    pub by_status: Vec<StatusCount>,
}

impl PipelineSummary {
    pub fn count(&self, status: LoanStatus) -> usize {
        self.by_status
            .iter()
            .find(|c| c.status == status)
            .map_or(0, |c| c.count)
    }
}

fn can_act(actor: &Actor, loan: &LoanRequest) -> bool {
    actor.is_staff()
        || loan.borrower_id == actor.user_id
        || (actor.role == Role::Broker && loan.broker_id == Some(actor.user_id))
}

fn can_view(actor: &Actor, loan: &LoanRequest) -> bool {
    can_act(actor, loan) || (actor.role == Role::Investor && INVESTOR_STATUSES.contains(&loan.status))
}

impl LoanWorkflow {
    pub async fn register_user(
        &self,
        email: &str,
        role: Role,
        email_verified: bool,
    ) -> Result<User, LoanError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(LoanError::Validation(format!("invalid email '{email}'")));
        }
        let user = User::new(email.to_lowercase(), role, email_verified);
        self.store.insert_user(&user).await?;
        info!(user_id = %user.id, %role, "User registered");
        Ok(user)
    }

    pub async fn get_loan(&self, actor: &Actor, loan_id: Uuid) -> Result<LoanRequest, LoanError> {
        self.load_for_view(actor, loan_id).await
    }

    /// Loans visible to the actor, newest first
    pub async fn list_loans(&self, actor: &Actor) -> Result<Vec<LoanRequest>, LoanError> {
        let filter = match actor.role {
            Role::Operations | Role::Admin => LoanFilter::default(),
            Role::Borrower => LoanFilter {
                borrower_id: Some(actor.user_id),
                ..Default::default()
            },
            Role::Broker => LoanFilter {
                broker_id: Some(actor.user_id),
                ..Default::default()
            },
            Role::Investor => LoanFilter {
                statuses: Some(INVESTOR_STATUSES.to_vec()),
                ..Default::default()
            },
        };
        Ok(self.store.list_loans(&filter).await?)
    }

    pub async fn pipeline_summary(&self, actor: &Actor) -> Result<PipelineSummary, LoanError> {
        if !actor.is_staff() {
            return Err(LoanError::denied("pipeline is visible to operations only"));
        }
        let loans = self.store.list_loans(&LoanFilter::default()).await?;
        let by_status = LoanStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                label: status.label(),
                count: loans.iter().filter(|l| l.status == *status).count(),
            })
            .collect();
        Ok(PipelineSummary {
            total: loans.len(),
            by_status,
        })
    }

    /// Audit trail, oldest first
    pub async fn status_history(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<Vec<LoanStatusHistory>, LoanError> {
        let loan = self.load_for_view(actor, loan_id).await?;
        Ok(self.store.history(loan.id).await?)
    }

    // ── Access ──

    pub(super) async fn load(&self, loan_id: Uuid) -> Result<LoanRequest, LoanError> {
        self.store
            .load_loan(loan_id)
            .await?
            .ok_or(LoanError::loan_not_found(loan_id))
    }

    /// Load a loan the actor may act on as borrower, referring broker or staff
    pub(super) async fn load_for_action(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<LoanRequest, LoanError> {
        let loan = self.load(loan_id).await?;
        if can_act(actor, &loan) {
            Ok(loan)
        } else {
            Err(self.ownership_denied(actor, &loan).await?)
        }
    }

    pub(super) async fn load_for_view(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<LoanRequest, LoanError> {
        let loan = self.load(loan_id).await?;
        if can_view(actor, &loan) {
            Ok(loan)
        } else {
            Err(self.ownership_denied(actor, &loan).await?)
        }
    }

    /// Ownership mismatch. When the actor's email matches the owner's the
    /// denial says so, but re-ownership itself is an admin operation.
    ///
    /// A store failure while comparing accounts is returned as the error
    /// rather than reported as a plain denial.
    async fn ownership_denied(
        &self,
        actor: &Actor,
        loan: &LoanRequest,
    ) -> Result<LoanError, LoanError> {
        let reassignable = if actor.role == Role::Borrower {
            let caller = self.store.load_user(actor.user_id).await?;
            let owner = self.store.load_user(loan.borrower_id).await?;
            matches!((caller, owner), (Some(c), Some(o)) if c.email.eq_ignore_ascii_case(&o.email))
        } else {
            false
        };
        if reassignable {
            info!(
                loan_id = %loan.id,
                actor_id = %actor.user_id,
                "Ownership mismatch with matching email; admin reassignment required"
            );
        }
        Ok(LoanError::AccessDenied {
            reason: format!("loan {} does not belong to this user", loan.loan_number),
            reassignable,
        })
    }
}
