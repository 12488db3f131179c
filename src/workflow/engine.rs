//! Loan Workflow Engine
//!
//! Owns `status` and `current_step`. Every operation follows the same shape:
//! load, authorize, evaluate guards, mutate a copy, commit atomically with
//! its history rows, then dispatch the planned side effects.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use loan_types::{LoanStatus, QuoteData, Role};

use super::effects::{self, SideEffect};
use super::guards::{self, Clearance};
use super::state::Blocker;
use super::transitions::{self, Transition};
use crate::config::LoanConfig;
use crate::eligibility::{self, EligibilityDecision};
use crate::error::LoanError;
use crate::models::{Actor, Flag, LoanRequest, LoanStatusHistory, PropertyInfo};
use crate::needs_list::{self, ReconcilePolicy, Reconciliation};
use crate::quote;
use crate::services::{DocumentRenderer, NotificationSink, PaymentProvider};
use crate::store::{LoanCommit, LoanStore};

/// The loan lifecycle engine
pub struct LoanWorkflow {
    pub(super) store: Arc<dyn LoanStore>,
    pub(super) notifier: Arc<dyn NotificationSink>,
    pub(super) renderer: Arc<dyn DocumentRenderer>,
    pub(super) payments: Arc<dyn PaymentProvider>,
    pub(super) config: Arc<LoanConfig>,
}

/// Result of a successful quote submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSubmission {
    pub loan: LoanRequest,
    pub eligibility: EligibilityDecision,
}

/// Artifacts rendered by the full application
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationArtifacts {
    pub loan: LoanRequest,
    /// None when rendering failed; the transition still committed
    pub pdf_url: Option<String>,
    pub term_sheet_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsListCompletion {
    pub loan: LoanRequest,
    /// Still reported when the gate was bypassed
    pub missing_items: Vec<String>,
    pub bypassed: bool,
}

impl LoanWorkflow {
    pub fn new(
        store: Arc<dyn LoanStore>,
        notifier: Arc<dyn NotificationSink>,
        renderer: Arc<dyn DocumentRenderer>,
        payments: Arc<dyn PaymentProvider>,
        config: Arc<LoanConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            renderer,
            payments,
            config,
        }
    }

    pub fn config(&self) -> &LoanConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn LoanStore {
        self.store.as_ref()
    }

    // ── Creation ──

    /// Create a loan in `new_request` with the standard needs-list folders
    pub async fn create_loan(
        &self,
        actor: &Actor,
        borrower_id: Uuid,
        property: PropertyInfo,
    ) -> Result<LoanRequest, LoanError> {
        if actor.role == Role::Borrower && actor.user_id != borrower_id {
            return Err(LoanError::denied("borrowers can only create their own loans"));
        }
        if matches!(actor.role, Role::Investor) {
            return Err(LoanError::denied("investors cannot create loans"));
        }
        let borrower = self
            .store
            .load_user(borrower_id)
            .await?
            .ok_or(LoanError::NotFound {
                entity: "User",
                id: borrower_id,
            })?;
        if borrower.role != Role::Borrower {
            return Err(LoanError::Validation(format!(
                "user {borrower_id} is not a borrower"
            )));
        }
        let broker_id = (actor.role == Role::Broker).then_some(actor.user_id);

        let year = Utc::now().year();
        let seq = self.store.next_loan_sequence(year).await?;
        let loan_number = format!("{}-{}-{:04}", self.config.loan_number_prefix, year, seq);

        let loan = LoanRequest::new(loan_number, borrower_id, broker_id, property);
        let items = needs_list::standard_items(
            loan.id,
            &self.config.needs_list,
            loan.property.request_type.as_deref(),
        );
        let mut commit = LoanCommit::insert(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some("Loan request created".to_string()),
        ));
        commit.new_items = items;

        let effects = vec![
            SideEffect::notify(
                borrower_id,
                "Loan request created",
                format!("Your loan request {} has been created", loan.loan_number),
            ),
            SideEffect::notify_ops(
                "New loan request",
                format!("Loan {} was created", loan.loan_number),
            ),
        ];
        self.commit(commit, None, effects).await
    }

    /// Replace the borrower-supplied property inputs before a term sheet exists
    pub async fn update_loan(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        property: PropertyInfo,
    ) -> Result<LoanRequest, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        if !Transition::IssueSoftQuote.permits(loan.status) {
            return Err(LoanError::Validation(format!(
                "loan details are locked once the loan is {}",
                loan.status
            )));
        }
        loan.property = property;
        loan.recompute_derived();
        Ok(self.store.commit(LoanCommit::update(loan)).await?)
    }

    // ── Catalogued transitions ──

    /// `new_request` -> `quote_requested`, or `declined` when ineligible
    pub async fn submit_for_quote(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<QuoteSubmission, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        ensure_permitted(Transition::SubmitForQuote, &loan)?;

        let verified = self.borrower_email_verified(actor, &loan).await?;
        let clearance = guards::clear(
            guards::submit_for_quote(&loan, verified),
            Transition::SubmitForQuote,
            &loan,
            actor,
            false,
        )?;

        loan.recompute_derived();
        let decision = eligibility::evaluate(&loan.property, &self.config.eligibility);
        if let EligibilityDecision::Declined { reason, dscr } = &decision {
            return Err(self.decline(actor, loan, reason.clone(), *dscr).await);
        }

        let from = loan.status;
        Transition::SubmitForQuote.apply(&mut loan);
        let mut note = clearance
            .note()
            .map(str::to_string)
            .unwrap_or_else(|| "Submitted for quote".to_string());
        if let EligibilityDecision::Exempt { basis, .. } = &decision {
            note.push_str(&format!("; DSCR exempt ({basis})"));
        }
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(note),
        ));
        let effects = vec![
            SideEffect::notify_ops(
                "New quote request",
                format!("Loan {} is ready for a quote", loan.loan_number),
            ),
            SideEffect::notify(
                loan.borrower_id,
                "Quote requested",
                format!("We received your quote request for {}", loan.loan_number),
            ),
        ];
        let loan = self.commit(commit, Some(from), effects).await?;
        Ok(QuoteSubmission {
            loan,
            eligibility: decision,
        })
    }

    /// Price the loan and move it to `soft_quote_issued`. Free; no payment gate.
    pub async fn generate_soft_quote(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<QuoteData, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        ensure_permitted(Transition::IssueSoftQuote, &loan)?;

        loan.recompute_derived();
        if let EligibilityDecision::Declined { reason, dscr } =
            eligibility::evaluate(&loan.property, &self.config.eligibility)
        {
            return Err(self.decline(actor, loan, reason, dscr).await);
        }

        let quote =
            quote::generate_quote(&loan.property, &self.config).map_err(|missing| {
                LoanError::PreconditionFailed {
                    transition: Transition::IssueSoftQuote.name(),
                    blockers: vec![Blocker::field(missing.field)],
                }
            })?;

        let from = loan.status;
        loan.soft_quote = Some(quote.clone());
        loan.flags.set(Flag::SoftQuoteGenerated);
        Transition::IssueSoftQuote.apply(&mut loan);
        let note = format!(
            "Soft quote generated: {}% - {}%",
            quote.rate_range.min_rate, quote.rate_range.max_rate
        );
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(note),
        ));
        let effects = vec![SideEffect::notify(
            loan.borrower_id,
            "Soft quote ready",
            format!("Your soft quote for {} is ready", loan.loan_number),
        )];
        self.commit(commit, Some(from), effects).await?;
        Ok(quote)
    }

    /// Render the application and the formal term sheet; `term_sheet_issued`
    pub async fn submit_full_application(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        application_data: Value,
    ) -> Result<ApplicationArtifacts, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        ensure_permitted(Transition::IssueTermSheet, &loan)?;

        let clearance = guards::clear(
            guards::full_application(&loan),
            Transition::IssueTermSheet,
            &loan,
            actor,
            false,
        )?;
        let quote = loan.soft_quote.clone().ok_or_else(|| LoanError::PreconditionFailed {
            transition: Transition::IssueTermSheet.name(),
            blockers: guards::full_application(&loan).blockers,
        })?;

        // Rendered before commit because the URLs are persisted on the loan
        let pdf_url = match self
            .renderer
            .render_application_pdf(&loan, &application_data)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(loan_id = %loan.id, error = %e, "Application PDF rendering failed");
                None
            }
        };
        let term_sheet_url = match self.renderer.render_term_sheet(&loan, &quote).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(loan_id = %loan.id, error = %e, "Term sheet rendering failed");
                None
            }
        };

        let from = loan.status;
        loan.application_data = Some(application_data);
        loan.application_pdf_url = pdf_url.clone();
        loan.term_sheet_url = term_sheet_url.clone();
        loan.flags.set(Flag::FullApplicationCompleted);
        Transition::IssueTermSheet.apply(&mut loan);

        let note = clearance
            .note()
            .map(str::to_string)
            .unwrap_or_else(|| "Full application submitted; term sheet issued".to_string());
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(note),
        ));
        let effects = vec![
            SideEffect::notify(
                loan.borrower_id,
                "Term sheet issued",
                format!("Your term sheet for {} is ready to sign", loan.loan_number),
            ),
            SideEffect::notify_ops(
                "Full application submitted",
                format!("Loan {} submitted a full application", loan.loan_number),
            ),
        ];
        let loan = self.commit(commit, Some(from), effects).await?;
        Ok(ApplicationArtifacts {
            loan,
            pdf_url,
            term_sheet_url,
        })
    }

    /// Sign and cascade to `needs_list_sent` in one commit
    pub async fn sign_term_sheet(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<LoanRequest, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        ensure_permitted(Transition::SignTermSheet, &loan)?;

        let clearance = guards::clear(
            guards::sign_term_sheet(&loan),
            Transition::SignTermSheet,
            &loan,
            actor,
            false,
        )?;

        let from = loan.status;
        loan.flags.set(Flag::TermSheetSigned);
        loan.term_sheet_signed_at = Some(Utc::now());
        Transition::SignTermSheet.apply(&mut loan);
        let signed = LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(
                clearance
                    .note()
                    .map(str::to_string)
                    .unwrap_or_else(|| "Term sheet signed".to_string()),
            ),
        );

        let mut items = self.store.needs_list_items(loan.id).await?;
        let generated = if items.is_empty() {
            let fresh = needs_list::standard_items(
                loan.id,
                &self.config.needs_list,
                loan.property.request_type.as_deref(),
            );
            items = fresh.clone();
            fresh
        } else {
            Vec::new()
        };

        Transition::SendNeedsList.apply(&mut loan);
        let sent = LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(format!("Needs list sent ({} items)", items.len())),
        );

        let mut commit = LoanCommit::update(loan.clone());
        commit.history = vec![signed, sent];
        commit.new_items = generated;

        let item_names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        let effects = vec![
            SideEffect::email(
                "needs_list",
                loan.borrower_id,
                json!({ "loanNumber": loan.loan_number, "items": item_names }),
            ),
            SideEffect::notify(
                loan.borrower_id,
                "Needs list sent",
                format!("Please upload the documents requested for {}", loan.loan_number),
            ),
            SideEffect::notify_ops(
                "Term sheet signed",
                format!("Loan {} signed its term sheet", loan.loan_number),
            ),
        ];
        self.commit(commit, Some(from), effects).await
    }

    /// Gate `needs_list_complete` on the reconciliation verdict
    pub async fn complete_needs_list(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<NeedsListCompletion, LoanError> {
        let mut loan = self.load_for_action(actor, loan_id).await?;
        ensure_permitted(Transition::CompleteNeedsList, &loan)?;

        // Document deletes bump the loan version, so a verdict made stale by a
        // concurrent delete fails the commit below
        let reconciliation = self.reconcile(&loan).await?;
        let clearance = guards::clear(
            guards::complete_needs_list(&reconciliation),
            Transition::CompleteNeedsList,
            &loan,
            actor,
            self.config.needs_list.bypass_enabled,
        )?;

        let from = loan.status;
        Transition::CompleteNeedsList.apply(&mut loan);
        let note = clearance
            .note()
            .map(str::to_string)
            .unwrap_or_else(|| "All required documents received".to_string());
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(note),
        ));
        let effects = vec![SideEffect::notify_ops(
            "Needs list complete",
            format!("Loan {} is ready for appraisal", loan.loan_number),
        )];
        let loan = self.commit(commit, Some(from), effects).await?;
        Ok(NeedsListCompletion {
            loan,
            missing_items: reconciliation.missing_items,
            bypassed: matches!(clearance, Clearance::Overridden { .. }),
        })
    }

    /// Per-item fulfillment, folder summaries and the completion verdict
    pub async fn reconcile_needs_list(
        &self,
        actor: &Actor,
        loan_id: Uuid,
    ) -> Result<Reconciliation, LoanError> {
        let loan = self.load_for_view(actor, loan_id).await?;
        self.reconcile(&loan).await
    }

    // ── Staff paths ──

    /// Operations override: set any status, recorded with a mandatory note
    pub async fn update_status(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        new_status: LoanStatus,
        notes: &str,
    ) -> Result<LoanRequest, LoanError> {
        if !actor.is_staff() {
            return Err(LoanError::denied("status updates require operations or admin"));
        }
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(LoanError::Validation(
                "a note is required for a status update".to_string(),
            ));
        }
        let mut loan = self.load(loan_id).await?;
        let from = loan.status;
        let on_graph = transitions::can_transition(from, new_status);
        if !on_graph {
            warn!(
                loan_id = %loan.id,
                actor_id = %actor.user_id,
                role = %actor.role,
                %from,
                to = %new_status,
                "Operations status override off the forward graph"
            );
        }

        loan.status = new_status;
        loan.advance_step(new_status.milestone_step());
        if new_status == LoanStatus::Declined {
            loan.decline_reason = Some(notes.to_string());
        }
        let note = if on_graph {
            notes.to_string()
        } else {
            format!("[override] {from} -> {new_status}: {notes}")
        };
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(note),
        ));
        let effects = vec![SideEffect::notify(
            loan.borrower_id,
            "Loan status updated",
            format!("{} is now: {}", loan.loan_number, new_status.label()),
        )];
        self.commit(commit, Some(from), effects).await
    }

    /// Staff advance along the forward graph through the post-needs-list stages
    pub async fn advance_status(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        to: LoanStatus,
    ) -> Result<LoanRequest, LoanError> {
        if !actor.is_staff() {
            return Err(LoanError::denied("only operations can advance a loan"));
        }
        if !transitions::is_staff_advanced(to) {
            return Err(LoanError::Validation(format!(
                "{to} is reached through its own operation"
            )));
        }
        let mut loan = self.load(loan_id).await?;
        let from = loan.status;
        if !transitions::can_transition(from, to) {
            return Err(LoanError::InvalidTransition { from, to });
        }

        loan.status = to;
        loan.advance_step(to.milestone_step());
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(format!("Advanced to {}", to.label())),
        ));
        let effects = vec![SideEffect::notify(
            loan.borrower_id,
            "Loan status updated",
            format!("{} is now: {}", loan.loan_number, to.label()),
        )];
        self.commit(commit, Some(from), effects).await
    }

    /// Explicit administrative re-ownership; replaces email-match re-parenting
    pub async fn reassign_owner(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        new_owner_id: Uuid,
        reason: &str,
    ) -> Result<LoanRequest, LoanError> {
        if actor.role != Role::Admin {
            return Err(LoanError::denied("only an admin can reassign a loan"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LoanError::Validation(
                "a reason is required to reassign a loan".to_string(),
            ));
        }
        let new_owner = self
            .store
            .load_user(new_owner_id)
            .await?
            .ok_or(LoanError::NotFound {
                entity: "User",
                id: new_owner_id,
            })?;
        if new_owner.role != Role::Borrower {
            return Err(LoanError::Validation(format!(
                "user {new_owner_id} is not a borrower"
            )));
        }

        let mut loan = self.load(loan_id).await?;
        let previous = loan.borrower_id;
        if previous == new_owner_id {
            return Ok(loan);
        }
        warn!(
            loan_id = %loan.id,
            actor_id = %actor.user_id,
            %previous,
            new_owner = %new_owner_id,
            reason,
            "Loan ownership reassigned"
        );
        loan.borrower_id = new_owner_id;
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(format!(
                "[override] ownership reassigned from {previous} to {new_owner_id}: {reason}"
            )),
        ));
        let effects = vec![SideEffect::notify(
            new_owner_id,
            "Loan assigned to you",
            format!("Loan {} is now linked to your account", loan.loan_number),
        )];
        self.commit(commit, None, effects).await
    }

    // ── Internals ──

    /// Commit the auto-decline and hand back the error to surface
    async fn decline(
        &self,
        actor: &Actor,
        mut loan: LoanRequest,
        reason: String,
        dscr: Option<Decimal>,
    ) -> LoanError {
        let from = loan.status;
        loan.flags.set(Flag::DscrAutoDeclined);
        loan.decline_reason = Some(reason.clone());
        Transition::AutoDecline.apply(&mut loan);
        let commit = LoanCommit::update(loan.clone()).with_history(LoanStatusHistory::snapshot(
            &loan,
            Some(actor.user_id),
            Some(format!("Auto-declined: {reason}")),
        ));
        let effects = vec![
            SideEffect::notify(
                loan.borrower_id,
                "Loan request declined",
                format!("{} was declined: {reason}", loan.loan_number),
            ),
            SideEffect::notify_ops(
                "Loan auto-declined",
                format!("{} was auto-declined: {reason}", loan.loan_number),
            ),
        ];
        match self.commit(commit, Some(from), effects).await {
            Ok(_) => LoanError::EligibilityDeclined { reason, dscr },
            Err(e) => e,
        }
    }

    pub(super) async fn reconcile(&self, loan: &LoanRequest) -> Result<Reconciliation, LoanError> {
        let items = self.store.needs_list_items(loan.id).await?;
        let documents = self.store.documents(loan.id).await?;
        let policy = ReconcilePolicy::from_config(&self.config.needs_list);
        Ok(needs_list::reconcile(
            loan.id,
            &items,
            &documents,
            &policy,
            Utc::now(),
        ))
    }

    async fn borrower_email_verified(
        &self,
        actor: &Actor,
        loan: &LoanRequest,
    ) -> Result<bool, LoanError> {
        if actor.user_id == loan.borrower_id {
            return Ok(actor.email_verified);
        }
        Ok(self
            .store
            .load_user(loan.borrower_id)
            .await?
            .is_some_and(|u| u.email_verified))
    }

    /// Apply a commit, log it and dispatch its effects
    pub(super) async fn commit(
        &self,
        commit: LoanCommit,
        from: Option<LoanStatus>,
        effects: Vec<SideEffect>,
    ) -> Result<LoanRequest, LoanError> {
        let rows = commit.history.len();
        let loan = self.store.commit(commit).await?;
        info!(
            loan_id = %loan.id,
            loan_number = %loan.loan_number,
            from = from.map(|s| s.as_str()).unwrap_or("-"),
            to = %loan.status,
            step = loan.current_step,
            history_rows = rows,
            "Loan committed"
        );
        effects::dispatch(effects, self.store.as_ref(), self.notifier.as_ref()).await;
        Ok(loan)
    }
}

fn ensure_permitted(transition: Transition, loan: &LoanRequest) -> Result<(), LoanError> {
    if transition.permits(loan.status) {
        Ok(())
    } else {
        Err(LoanError::InvalidTransition {
            from: loan.status,
            to: transition.target(),
        })
    }
}
