//! Staged Fee Payments
//!
//! Intents are created through the payment provider; confirmations arrive
//! from a webhook or a manual confirm and raise the sticky paid flag.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use loan_types::{FeeType, LoanStatus, PaymentIntent};

use super::effects::SideEffect;
use super::engine::LoanWorkflow;
use crate::error::LoanError;
use crate::models::{Actor, Flag, LoanRequest, LoanStatusHistory, Payment};
use crate::services::PaymentMetadata;
use crate::store::{LoanCommit, StoreError};

/// Confirmations merge idempotently, so a lost race is simply retried
const MAX_CONFIRM_ATTEMPTS: usize = 3;

/// Step the loan reaches once the appraisal is paid
const APPRAISAL_PAID_STEP: u8 = 8;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub loan: LoanRequest,
    /// The payment id had already been recorded; nothing changed
    pub already_recorded: bool,
}

impl LoanWorkflow {
    /// Create a payment intent for a staged fee at the scheduled amount
    pub async fn request_payment(
        &self,
        actor: &Actor,
        loan_id: Uuid,
        fee: FeeType,
    ) -> Result<PaymentIntent, LoanError> {
        let loan = self.load_for_action(actor, loan_id).await?;
        if loan.status == LoanStatus::Declined {
            return Err(LoanError::Validation(format!(
                "loan {} is declined",
                loan.loan_number
            )));
        }
        if loan.flags.fee_paid(fee) {
            return Err(LoanError::Validation(format!(
                "{fee} fee already paid for {}",
                loan.loan_number
            )));
        }

        let amount = self.config.fees.amount(fee);
        let metadata = PaymentMetadata {
            loan_id: loan.id,
            loan_number: loan.loan_number.clone(),
            fee_type: fee,
            requested_by: actor.user_id,
        };
        let intent = self.payments.create_payment_intent(amount, &metadata).await?;
        info!(
            loan_id = %loan.id,
            fee = %fee,
            %amount,
            intent_id = %intent.id,
            "Payment intent created"
        );
        Ok(intent)
    }

    /// Record a confirmed payment. Idempotent per provider payment id.
    pub async fn confirm_payment(
        &self,
        loan_id: Uuid,
        fee: FeeType,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<PaymentConfirmation, LoanError> {
        let payment_id = payment_id.trim();
        if payment_id.is_empty() {
            return Err(LoanError::Validation("payment id is required".to_string()));
        }
        if let Some(existing) = self.store.find_payment(payment_id).await? {
            return self.already_recorded(&existing, loan_id).await;
        }

        let mut attempt = 0;
        let loan = loop {
            attempt += 1;
            let mut loan = self.load(loan_id).await?;
            let from = loan.status;

            loan.flags.set(Flag::for_fee(fee));
            match fee {
                FeeType::Credit if loan.credit_payment_id.is_none() => {
                    loan.credit_payment_id = Some(payment_id.to_string());
                }
                FeeType::Appraisal => loan.advance_step(APPRAISAL_PAID_STEP),
                _ => {}
            }

            let history = LoanStatusHistory::snapshot(
                &loan,
                None,
                Some(format!("{fee} payment confirmed ({payment_id})")),
            );
            let mut commit = LoanCommit::update(loan).with_history(history);
            commit.payments.push(Payment {
                id: Uuid::new_v4(),
                loan_id,
                fee_type: fee,
                payment_id: payment_id.to_string(),
                amount,
                confirmed_at: Utc::now(),
            });

            match self.store.commit(commit).await {
                Ok(stored) => {
                    info!(
                        loan_id = %stored.id,
                        fee = %fee,
                        payment_id,
                        %from,
                        step = stored.current_step,
                        "Payment confirmed"
                    );
                    break stored;
                }
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_CONFIRM_ATTEMPTS => {
                    debug!(%loan_id, attempt, "Payment confirmation raced; retrying");
                }
                Err(StoreError::DuplicatePayment(_)) => {
                    // Another delivery of the same webhook won the race
                    let existing = self.store.find_payment(payment_id).await?.ok_or_else(|| {
                        LoanError::Store(StoreError::Corrupt(format!(
                            "payment {payment_id} reported duplicate but not found"
                        )))
                    })?;
                    return self.already_recorded(&existing, loan_id).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut effects = vec![SideEffect::notify(
            loan.borrower_id,
            "Payment received",
            format!("Your {fee} payment for {} was received", loan.loan_number),
        )];
        if fee == FeeType::Appraisal {
            effects.push(SideEffect::notify_ops(
                "Appraisal paid",
                format!("Loan {} paid for its appraisal", loan.loan_number),
            ));
        }
        super::effects::dispatch(effects, self.store.as_ref(), self.notifier.as_ref()).await;

        Ok(PaymentConfirmation {
            loan,
            already_recorded: false,
        })
    }

    async fn already_recorded(
        &self,
        existing: &Payment,
        loan_id: Uuid,
    ) -> Result<PaymentConfirmation, LoanError> {
        if existing.loan_id != loan_id {
            return Err(LoanError::Validation(format!(
                "payment {} belongs to another loan",
                existing.payment_id
            )));
        }
        debug!(payment_id = %existing.payment_id, "Payment already recorded");
        Ok(PaymentConfirmation {
            loan: self.load(loan_id).await?,
            already_recorded: true,
        })
    }
}
