//! External Collaborators
//!
//! Notification dispatch, document rendering and the payment provider are
//! injected into the workflow engine. The engine never depends on a concrete
//! vendor; recording implementations back the tests and the CLI demo.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use loan_types::{FeeType, PaymentIntent, QuoteData};

use crate::models::LoanRequest;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Rendering failed: {0}")]
    Rendering(String),

    #[error("Payment provider error: {0}")]
    Payment(String),
}

/// In-app notifications and transactional email
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: Uuid, title: &str, message: &str) -> Result<(), ServiceError>;

    async fn send_email(
        &self,
        template: &str,
        recipient: &str,
        data: &Value,
    ) -> Result<(), ServiceError>;
}

/// Opaque artifact producer; returns the URL of the rendered file
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_term_sheet(
        &self,
        loan: &LoanRequest,
        quote: &QuoteData,
    ) -> Result<String, ServiceError>;

    async fn render_application_pdf(
        &self,
        loan: &LoanRequest,
        data: &Value,
    ) -> Result<String, ServiceError>;
}

/// Metadata attached to a payment intent so the confirmation can be routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub loan_id: Uuid,
    pub loan_number: String,
    pub fee_type: FeeType,
    pub requested_by: Uuid,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, ServiceError>;
}

// ============================================================================
// Recording implementations
// ============================================================================

/// A message captured by `RecordingNotifier`
#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Notification {
        user_id: Uuid,
        title: String,
        message: String,
    },
    Email {
        template: String,
        recipient: String,
        data: Value,
    },
}

/// Keeps every message in memory; optionally fails every call
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn notifications_for(&self, user_id: Uuid) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Notification {
                    user_id: to, title, ..
                } if to == user_id => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn emails(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Email {
                    template,
                    recipient,
                    ..
                } => Some((template, recipient)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, message: SentMessage) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::Notification("delivery disabled".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, title: &str, message: &str) -> Result<(), ServiceError> {
        self.record(SentMessage::Notification {
            user_id,
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    async fn send_email(
        &self,
        template: &str,
        recipient: &str,
        data: &Value,
    ) -> Result<(), ServiceError> {
        self.record(SentMessage::Email {
            template: template.to_string(),
            recipient: recipient.to_string(),
            data: data.clone(),
        })
    }
}

/// Produces deterministic `memory://` URLs without rendering anything
#[derive(Debug, Default)]
pub struct StubRenderer {
    fail: bool,
}

impl StubRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl DocumentRenderer for StubRenderer {
    async fn render_term_sheet(
        &self,
        loan: &LoanRequest,
        _quote: &QuoteData,
    ) -> Result<String, ServiceError> {
        if self.fail {
            return Err(ServiceError::Rendering("renderer unavailable".to_string()));
        }
        Ok(format!("memory://term-sheets/{}.pdf", loan.loan_number))
    }

    async fn render_application_pdf(
        &self,
        loan: &LoanRequest,
        _data: &Value,
    ) -> Result<String, ServiceError> {
        if self.fail {
            return Err(ServiceError::Rendering("renderer unavailable".to_string()));
        }
        Ok(format!("memory://applications/{}.pdf", loan.loan_number))
    }
}

/// Issues sequential intent ids without contacting a provider
#[derive(Debug, Default)]
pub struct StubPaymentProvider {
    issued: Mutex<u32>,
}

impl StubPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentProvider for StubPaymentProvider {
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        let seq = {
            let mut issued = self
                .issued
                .lock()
                .map_err(|_| ServiceError::Payment("intent counter poisoned".to_string()))?;
            *issued += 1;
            *issued
        };
        let id = format!("pi_{}_{:04}", metadata.fee_type, seq);
        Ok(PaymentIntent {
            client_secret: format!("{id}_secret"),
            id,
            amount,
            fee_type: metadata.fee_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier_captures_messages() {
        let sink = RecordingNotifier::new();
        let user = Uuid::new_v4();
        sink.notify(user, "Quote requested", "RPC-2026-0001")
            .await
            .unwrap();
        sink.send_email("needs_list", "b@example.com", &Value::Null)
            .await
            .unwrap();

        assert_eq!(sink.notifications_for(user), vec!["Quote requested"]);
        assert_eq!(
            sink.emails(),
            vec![("needs_list".to_string(), "b@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failing_notifier_reports_error() {
        let sink = RecordingNotifier::failing();
        assert!(sink.notify(Uuid::new_v4(), "t", "m").await.is_err());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stub_payment_intents_are_unique() {
        let provider = StubPaymentProvider::new();
        let metadata = PaymentMetadata {
            loan_id: Uuid::new_v4(),
            loan_number: "RPC-2026-0001".into(),
            fee_type: FeeType::Appraisal,
            requested_by: Uuid::new_v4(),
        };
        let a = provider
            .create_payment_intent(Decimal::from(650), &metadata)
            .await
            .unwrap();
        let b = provider
            .create_payment_intent(Decimal::from(650), &metadata)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.fee_type, FeeType::Appraisal);
        assert!(a.client_secret.starts_with(&a.id));
    }
}
