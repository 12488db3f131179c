//! Transition Blockers
//!
//! A rejected transition reports every unmet precondition as a typed
//! `Blocker` so callers can route the user to the remediation step.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use loan_types::FeeType;

/// Something preventing a transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    /// Type of blocker with details
    pub blocker_type: BlockerType,
    /// Human-readable description
    pub description: String,
    /// Operation that resolves this blocker
    pub resolution_action: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl Blocker {
    pub fn new(blocker_type: BlockerType, description: impl Into<String>) -> Self {
        let resolution_action = blocker_type.suggested_action().map(str::to_string);
        Self {
            blocker_type,
            description: description.into(),
            resolution_action,
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn payment(fee: FeeType) -> Self {
        let description = match fee {
            FeeType::Credit => "Credit report authorization required".to_string(),
            FeeType::Appraisal => "Appraisal payment authorization required".to_string(),
            other => format!("{} fee payment required", capitalize(other.as_str())),
        };
        Self::new(BlockerType::PaymentRequired { payment_type: fee }, description)
    }

    pub fn field(field: impl Into<String>) -> Self {
        let field = field.into();
        let description = format!("Required field missing: {field}");
        Self::new(BlockerType::FieldMissing { field }, description)
    }

    pub fn missing_document(name: impl Into<String>, category: Option<String>) -> Self {
        let name = name.into();
        let description = format!("No document uploaded for {name}");
        Self::new(BlockerType::MissingDocument { name, category }, description)
    }

    /// Payment type carried by a payment blocker
    pub fn payment_type(&self) -> Option<FeeType> {
        match &self.blocker_type {
            BlockerType::PaymentRequired { payment_type } => Some(*payment_type),
            _ => None,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Types of blockers with their specific data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BlockerType {
    // ─────────────────────────────────────────────────────────────────────────────
    // Borrower inputs
    // ─────────────────────────────────────────────────────────────────────────────
    /// Required loan field is missing or empty
    FieldMissing { field: String },

    /// The borrower has not verified their email address
    EmailNotVerified,

    // ─────────────────────────────────────────────────────────────────────────────
    // Payments
    // ─────────────────────────────────────────────────────────────────────────────
    /// A staged fee has not been confirmed
    PaymentRequired { payment_type: FeeType },

    // ─────────────────────────────────────────────────────────────────────────────
    // Artifacts
    // ─────────────────────────────────────────────────────────────────────────────
    /// No soft quote has been generated yet
    SoftQuoteMissing,

    /// A rendered document (term sheet, application PDF) is absent
    ArtifactMissing { artifact: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Needs list
    // ─────────────────────────────────────────────────────────────────────────────
    /// Required needs-list item without any document
    MissingDocument {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
}

impl BlockerType {
    /// Operation that resolves this blocker
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            BlockerType::FieldMissing { .. } => Some("update_loan"),
            BlockerType::EmailNotVerified => Some("verify_email"),
            BlockerType::PaymentRequired { .. } => Some("request_payment"),
            BlockerType::SoftQuoteMissing => Some("generate_soft_quote"),
            BlockerType::ArtifactMissing { .. } => Some("submit_full_application"),
            BlockerType::MissingDocument { .. } => Some("upload_document"),
        }
    }

    /// Borrower-facing preconditions staff may override. Missing loan data
    /// and a missing soft quote cannot be waived: later steps consume them.
    pub fn is_overridable(&self) -> bool {
        !matches!(
            self,
            BlockerType::FieldMissing { .. } | BlockerType::SoftQuoteMissing
        )
    }
}
