//! Loan Persistence
//!
//! The workflow engine operates exclusively through `LoanStore`, so the
//! in-memory backend and Postgres are interchangeable.
//!
//! All loan mutations go through `commit`: the loan row, its history rows,
//! new needs-list items and payment records land together or not at all.
//! The expected version on the commit guards against lost updates when two
//! actions on the same loan race.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgLoanStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use loan_types::{LoanStatus, Role};

use crate::models::{
    Document, LoanRequest, LoanStatusHistory, NeedsListItem, Payment, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Loan {loan_id} was modified concurrently (expected version {expected})")]
    VersionConflict { loan_id: Uuid, expected: i64 },

    #[error("Loan {0} already exists")]
    DuplicateLoan(Uuid),

    #[error("Payment {0} already recorded")]
    DuplicatePayment(String),

    #[error("Loan {0} not found")]
    LoanNotFound(Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One atomic unit of loan mutation
#[derive(Debug, Clone)]
pub struct LoanCommit {
    /// Loan state to persist
    pub loan: LoanRequest,
    /// Stored version the loan was read at; None inserts a new loan
    pub expected_version: Option<i64>,
    pub history: Vec<LoanStatusHistory>,
    pub new_items: Vec<NeedsListItem>,
    pub payments: Vec<Payment>,
}

impl LoanCommit {
    pub fn insert(loan: LoanRequest) -> Self {
        Self {
            loan,
            expected_version: None,
            history: Vec::new(),
            new_items: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub fn update(loan: LoanRequest) -> Self {
        let expected = loan.version;
        Self {
            expected_version: Some(expected),
            ..Self::insert(loan)
        }
    }

    pub fn with_history(mut self, row: LoanStatusHistory) -> Self {
        self.history.push(row);
        self
    }
}

/// Loan listing filter; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub borrower_id: Option<Uuid>,
    pub broker_id: Option<Uuid>,
    pub statuses: Option<Vec<LoanStatus>>,
}

impl LoanFilter {
    pub fn matches(&self, loan: &LoanRequest) -> bool {
        self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.broker_id.map_or(true, |id| loan.broker_id == Some(id))
            && self
                .statuses
                .as_ref()
                .map_or(true, |statuses| statuses.contains(&loan.status))
    }
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    // ── Users ──

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn load_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError>;

    // ── Loans ──

    /// Next sequence number for loan numbers issued in `year`, starting at 1
    async fn next_loan_sequence(&self, year: i32) -> Result<u32, StoreError>;

    /// Apply a commit atomically and return the stored loan.
    ///
    /// Stored flags are unioned with the committed ones so a stale write can
    /// never clear a paid flag. The stored version is bumped by one.
    async fn commit(&self, commit: LoanCommit) -> Result<LoanRequest, StoreError>;

    async fn load_loan(&self, id: Uuid) -> Result<Option<LoanRequest>, StoreError>;
    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanRequest>, StoreError>;

    // ── History (append-only, written by commit) ──

    async fn history(&self, loan_id: Uuid) -> Result<Vec<LoanStatusHistory>, StoreError>;

    // ── Needs list ──

    async fn needs_list_items(&self, loan_id: Uuid) -> Result<Vec<NeedsListItem>, StoreError>;
    async fn insert_needs_list_item(&self, item: &NeedsListItem) -> Result<(), StoreError>;

    // ── Documents ──

    async fn documents(&self, loan_id: Uuid) -> Result<Vec<Document>, StoreError>;
    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError>;
    async fn insert_document(&self, document: &Document) -> Result<(), StoreError>;
    /// Persist status and review fields
    async fn update_document_review(&self, document: &Document) -> Result<(), StoreError>;
    /// Remove a document and bump its loan's version in the same write, so a
    /// needs-list verdict computed before the removal cannot commit.
    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError>;

    // ── Payments (written by commit) ──

    async fn find_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError>;
}
