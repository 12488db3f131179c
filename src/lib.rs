//! Loan Origination - bridge-loan lifecycle engine
//!
//! Owns the loan status state machine and the needs-list reconciliation
//! that gates it. Persistence, notifications, rendering and payments are
//! injected collaborators.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loan_origination::config::LoanConfig;
//! use loan_origination::services::{RecordingNotifier, StubPaymentProvider, StubRenderer};
//! use loan_origination::store::MemoryStore;
//! use loan_origination::workflow::LoanWorkflow;
//!
//! let workflow = LoanWorkflow::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RecordingNotifier::new()),
//!     Arc::new(StubRenderer::new()),
//!     Arc::new(StubPaymentProvider::new()),
//!     Arc::new(LoanConfig::default()),
//! );
//! ```

// Core error handling
pub mod error;

// Business configuration (eligibility, pricing, fees, folders)
pub mod config;

// Domain records
pub mod models;

// Pure business rules
pub mod eligibility;
pub mod needs_list;
pub mod quote;

// Persistence (in-memory always, Postgres with the database feature)
pub mod store;

// Injected collaborators
pub mod services;

// The lifecycle state machine
pub mod workflow;

pub use error::LoanError;
pub use loan_types::{FeeType, LoanStatus, Role};
pub use workflow::LoanWorkflow;
