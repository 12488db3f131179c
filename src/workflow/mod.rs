//! Loan Lifecycle Workflow
//!
//! The status state machine: the transition catalog, guard evaluation with
//! explicit operations overrides, the engine that commits transitions, and
//! post-commit side effects.

pub mod documents;
pub mod effects;
pub mod engine;
pub mod guards;
pub mod payments;
pub mod queries;
pub mod state;
pub mod transitions;

pub use effects::SideEffect;
pub use engine::{ApplicationArtifacts, LoanWorkflow, NeedsListCompletion, QuoteSubmission};
pub use guards::{Clearance, GuardResult};
pub use payments::PaymentConfirmation;
pub use queries::{PipelineSummary, StatusCount};
pub use state::{Blocker, BlockerType};
pub use transitions::Transition;
