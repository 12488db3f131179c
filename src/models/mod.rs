//! Domain records: loans, history, needs-list items, documents, users

pub mod actor;
pub mod documents;
pub mod loan;

pub use actor::{Actor, User};
pub use documents::{Document, NeedsListItem, NewDocument, NewNeedsListItem};
pub use loan::{Flag, LoanFlags, LoanRequest, LoanStatusHistory, Payment, PropertyInfo};
