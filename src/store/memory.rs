//! In-memory `LoanStore`
//!
//! A single mutex around all tables makes every commit atomic. Used by tests,
//! the CLI demo and anywhere a database is not wanted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use loan_types::Role;

use super::{LoanCommit, LoanFilter, LoanStore, StoreError};
use crate::models::{Document, LoanRequest, LoanStatusHistory, NeedsListItem, Payment, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    loans: HashMap<Uuid, LoanRequest>,
    history: Vec<LoanStatusHistory>,
    items: Vec<NeedsListItem>,
    documents: Vec<Document>,
    payments: HashMap<String, Payment>,
    sequences: HashMap<i32, u32>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.tables.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn load_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn next_loan_sequence(&self, year: i32) -> Result<u32, StoreError> {
        let mut tables = self.tables.lock().await;
        let seq = tables.sequences.entry(year).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn commit(&self, commit: LoanCommit) -> Result<LoanRequest, StoreError> {
        let mut tables = self.tables.lock().await;
        let LoanCommit {
            mut loan,
            expected_version,
            history,
            new_items,
            payments,
        } = commit;

        // Validate everything before touching any table
        match expected_version {
            None => {
                if tables.loans.contains_key(&loan.id) {
                    return Err(StoreError::DuplicateLoan(loan.id));
                }
                loan.version = 1;
            }
            Some(expected) => {
                let stored = tables
                    .loans
                    .get(&loan.id)
                    .ok_or(StoreError::LoanNotFound(loan.id))?;
                if stored.version != expected {
                    return Err(StoreError::VersionConflict {
                        loan_id: loan.id,
                        expected,
                    });
                }
                loan.flags = loan.flags.union(stored.flags);
                loan.current_step = loan.current_step.max(stored.current_step);
                loan.version = expected + 1;
            }
        }
        if let Some(dup) = payments
            .iter()
            .find(|p| tables.payments.contains_key(&p.payment_id))
        {
            return Err(StoreError::DuplicatePayment(dup.payment_id.clone()));
        }

        loan.updated_at = Utc::now();
        tables.loans.insert(loan.id, loan.clone());
        tables.history.extend(history);
        tables.items.extend(new_items);
        for payment in payments {
            tables.payments.insert(payment.payment_id.clone(), payment);
        }
        Ok(loan)
    }

    async fn load_loan(&self, id: Uuid) -> Result<Option<LoanRequest>, StoreError> {
        Ok(self.tables.lock().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanRequest>, StoreError> {
        let tables = self.tables.lock().await;
        let mut loans: Vec<LoanRequest> = tables
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(loans)
    }

    async fn history(&self, loan_id: Uuid) -> Result<Vec<LoanStatusHistory>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| h.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn needs_list_items(&self, loan_id: Uuid) -> Result<Vec<NeedsListItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn insert_needs_list_item(&self, item: &NeedsListItem) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.loans.contains_key(&item.loan_id) {
            return Err(StoreError::LoanNotFound(item.loan_id));
        }
        tables.items.push(item.clone());
        Ok(())
    }

    async fn documents(&self, loan_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .documents
            .iter()
            .filter(|d| d.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.loans.contains_key(&document.loan_id) {
            return Err(StoreError::LoanNotFound(document.loan_id));
        }
        tables.documents.push(document.clone());
        Ok(())
    }

    async fn update_document_review(&self, document: &Document) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(stored) = tables.documents.iter_mut().find(|d| d.id == document.id) {
            stored.status = document.status;
            stored.reviewed_by = document.reviewed_by;
            stored.reviewed_at = document.reviewed_at;
            stored.review_notes = document.review_notes.clone();
        }
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(index) = tables.documents.iter().position(|d| d.id == id) else {
            return Ok(false);
        };
        let document = tables.documents.remove(index);
        if let Some(loan) = tables.loans.get_mut(&document.loan_id) {
            loan.version += 1;
            loan.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn find_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.lock().await.payments.get(payment_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoanStatusHistory, PropertyInfo};
    use loan_types::{DocumentStatus, FeeType, LoanStatus};

    fn loan() -> LoanRequest {
        LoanRequest::new(
            "RPC-2026-0001".into(),
            Uuid::new_v4(),
            None,
            PropertyInfo::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_then_update_bumps_version() {
        let store = MemoryStore::new();
        let stored = store.commit(LoanCommit::insert(loan())).await.unwrap();
        assert_eq!(stored.version, 1);

        let mut next = stored.clone();
        next.status = LoanStatus::QuoteRequested;
        let row = LoanStatusHistory::snapshot(&next, None, None);
        let stored = store
            .commit(LoanCommit::update(next).with_history(row))
            .await
            .unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(store.history(stored.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_rejected_and_nothing_written() {
        let store = MemoryStore::new();
        let stored = store.commit(LoanCommit::insert(loan())).await.unwrap();

        let first = stored.clone();
        let second = stored.clone();
        store.commit(LoanCommit::update(first)).await.unwrap();

        let row = LoanStatusHistory::snapshot(&second, None, None);
        let err = store
            .commit(LoanCommit::update(second).with_history(row))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, .. }));
        assert!(store.history(stored.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_never_clears_flags() {
        let store = MemoryStore::new();
        let mut paid = loan();
        paid.flags.set(crate::models::Flag::for_fee(FeeType::Appraisal));
        let stored = store.commit(LoanCommit::insert(paid)).await.unwrap();

        let mut stale = stored.clone();
        stale.flags = Default::default();
        stale.current_step = 1;
        let stored = store.commit(LoanCommit::update(stale)).await.unwrap();
        assert!(stored.flags.appraisal_paid);
    }

    #[tokio::test]
    async fn test_duplicate_payment_rejected() {
        let store = MemoryStore::new();
        let stored = store.commit(LoanCommit::insert(loan())).await.unwrap();
        let payment = Payment {
            id: Uuid::new_v4(),
            loan_id: stored.id,
            fee_type: FeeType::Appraisal,
            payment_id: "pi_123".into(),
            amount: None,
            confirmed_at: Utc::now(),
        };

        let mut commit = LoanCommit::update(stored);
        commit.payments.push(payment.clone());
        let stored = store.commit(commit).await.unwrap();

        let mut again = LoanCommit::update(stored);
        again.payments.push(payment);
        assert!(matches!(
            store.commit(again).await.unwrap_err(),
            StoreError::DuplicatePayment(_)
        ));
    }

    #[tokio::test]
    async fn test_document_delete_invalidates_loaded_loan() {
        let store = MemoryStore::new();
        let stored = store.commit(LoanCommit::insert(loan())).await.unwrap();
        let document = Document {
            id: Uuid::new_v4(),
            loan_id: stored.id,
            uploaded_by: stored.borrower_id,
            name: "insurance.pdf".into(),
            category: Some("insurance".into()),
            needs_list_item_id: None,
            file_url: "s3://loan-docs/insurance.pdf".into(),
            status: DocumentStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            uploaded_at: Utc::now(),
        };
        store.insert_document(&document).await.unwrap();

        // Read before the delete, committed after it
        let stale = stored.clone();
        assert!(store.delete_document(document.id).await.unwrap());
        assert!(!store.delete_document(document.id).await.unwrap());

        let err = store.commit(LoanCommit::update(stale)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, .. }));
        assert_eq!(store.load_loan(stored.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_sequences_are_per_year() {
        let store = MemoryStore::new();
        assert_eq!(store.next_loan_sequence(2026).await.unwrap(), 1);
        assert_eq!(store.next_loan_sequence(2026).await.unwrap(), 2);
        assert_eq!(store.next_loan_sequence(2027).await.unwrap(), 1);
    }
}
