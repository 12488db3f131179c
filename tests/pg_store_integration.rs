//! Postgres Store Integration Tests
//!
//! Requires a migrated database:
//!   DATABASE_URL=postgres://localhost/loan_origination \
//!     cargo test --features database --test pg_store_integration -- --ignored

#![cfg(feature = "database")]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use loan_origination::config::LoanConfig;
use loan_origination::models::{
    Actor, Document, LoanRequest, LoanStatusHistory, Payment, PropertyInfo, User,
};
use loan_origination::services::{RecordingNotifier, StubPaymentProvider, StubRenderer};
use loan_origination::store::{LoanCommit, LoanStore, PgLoanStore, StoreError};
use loan_origination::{FeeType, LoanStatus, LoanWorkflow, Role};
use loan_types::DocumentStatus;

async fn store() -> PgLoanStore {
    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/loan_origination".to_string());
    PgLoanStore::connect(&url).await.unwrap()
}

async fn seeded_loan(store: &PgLoanStore) -> LoanRequest {
    let borrower = User::new(
        format!("pg+{}@example.com", Uuid::new_v4().simple()),
        Role::Borrower,
        true,
    );
    store.insert_user(&borrower).await.unwrap();
    let seq = store.next_loan_sequence(2099).await.unwrap();
    let loan = LoanRequest::new(
        format!("TEST-2099-{seq:04}-{}", Uuid::new_v4().simple()),
        borrower.id,
        None,
        PropertyInfo::default(),
    );
    store.commit(LoanCommit::insert(loan)).await.unwrap()
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_commit_bumps_version_and_writes_history() {
    let store = store().await;
    let mut loan = seeded_loan(&store).await;
    assert_eq!(loan.version, 1);

    loan.status = LoanStatus::QuoteRequested;
    loan.advance_step(2);
    let row = LoanStatusHistory::snapshot(&loan, None, Some("submitted".into()));
    let stored = store
        .commit(LoanCommit::update(loan.clone()).with_history(row))
        .await
        .unwrap();

    assert_eq!(stored.version, 2);
    assert_eq!(stored.status, LoanStatus::QuoteRequested);
    let history = store.history(loan.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].notes.as_deref(), Some("submitted"));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_stale_commit_is_a_version_conflict() {
    let store = store().await;
    let loan = seeded_loan(&store).await;
    let stale = loan.clone();

    store.commit(LoanCommit::update(loan)).await.unwrap();
    let err = store.commit(LoanCommit::update(stale)).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { expected: 1, .. }));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_stale_write_cannot_clear_flags_or_lower_step() {
    let store = store().await;
    let mut loan = seeded_loan(&store).await;
    loan.flags.appraisal_paid = true;
    loan.advance_step(8);
    let stored = store.commit(LoanCommit::update(loan)).await.unwrap();

    let mut regressed = stored.clone();
    regressed.flags.appraisal_paid = false;
    regressed.current_step = 2;
    let stored = store.commit(LoanCommit::update(regressed)).await.unwrap();
    assert!(stored.flags.appraisal_paid);
    assert_eq!(stored.current_step, 8);
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_duplicate_payment_rolls_back_commit() {
    let store = store().await;
    let loan = seeded_loan(&store).await;
    let payment_id = format!("pi_{}", Uuid::new_v4().simple());
    let payment = Payment {
        id: Uuid::new_v4(),
        loan_id: loan.id,
        fee_type: FeeType::Credit,
        payment_id: payment_id.clone(),
        amount: None,
        confirmed_at: Utc::now(),
    };

    let mut first = LoanCommit::update(loan);
    first.payments.push(payment.clone());
    let stored = store.commit(first).await.unwrap();

    let mut second = LoanCommit::update(stored.clone());
    second.payments.push(Payment {
        id: Uuid::new_v4(),
        ..payment
    });
    let err = store.commit(second).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicatePayment(id) if id == payment_id));

    // The loan update in the failed commit was rolled back
    let reloaded = store.load_loan(stored.id).await.unwrap().unwrap();
    assert_eq!(reloaded.version, stored.version);
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_document_delete_bumps_loan_version() {
    let store = store().await;
    let loan = seeded_loan(&store).await;
    let document = Document {
        id: Uuid::new_v4(),
        loan_id: loan.id,
        uploaded_by: loan.borrower_id,
        name: "rent_roll.pdf".into(),
        category: Some("rent_roll".into()),
        needs_list_item_id: None,
        file_url: "s3://loan-docs/rent_roll.pdf".into(),
        status: DocumentStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        review_notes: None,
        uploaded_at: Utc::now(),
    };
    store.insert_document(&document).await.unwrap();

    let stale = loan.clone();
    assert!(store.delete_document(document.id).await.unwrap());
    let err = store.commit(LoanCommit::update(stale)).await.unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { expected: 1, .. }));
}

#[tokio::test]
#[ignore = "requires database"]
async fn test_workflow_lifecycle_against_postgres() {
    let store = Arc::new(store().await);
    let workflow = LoanWorkflow::new(
        store.clone(),
        Arc::new(RecordingNotifier::new()),
        Arc::new(StubRenderer::new()),
        Arc::new(StubPaymentProvider::new()),
        Arc::new(LoanConfig::default()),
    );
    let user = workflow
        .register_user(
            &format!("pg-flow+{}@example.com", Uuid::new_v4().simple()),
            Role::Borrower,
            true,
        )
        .await
        .unwrap();
    let borrower = Actor::from_user(&user);
    let property = PropertyInfo {
        property_type: Some("multifamily".into()),
        request_type: Some("purchase".into()),
        property_value: Some(Decimal::from(500_000)),
        requested_ltv: Some(Decimal::from(70)),
        annual_rental_income: Some(Decimal::from(20_000)),
        annual_operating_expenses: Some(Decimal::from(5_000)),
        annual_loan_payments: Some(Decimal::from(8_000)),
        ..Default::default()
    };

    let loan = workflow
        .create_loan(&borrower, borrower.user_id, property)
        .await
        .unwrap();
    assert_eq!(store.needs_list_items(loan.id).await.unwrap().len(), 6);

    workflow.submit_for_quote(&borrower, loan.id).await.unwrap();
    workflow
        .generate_soft_quote(&borrower, loan.id)
        .await
        .unwrap();
    let stored = store.load_loan(loan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LoanStatus::SoftQuoteIssued);
    assert!(stored.soft_quote.is_some());
    assert_eq!(store.history(loan.id).await.unwrap().len(), 3);
}
