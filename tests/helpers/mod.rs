//! Shared fixtures for the lifecycle integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;

use loan_origination::config::LoanConfig;
use loan_origination::models::{Actor, LoanRequest, NewDocument, PropertyInfo};
use loan_origination::services::{RecordingNotifier, StubPaymentProvider, StubRenderer};
use loan_origination::store::{LoanStore, MemoryStore};
use loan_origination::{FeeType, LoanWorkflow, Role};

pub struct Harness {
    pub workflow: LoanWorkflow,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub borrower: Actor,
    pub ops: Actor,
    pub admin: Actor,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(LoanConfig::default()).await
    }

    pub async fn with_config(config: LoanConfig) -> Self {
        Self::build(config, StubRenderer::new()).await
    }

    pub async fn with_failing_renderer() -> Self {
        Self::build(LoanConfig::default(), StubRenderer::failing()).await
    }

    async fn build(config: LoanConfig, renderer: StubRenderer) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = LoanWorkflow::new(
            store.clone(),
            notifier.clone(),
            Arc::new(renderer),
            Arc::new(StubPaymentProvider::new()),
            Arc::new(config),
        );
        let borrower = workflow
            .register_user("borrower@example.com", Role::Borrower, true)
            .await
            .unwrap();
        let ops = workflow
            .register_user("ops@example.com", Role::Operations, true)
            .await
            .unwrap();
        let admin = workflow
            .register_user("admin@example.com", Role::Admin, true)
            .await
            .unwrap();
        Self {
            workflow,
            store,
            notifier,
            borrower: Actor::from_user(&borrower),
            ops: Actor::from_user(&ops),
            admin: Actor::from_user(&admin),
        }
    }

    pub async fn create_loan(&self, property: PropertyInfo) -> LoanRequest {
        self.workflow
            .create_loan(&self.borrower, self.borrower.user_id, property)
            .await
            .unwrap()
    }

    pub async fn reload(&self, loan: &LoanRequest) -> LoanRequest {
        self.store.load_loan(loan.id).await.unwrap().unwrap()
    }

    pub async fn pay(&self, loan: &LoanRequest, fee: FeeType) {
        let payment_id = format!("pi_{}_{}", fee, loan.id.simple());
        self.workflow
            .confirm_payment(loan.id, fee, &payment_id, None)
            .await
            .unwrap();
    }

    /// Quote requested, soft quote issued, credit and application paid,
    /// term sheet issued
    pub async fn loan_with_term_sheet(&self) -> LoanRequest {
        let loan = self.create_loan(healthy_property()).await;
        self.workflow
            .submit_for_quote(&self.borrower, loan.id)
            .await
            .unwrap();
        self.workflow
            .generate_soft_quote(&self.borrower, loan.id)
            .await
            .unwrap();
        self.pay(&loan, FeeType::Credit).await;
        self.pay(&loan, FeeType::Application).await;
        self.workflow
            .submit_full_application(&self.borrower, loan.id, serde_json::json!({}))
            .await
            .unwrap();
        self.reload(&loan).await
    }

    /// Upload one document into every needs-list category
    pub async fn upload_all(&self, loan: &LoanRequest) {
        let items = self.store.needs_list_items(loan.id).await.unwrap();
        for item in items {
            self.workflow
                .upload_document(&self.borrower, loan.id, upload(item.category.as_deref()))
                .await
                .unwrap();
        }
    }
}

/// DSCR (20000 - 5000) / 8000 = 1.875
pub fn healthy_property() -> PropertyInfo {
    property(20_000, 5_000, 8_000)
}

/// DSCR (10000 - 4000) / 7000 ~ 0.857
pub fn weak_property() -> PropertyInfo {
    property(10_000, 4_000, 7_000)
}

pub fn property(income: i64, expenses: i64, payments: i64) -> PropertyInfo {
    PropertyInfo {
        property_address: Some("12 Harbor Way".to_string()),
        property_type: Some("multifamily".to_string()),
        request_type: Some("purchase".to_string()),
        property_value: Some(Decimal::from(500_000)),
        requested_ltv: Some(Decimal::from(70)),
        annual_rental_income: Some(Decimal::from(income)),
        annual_operating_expenses: Some(Decimal::from(expenses)),
        annual_loan_payments: Some(Decimal::from(payments)),
    }
}

pub fn upload(category: Option<&str>) -> NewDocument {
    let label = category.unwrap_or("misc");
    NewDocument {
        name: format!("{label}.pdf"),
        category: category.map(str::to_string),
        needs_list_item_id: None,
        file_url: format!("s3://loan-docs/{label}.pdf"),
    }
}
