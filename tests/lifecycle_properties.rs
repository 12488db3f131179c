//! Lifecycle Property Tests
//!
//! Random operation sequences against one loan. Whatever succeeds or fails,
//! the step watermark never drops, sticky flags never clear, and the
//! history trail always ends on the loan's current status.
//!
//! Run:
//!   cargo test --test lifecycle_properties

mod helpers;

use helpers::{property, upload, Harness};
use loan_origination::store::LoanStore;
use loan_origination::{FeeType, LoanStatus};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    SubmitForQuote,
    SoftQuote,
    Pay(FeeType),
    FullApplication,
    Sign { with_override: bool },
    Upload(&'static str),
    Complete,
    OpsStatus(LoanStatus),
    Advance(LoanStatus),
}

const CATEGORIES: [&str; 6] = [
    "entity_documents",
    "property_information",
    "financial_statements",
    "rent_roll",
    "insurance",
    "title_closing",
];

const STATUSES: [LoanStatus; 13] = [
    LoanStatus::NewRequest,
    LoanStatus::QuoteRequested,
    LoanStatus::SoftQuoteIssued,
    LoanStatus::Declined,
    LoanStatus::TermSheetIssued,
    LoanStatus::TermSheetSigned,
    LoanStatus::NeedsListSent,
    LoanStatus::NeedsListComplete,
    LoanStatus::AppraisalOrdered,
    LoanStatus::AppraisalReceived,
    LoanStatus::ConditionallyApproved,
    LoanStatus::ClearToClose,
    LoanStatus::Funded,
];

fn arb_fee() -> impl Strategy<Value = FeeType> {
    prop_oneof![
        Just(FeeType::Credit),
        Just(FeeType::Application),
        Just(FeeType::Appraisal),
        Just(FeeType::Underwriting),
        Just(FeeType::Closing),
    ]
}

fn arb_status() -> impl Strategy<Value = LoanStatus> {
    (0..STATUSES.len()).prop_map(|i| STATUSES[i])
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::SubmitForQuote),
        3 => Just(Op::SoftQuote),
        4 => arb_fee().prop_map(Op::Pay),
        3 => Just(Op::FullApplication),
        3 => any::<bool>().prop_map(|with_override| Op::Sign { with_override }),
        4 => (0..CATEGORIES.len()).prop_map(|i| Op::Upload(CATEGORIES[i])),
        2 => Just(Op::Complete),
        1 => arb_status().prop_map(Op::OpsStatus),
        2 => arb_status().prop_map(Op::Advance),
    ]
}

async fn apply(h: &Harness, loan_id: uuid::Uuid, op: &Op, n: usize) {
    let w = &h.workflow;
    // Failures are expected; only the invariants matter
    let _ = match op {
        Op::SubmitForQuote => w.submit_for_quote(&h.borrower, loan_id).await.map(drop),
        Op::SoftQuote => w.generate_soft_quote(&h.borrower, loan_id).await.map(drop),
        Op::Pay(fee) => w
            .confirm_payment(loan_id, *fee, &format!("pi_prop_{n}"), None)
            .await
            .map(drop),
        Op::FullApplication => w
            .submit_full_application(&h.borrower, loan_id, serde_json::json!({}))
            .await
            .map(drop),
        Op::Sign { with_override } => {
            let actor = if *with_override {
                h.ops.clone().with_override("property test override")
            } else {
                h.borrower.clone()
            };
            w.sign_term_sheet(&actor, loan_id).await.map(drop)
        }
        Op::Upload(category) => w
            .upload_document(&h.borrower, loan_id, upload(Some(*category)))
            .await
            .map(drop),
        Op::Complete => w.complete_needs_list(&h.borrower, loan_id).await.map(drop),
        Op::OpsStatus(status) => w
            .update_status(&h.ops, loan_id, *status, "property test")
            .await
            .map(drop),
        Op::Advance(status) => w.advance_status(&h.ops, loan_id, *status).await.map(drop),
    };
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn step_and_flags_never_regress(
        income in 8_000i64..30_000,
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = Harness::new().await;
            let loan = h.create_loan(property(income, 5_000, 8_000)).await;
            let mut previous = h.reload(&loan).await;
            let mut history_len = h.store.history(loan.id).await.unwrap().len();

            for (n, op) in ops.iter().enumerate() {
                apply(&h, loan.id, op, n).await;
                let current = h.reload(&loan).await;

                prop_assert!(
                    current.current_step >= previous.current_step,
                    "{:?} lowered step {} -> {}",
                    op,
                    previous.current_step,
                    current.current_step
                );
                prop_assert!(
                    current.flags.preserves(&previous.flags),
                    "{:?} cleared a flag",
                    op
                );
                prop_assert!(current.version >= previous.version);

                let history = h.store.history(loan.id).await.unwrap();
                prop_assert!(history.len() >= history_len);
                prop_assert_eq!(history.last().map(|r| r.status), Some(current.status));
                prop_assert!(history.iter().all(|r| r.step <= current.current_step));

                // A new version always comes with at least one history row
                if current.version > previous.version {
                    prop_assert!(history.len() > history_len, "{:?} committed without history", op);
                }

                history_len = history.len();
                previous = current;
            }
            Ok(())
        })?;
    }

    #[test]
    fn terminal_decline_is_sticky(
        ops in prop::collection::vec(arb_op(), 1..20),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = Harness::new().await;
            let loan = h.create_loan(property(10_000, 4_000, 7_000)).await;
            let _ = h.workflow.submit_for_quote(&h.borrower, loan.id).await;
            prop_assert_eq!(h.reload(&loan).await.status, LoanStatus::Declined);

            for (n, op) in ops.iter().enumerate() {
                // Operations overrides are the only way out of a terminal status
                if matches!(op, Op::OpsStatus(_) | Op::Sign { with_override: true }) {
                    continue;
                }
                apply(&h, loan.id, op, n).await;
                let current = h.reload(&loan).await;
                prop_assert_eq!(current.status, LoanStatus::Declined, "{:?}", op);
                prop_assert!(current.flags.dscr_auto_declined);
            }
            Ok(())
        })?;
    }
}
