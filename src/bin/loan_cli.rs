//! Loan Origination CLI
//!
//! Runs lifecycle scenarios and evaluates pricing and eligibility rules
//! against the effective configuration.
//!
//! # Usage
//!
//! ```bash
//! # Full happy path against the in-memory store
//! loan_cli demo happy-path
//!
//! # Price a loan
//! loan_cli quote --value 500000 --ltv 70 --property-type multifamily
//!
//! # Check DSCR / LTV eligibility
//! loan_cli eligibility --income 10000 --expenses 4000 --payments 7000
//!
//! # Print the effective configuration
//! LOAN_CONFIG=./config/loan_rules.yaml loan_cli config
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loan_origination::config::LoanConfig;
use loan_origination::eligibility;
use loan_origination::models::{Actor, NewDocument, PropertyInfo};
use loan_origination::quote;
use loan_origination::services::{RecordingNotifier, StubPaymentProvider, StubRenderer};
use loan_origination::store::{LoanStore, MemoryStore};
use loan_origination::{FeeType, LoanError, LoanWorkflow, Role};

#[derive(Parser)]
#[command(name = "loan_cli")]
#[command(version = "0.1.0")]
#[command(about = "Bridge-loan lifecycle engine CLI")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,

    /// Postgres connection for the demo (requires the database feature)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Create through needs_list_complete
    HappyPath,
    /// DSCR below minimum; auto-decline
    Decline,
    /// Operations signs without the appraisal payment
    Override,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in lifecycle scenario
    Demo {
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// Price a loan from its property inputs
    Quote {
        #[arg(long)]
        value: Decimal,
        #[arg(long)]
        ltv: Decimal,
        #[arg(long, default_value = "multifamily")]
        property_type: String,
    },

    /// Evaluate the LTV cap and DSCR floor
    Eligibility {
        #[arg(long)]
        income: Decimal,
        #[arg(long)]
        expenses: Decimal,
        #[arg(long)]
        payments: Decimal,
        #[arg(long)]
        ltv: Option<Decimal>,
        #[arg(long)]
        property_type: Option<String>,
        #[arg(long)]
        request_type: Option<String>,
    },

    /// Print the effective configuration as YAML
    Config,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loan_origination=info,loan_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = LoanConfig::from_env().context("loading loan configuration")?;
    match cli.command {
        Commands::Demo { scenario } => {
            let store = open_store(cli.database_url.as_deref()).await?;
            let report = run_demo(scenario, store, config).await?;
            emit(cli.format, &report)
        }
        Commands::Quote {
            value,
            ltv,
            property_type,
        } => {
            let property = PropertyInfo {
                property_type: Some(property_type),
                property_value: Some(value),
                requested_ltv: Some(ltv),
                ..Default::default()
            };
            let quote = quote::generate_quote(&property, &config)?;
            emit(cli.format, &quote)
        }
        Commands::Eligibility {
            income,
            expenses,
            payments,
            ltv,
            property_type,
            request_type,
        } => {
            let property = PropertyInfo {
                property_type,
                request_type,
                requested_ltv: ltv,
                annual_rental_income: Some(income),
                annual_operating_expenses: Some(expenses),
                annual_loan_payments: Some(payments),
                ..Default::default()
            };
            let decision = eligibility::evaluate(&property, &config.eligibility);
            emit(cli.format, &decision)
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn emit<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let out = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
    };
    println!("{out}");
    Ok(())
}

#[cfg(feature = "database")]
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn LoanStore>> {
    match database_url {
        Some(url) => {
            let store = loan_origination::store::PgLoanStore::connect(url)
                .await
                .with_context(|| format!("connecting to {url}"))?;
            tracing::info!("Database connection established");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "database"))]
async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn LoanStore>> {
    if database_url.is_some() {
        tracing::warn!("DATABASE_URL ignored: built without the database feature");
    }
    Ok(Arc::new(MemoryStore::new()))
}

// =============================================================================
// DEMO
// =============================================================================

async fn run_demo(
    scenario: Scenario,
    store: Arc<dyn LoanStore>,
    config: LoanConfig,
) -> Result<serde_json::Value> {
    let notifier = Arc::new(RecordingNotifier::new());
    let workflow = LoanWorkflow::new(
        store,
        notifier.clone(),
        Arc::new(StubRenderer::new()),
        Arc::new(StubPaymentProvider::new()),
        Arc::new(config),
    );

    let stamp = uuid::Uuid::new_v4().simple().to_string();
    let borrower = workflow
        .register_user(&format!("borrower+{stamp}@example.com"), Role::Borrower, true)
        .await?;
    let ops = workflow
        .register_user(&format!("ops+{stamp}@example.com"), Role::Operations, true)
        .await?;
    let borrower = Actor::from_user(&borrower);
    let ops = Actor::from_user(&ops);

    let (income, expenses, payments) = match scenario {
        Scenario::Decline => (10_000, 4_000, 7_000),
        _ => (20_000, 5_000, 8_000),
    };
    let property = PropertyInfo {
        property_address: Some("12 Harbor Way".to_string()),
        property_type: Some("multifamily".to_string()),
        request_type: Some("purchase".to_string()),
        property_value: Some(Decimal::from(500_000)),
        requested_ltv: Some(Decimal::from(70)),
        annual_rental_income: Some(Decimal::from(income)),
        annual_operating_expenses: Some(Decimal::from(expenses)),
        annual_loan_payments: Some(Decimal::from(payments)),
    };
    let loan = workflow
        .create_loan(&borrower, borrower.user_id, property)
        .await?;

    if let Err(e) = workflow.submit_for_quote(&borrower, loan.id).await {
        if matches!(e, LoanError::EligibilityDeclined { .. }) {
            let history = workflow.status_history(&ops, loan.id).await?;
            return Ok(json!({
                "loan": workflow.get_loan(&ops, loan.id).await?,
                "outcome": e.response_body(),
                "history": history,
            }));
        }
        return Err(e.into());
    }

    let quote = workflow.generate_soft_quote(&borrower, loan.id).await?;
    workflow
        .confirm_payment(loan.id, FeeType::Credit, &format!("pi_credit_{stamp}"), None)
        .await?;
    workflow
        .confirm_payment(loan.id, FeeType::Application, &format!("pi_app_{stamp}"), None)
        .await?;
    workflow
        .submit_full_application(&borrower, loan.id, json!({ "entityName": "Harbor Way LLC" }))
        .await?;

    match scenario {
        Scenario::Override => {
            let refused = workflow
                .sign_term_sheet(&borrower, loan.id)
                .await
                .err()
                .map(|e| e.response_body());
            let ops = ops.with_override("appraisal waived by credit committee");
            workflow.sign_term_sheet(&ops, loan.id).await?;
            let history = workflow.status_history(&ops, loan.id).await?;
            Ok(json!({
                "loan": workflow.get_loan(&ops, loan.id).await?,
                "refused": refused,
                "history": history,
            }))
        }
        _ => {
            workflow
                .confirm_payment(loan.id, FeeType::Appraisal, &format!("pi_appraisal_{stamp}"), None)
                .await?;
            workflow.sign_term_sheet(&borrower, loan.id).await?;

            let items = workflow.store().needs_list_items(loan.id).await?;
            for item in &items {
                workflow
                    .upload_document(
                        &borrower,
                        loan.id,
                        NewDocument {
                            name: format!("{}.pdf", item.name),
                            category: item.category.clone(),
                            needs_list_item_id: Some(item.id),
                            file_url: format!("memory://uploads/{}.pdf", item.id),
                        },
                    )
                    .await?;
            }
            let completion = workflow.complete_needs_list(&borrower, loan.id).await?;
            let reconciliation = workflow.reconcile_needs_list(&ops, loan.id).await?;
            Ok(json!({
                "loan": completion.loan,
                "quote": quote,
                "needsList": reconciliation,
                "history": workflow.status_history(&ops, loan.id).await?,
                "messagesSent": notifier.sent().len(),
            }))
        }
    }
}
