//! Postgres `LoanStore`
//!
//! Each commit runs in one transaction. The loan update is conditional on
//! the expected version; paid flags are OR-ed and the step takes GREATEST so
//! the database enforces the same monotonicity as the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use loan_types::Role;

use super::{LoanCommit, LoanFilter, LoanStore, StoreError};
use crate::models::{
    Document, LoanFlags, LoanRequest, LoanStatusHistory, NeedsListItem, Payment, User,
};

const LOAN_COLUMNS: &str = r#"
    id, loan_number, borrower_id, broker_id, status, current_step, property,
    loan_amount, noi, dscr_ratio,
    soft_quote_generated, term_sheet_signed, credit_authorized, appraisal_paid,
    application_fee_paid, underwriting_fee_paid, closing_fee_paid,
    full_application_completed, dscr_auto_declined,
    credit_payment_id, soft_quote, application_data, application_pdf_url,
    term_sheet_url, term_sheet_signed_at, decline_reason,
    version, created_at, updated_at
"#;

pub struct PgLoanStore {
    pool: PgPool,
}

impl PgLoanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_loan(
        tx: &mut Transaction<'_, Postgres>,
        loan: &LoanRequest,
    ) -> Result<LoanRow, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO loans.loan_requests ({LOAN_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19,
                    $20, $21, $22, $23, $24, $25, $26, 1, $27, now())
            ON CONFLICT (id) DO NOTHING
            RETURNING {LOAN_COLUMNS}
            "#
        );
        let flags = &loan.flags;
        let row = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(loan.id)
            .bind(&loan.loan_number)
            .bind(loan.borrower_id)
            .bind(loan.broker_id)
            .bind(loan.status.as_str())
            .bind(i32::from(loan.current_step))
            .bind(serde_json::to_value(&loan.property)?)
            .bind(loan.loan_amount)
            .bind(loan.noi)
            .bind(loan.dscr_ratio)
            .bind(flags.soft_quote_generated)
            .bind(flags.term_sheet_signed)
            .bind(flags.credit_authorized)
            .bind(flags.appraisal_paid)
            .bind(flags.application_fee_paid)
            .bind(flags.underwriting_fee_paid)
            .bind(flags.closing_fee_paid)
            .bind(flags.full_application_completed)
            .bind(flags.dscr_auto_declined)
            .bind(&loan.credit_payment_id)
            .bind(loan.soft_quote.as_ref().map(serde_json::to_value).transpose()?)
            .bind(&loan.application_data)
            .bind(&loan.application_pdf_url)
            .bind(&loan.term_sheet_url)
            .bind(loan.term_sheet_signed_at)
            .bind(&loan.decline_reason)
            .bind(loan.created_at)
            .fetch_optional(&mut **tx)
            .await?;
        row.ok_or(StoreError::DuplicateLoan(loan.id))
    }

    async fn update_loan(
        tx: &mut Transaction<'_, Postgres>,
        loan: &LoanRequest,
        expected: i64,
    ) -> Result<LoanRow, StoreError> {
        let sql = format!(
            r#"
            UPDATE loans.loan_requests SET
                borrower_id = $3,
                broker_id = $4,
                status = $5,
                current_step = GREATEST(current_step, $6),
                property = $7,
                loan_amount = $8,
                noi = $9,
                dscr_ratio = $10,
                soft_quote_generated = soft_quote_generated OR $11,
                term_sheet_signed = term_sheet_signed OR $12,
                credit_authorized = credit_authorized OR $13,
                appraisal_paid = appraisal_paid OR $14,
                application_fee_paid = application_fee_paid OR $15,
                underwriting_fee_paid = underwriting_fee_paid OR $16,
                closing_fee_paid = closing_fee_paid OR $17,
                full_application_completed = full_application_completed OR $18,
                dscr_auto_declined = dscr_auto_declined OR $19,
                credit_payment_id = $20,
                soft_quote = $21,
                application_data = $22,
                application_pdf_url = $23,
                term_sheet_url = $24,
                term_sheet_signed_at = $25,
                decline_reason = $26,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING {LOAN_COLUMNS}
            "#
        );
        let flags = &loan.flags;
        let row = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(loan.id)
            .bind(expected)
            .bind(loan.borrower_id)
            .bind(loan.broker_id)
            .bind(loan.status.as_str())
            .bind(i32::from(loan.current_step))
            .bind(serde_json::to_value(&loan.property)?)
            .bind(loan.loan_amount)
            .bind(loan.noi)
            .bind(loan.dscr_ratio)
            .bind(flags.soft_quote_generated)
            .bind(flags.term_sheet_signed)
            .bind(flags.credit_authorized)
            .bind(flags.appraisal_paid)
            .bind(flags.application_fee_paid)
            .bind(flags.underwriting_fee_paid)
            .bind(flags.closing_fee_paid)
            .bind(flags.full_application_completed)
            .bind(flags.dscr_auto_declined)
            .bind(&loan.credit_payment_id)
            .bind(loan.soft_quote.as_ref().map(serde_json::to_value).transpose()?)
            .bind(&loan.application_data)
            .bind(&loan.application_pdf_url)
            .bind(&loan.term_sheet_url)
            .bind(loan.term_sheet_signed_at)
            .bind(&loan.decline_reason)
            .fetch_optional(&mut **tx)
            .await?;

        match row {
            Some(row) => Ok(row),
            None => {
                let exists: bool = sqlx::query_scalar(
                    r#"SELECT EXISTS(SELECT 1 FROM loans.loan_requests WHERE id = $1)"#,
                )
                .bind(loan.id)
                .fetch_one(&mut **tx)
                .await?;
                if exists {
                    Err(StoreError::VersionConflict {
                        loan_id: loan.id,
                        expected,
                    })
                } else {
                    Err(StoreError::LoanNotFound(loan.id))
                }
            }
        }
    }
}

#[async_trait]
impl LoanStore for PgLoanStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO loans.users (id, email, role, email_verified, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                email_verified = EXCLUDED.email_verified
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT id, email, role, email_verified, created_at FROM loans.users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, role, email_verified, created_at
            FROM loans.users
            WHERE role = $1
            ORDER BY created_at
            "#,
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn next_loan_sequence(&self, year: i32) -> Result<u32, StoreError> {
        let value: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO loans.loan_number_sequences (year, last_value)
            VALUES ($1, 1)
            ON CONFLICT (year) DO UPDATE SET last_value = loans.loan_number_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;
        u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("sequence {value}")))
    }

    async fn commit(&self, commit: LoanCommit) -> Result<LoanRequest, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = match commit.expected_version {
            None => Self::insert_loan(&mut tx, &commit.loan).await?,
            Some(expected) => Self::update_loan(&mut tx, &commit.loan, expected).await?,
        };

        for h in &commit.history {
            sqlx::query(
                r#"
                INSERT INTO loans.loan_status_history
                (id, loan_id, status, step, changed_by, notes, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(h.id)
            .bind(h.loan_id)
            .bind(h.status.as_str())
            .bind(i32::from(h.step))
            .bind(h.changed_by)
            .bind(&h.notes)
            .bind(h.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for item in &commit.new_items {
            insert_item(&mut *tx, item).await?;
        }

        for p in &commit.payments {
            let inserted = sqlx::query(
                r#"
                INSERT INTO loans.payments (id, loan_id, fee_type, payment_id, amount, confirmed_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (payment_id) DO NOTHING
                "#,
            )
            .bind(p.id)
            .bind(p.loan_id)
            .bind(p.fee_type.as_str())
            .bind(&p.payment_id)
            .bind(p.amount)
            .bind(p.confirmed_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if inserted == 0 {
                // Dropping the transaction rolls back the loan update
                return Err(StoreError::DuplicatePayment(p.payment_id.clone()));
            }
        }

        tx.commit().await?;
        row.try_into()
    }

    async fn load_loan(&self, id: Uuid) -> Result<Option<LoanRequest>, StoreError> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM loans.loan_requests WHERE id = $1");
        let row = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<LoanRequest>, StoreError> {
        let statuses: Option<Vec<String>> = filter
            .statuses
            .as_ref()
            .map(|s| s.iter().map(|st| st.as_str().to_string()).collect());
        let sql = format!(
            r#"
            SELECT {LOAN_COLUMNS} FROM loans.loan_requests
            WHERE ($1::uuid IS NULL OR borrower_id = $1)
              AND ($2::uuid IS NULL OR broker_id = $2)
              AND ($3::text[] IS NULL OR status = ANY($3))
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query_as::<_, LoanRow>(&sql)
            .bind(filter.borrower_id)
            .bind(filter.broker_id)
            .bind(statuses)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn history(&self, loan_id: Uuid) -> Result<Vec<LoanStatusHistory>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, loan_id, status, step, changed_by, notes, created_at
            FROM loans.loan_status_history
            WHERE loan_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn needs_list_items(&self, loan_id: Uuid) -> Result<Vec<NeedsListItem>, StoreError> {
        let rows = sqlx::query_as::<_, NeedsListItem>(
            r#"
            SELECT id, loan_id, name, category, description, loan_type, is_required, created_at
            FROM loans.needs_list_items
            WHERE loan_id = $1
            ORDER BY created_at, name
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_needs_list_item(&self, item: &NeedsListItem) -> Result<(), StoreError> {
        insert_item(&self.pool, item).await
    }

    async fn documents(&self, loan_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, loan_id, uploaded_by, name, category, needs_list_item_id, file_url,
                   status, reviewed_by, reviewed_at, review_notes, uploaded_at
            FROM loans.documents
            WHERE loan_id = $1
            ORDER BY uploaded_at
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn load_document(&self, id: Uuid) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, loan_id, uploaded_by, name, category, needs_list_item_id, file_url,
                   status, reviewed_by, reviewed_at, review_notes, uploaded_at
            FROM loans.documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO loans.documents
            (id, loan_id, uploaded_by, name, category, needs_list_item_id, file_url,
             status, reviewed_by, reviewed_at, review_notes, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(document.id)
        .bind(document.loan_id)
        .bind(document.uploaded_by)
        .bind(&document.name)
        .bind(&document.category)
        .bind(document.needs_list_item_id)
        .bind(&document.file_url)
        .bind(document.status.as_str())
        .bind(document.reviewed_by)
        .bind(document.reviewed_at)
        .bind(&document.review_notes)
        .bind(document.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_document_review(&self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE loans.documents SET
                status = $2, reviewed_by = $3, reviewed_at = $4, review_notes = $5
            WHERE id = $1
            "#,
        )
        .bind(document.id)
        .bind(document.status.as_str())
        .bind(document.reviewed_by)
        .bind(document.reviewed_at)
        .bind(&document.review_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_document(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let loan_id: Option<Uuid> =
            sqlx::query_scalar(r#"DELETE FROM loans.documents WHERE id = $1 RETURNING loan_id"#)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(loan_id) = loan_id else {
            return Ok(false);
        };
        sqlx::query(
            r#"
            UPDATE loans.loan_requests SET version = version + 1, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(loan_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn find_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, loan_id, fee_type, payment_id, amount, confirmed_at
            FROM loans.payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}

async fn insert_item<'e, E>(executor: E, item: &NeedsListItem) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO loans.needs_list_items
        (id, loan_id, name, category, description, loan_type, is_required, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(item.id)
    .bind(item.loan_id)
    .bind(&item.name)
    .bind(&item.category)
    .bind(&item.description)
    .bind(&item.loan_type)
    .bind(item.is_required)
    .bind(item.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn parse<T: std::str::FromStr<Err = loan_types::UnknownValue>>(s: &str) -> Result<T, StoreError> {
    s.parse().map_err(|e: loan_types::UnknownValue| StoreError::Corrupt(e.to_string()))
}

fn step(value: i32) -> Result<u8, StoreError> {
    u8::try_from(value).map_err(|_| StoreError::Corrupt(format!("step {value}")))
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: row.email,
            role: parse(&row.role)?,
            email_verified: row.email_verified,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: Uuid,
    loan_number: String,
    borrower_id: Uuid,
    broker_id: Option<Uuid>,
    status: String,
    current_step: i32,
    property: serde_json::Value,
    loan_amount: Option<Decimal>,
    noi: Option<Decimal>,
    dscr_ratio: Option<Decimal>,
    soft_quote_generated: bool,
    term_sheet_signed: bool,
    credit_authorized: bool,
    appraisal_paid: bool,
    application_fee_paid: bool,
    underwriting_fee_paid: bool,
    closing_fee_paid: bool,
    full_application_completed: bool,
    dscr_auto_declined: bool,
    credit_payment_id: Option<String>,
    soft_quote: Option<serde_json::Value>,
    application_data: Option<serde_json::Value>,
    application_pdf_url: Option<String>,
    term_sheet_url: Option<String>,
    term_sheet_signed_at: Option<DateTime<Utc>>,
    decline_reason: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for LoanRequest {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            loan_number: row.loan_number,
            borrower_id: row.borrower_id,
            broker_id: row.broker_id,
            status: parse(&row.status)?,
            current_step: step(row.current_step)?,
            property: serde_json::from_value(row.property)?,
            loan_amount: row.loan_amount,
            noi: row.noi,
            dscr_ratio: row.dscr_ratio,
            flags: LoanFlags {
                soft_quote_generated: row.soft_quote_generated,
                term_sheet_signed: row.term_sheet_signed,
                credit_authorized: row.credit_authorized,
                appraisal_paid: row.appraisal_paid,
                application_fee_paid: row.application_fee_paid,
                underwriting_fee_paid: row.underwriting_fee_paid,
                closing_fee_paid: row.closing_fee_paid,
                full_application_completed: row.full_application_completed,
                dscr_auto_declined: row.dscr_auto_declined,
            },
            credit_payment_id: row.credit_payment_id,
            soft_quote: row.soft_quote.map(serde_json::from_value).transpose()?,
            application_data: row.application_data,
            application_pdf_url: row.application_pdf_url,
            term_sheet_url: row.term_sheet_url,
            term_sheet_signed_at: row.term_sheet_signed_at,
            decline_reason: row.decline_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    loan_id: Uuid,
    status: String,
    step: i32,
    changed_by: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for LoanStatusHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            loan_id: row.loan_id,
            status: parse(&row.status)?,
            step: step(row.step)?,
            changed_by: row.changed_by,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    loan_id: Uuid,
    uploaded_by: Uuid,
    name: String,
    category: Option<String>,
    needs_list_item_id: Option<Uuid>,
    file_url: String,
    status: String,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            loan_id: row.loan_id,
            uploaded_by: row.uploaded_by,
            name: row.name,
            category: row.category,
            needs_list_item_id: row.needs_list_item_id,
            file_url: row.file_url,
            status: parse(&row.status)?,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_notes: row.review_notes,
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    loan_id: Uuid,
    fee_type: String,
    payment_id: String,
    amount: Option<Decimal>,
    confirmed_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            loan_id: row.loan_id,
            fee_type: parse(&row.fee_type)?,
            payment_id: row.payment_id,
            amount: row.amount,
            confirmed_at: row.confirmed_at,
        })
    }
}
