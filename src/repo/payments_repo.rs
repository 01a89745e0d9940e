use crate::domain::application::Application;
use crate::domain::callback::RecordKey;
use crate::domain::payment::{NewAttempt, PaymentRecord, PaymentStatus};
use crate::reconcile::engine::{plan, Plan, ReconcileOutcome, Verdict};
use crate::reconcile::store::{AttemptStart, PaymentStore};
use crate::repo::applications_repo::ApplicationsRepo;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

#[derive(Clone)]
pub struct PaymentsRepo {
    pub pool: PgPool,
    pub applications: ApplicationsRepo,
}

const PAYMENT_COLUMNS: &str = "id, application_id, user_id, transaction_reference, gateway_transaction_id, \
     gateway_token, amount, product_code, status, is_completed, method, payment_date, created_at, updated_at";

fn from_row(r: &PgRow) -> Result<PaymentRecord> {
    let status: String = r.try_get("status")?;
    let method: String = r.try_get("method")?;
    Ok(PaymentRecord {
        id: r.try_get("id")?,
        application_id: r.try_get("application_id")?,
        user_id: r.try_get("user_id")?,
        transaction_reference: r.try_get("transaction_reference")?,
        gateway_transaction_id: r.try_get("gateway_transaction_id")?,
        gateway_token: r.try_get("gateway_token")?,
        amount: r.try_get("amount")?,
        product_code: r.try_get("product_code")?,
        status: status.parse()?,
        is_completed: r.try_get("is_completed")?,
        method: method.parse()?,
        payment_date: r.try_get("payment_date")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

impl PaymentsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            applications: ApplicationsRepo { pool: pool.clone() },
            pool,
        }
    }

    /// Inserts the application's record if it has none, otherwise locks the
    /// existing one. Returns whether a row was created.
    pub async fn get_or_create_tx(
        tx: &mut Transaction<'_, Postgres>,
        application_id: i64,
        attempt: &NewAttempt,
    ) -> Result<(PaymentRecord, bool)> {
        let sql = format!(
            r#"
            INSERT INTO payment_records (
                application_id, user_id, transaction_reference, amount, product_code,
                status, is_completed, method, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'INITIATED', false, $6, now(), now())
            ON CONFLICT (application_id) DO NOTHING
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let inserted = sqlx::query(&sql)
            .bind(application_id)
            .bind(attempt.user_id)
            .bind(&attempt.transaction_reference)
            .bind(attempt.amount)
            .bind(&attempt.product_code)
            .bind(attempt.method.as_str())
            .fetch_optional(tx.as_mut())
            .await
            .context("insert payment record")?;

        if let Some(row) = inserted {
            return Ok((from_row(&row)?, true));
        }

        let existing = Self::lock_by_application_tx(tx, application_id)
            .await?
            .with_context(|| format!("payment record for application {} vanished", application_id))?;
        Ok((existing, false))
    }

    /// New attempt supersedes the old one; completed rows are never matched.
    pub async fn reset_attempt_tx(
        tx: &mut Transaction<'_, Postgres>,
        record_id: i64,
        attempt: &NewAttempt,
    ) -> Result<PaymentRecord> {
        let sql = format!(
            r#"
            UPDATE payment_records
            SET user_id = $2, transaction_reference = $3, amount = $4, product_code = $5, method = $6,
                status = 'INITIATED', gateway_token = NULL, gateway_transaction_id = NULL, updated_at = now()
            WHERE id = $1 AND is_completed = false
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(record_id)
            .bind(attempt.user_id)
            .bind(&attempt.transaction_reference)
            .bind(attempt.amount)
            .bind(&attempt.product_code)
            .bind(attempt.method.as_str())
            .fetch_one(tx.as_mut())
            .await
            .context("reset payment attempt")?;
        from_row(&row)
    }

    pub async fn lock_by_reference_tx(
        tx: &mut Transaction<'_, Postgres>,
        reference: &str,
    ) -> Result<Option<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE transaction_reference = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(tx.as_mut())
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn lock_by_application_tx(
        tx: &mut Transaction<'_, Postgres>,
        application_id: i64,
    ) -> Result<Option<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE application_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(application_id)
            .fetch_optional(tx.as_mut())
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn write_tx(tx: &mut Transaction<'_, Postgres>, next: &PaymentRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_records
            SET status = $2, is_completed = $3, amount = $4, gateway_transaction_id = $5,
                payment_date = $6, updated_at = $7
            WHERE id = $1 AND is_completed = false
            "#,
        )
        .bind(next.id)
        .bind(next.status.as_str())
        .bind(next.is_completed)
        .bind(next.amount)
        .bind(&next.gateway_transaction_id)
        .bind(next.payment_date)
        .bind(next.updated_at)
        .execute(tx.as_mut())
        .await?;

        anyhow::ensure!(
            result.rows_affected() == 1,
            "locked payment {} changed underneath reconciliation",
            next.transaction_reference
        );
        Ok(())
    }

    async fn application_id_for_reference(&self, reference: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT application_id FROM payment_records WHERE transaction_reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("application_id")))
    }
}

#[async_trait::async_trait]
impl PaymentStore for PaymentsRepo {
    async fn application(&self, application_id: i64) -> Result<Option<Application>> {
        self.applications.find(application_id).await
    }

    async fn payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE transaction_reference = $1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn payment_by_application(&self, application_id: i64) -> Result<Option<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE application_id = $1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    async fn begin_attempt(&self, application_id: i64, attempt: &NewAttempt) -> Result<AttemptStart> {
        let mut tx = self.pool.begin().await?;
        let application = ApplicationsRepo::lock_tx(&mut tx, application_id)
            .await?
            .with_context(|| format!("application {} disappeared during initiation", application_id))?;
        if application.is_paid {
            tx.rollback().await?;
            return Ok(AttemptStart::AlreadyPaid);
        }

        let (record, created) = Self::get_or_create_tx(&mut tx, application_id, attempt).await?;
        let start = if created {
            AttemptStart::Created(record)
        } else if record.is_completed {
            AttemptStart::AlreadyPaid
        } else {
            AttemptStart::Superseded(Self::reset_attempt_tx(&mut tx, record.id, attempt).await?)
        };

        tx.commit().await?;
        Ok(start)
    }

    async fn attach_gateway_token(&self, reference: &str, token: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payment_records SET gateway_token = $2, updated_at = now() WHERE transaction_reference = $1 AND is_completed = false",
        )
        .bind(reference)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reconcile(
        &self,
        key: &RecordKey,
        expected_reference: &str,
        verdict: &Verdict,
    ) -> Result<ReconcileOutcome> {
        let application_id = match key {
            RecordKey::Application(id) => *id,
            RecordKey::Reference(reference) => match self.application_id_for_reference(reference).await? {
                Some(id) => id,
                None => return Ok(ReconcileOutcome::NotFound),
            },
        };

        let mut tx = self.pool.begin().await?;
        if ApplicationsRepo::lock_tx(&mut tx, application_id).await?.is_none() {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::NotFound);
        }

        let locked = match key {
            RecordKey::Reference(reference) => Self::lock_by_reference_tx(&mut tx, reference).await?,
            RecordKey::Application(id) => Self::lock_by_application_tx(&mut tx, *id).await?,
        };
        let Some(current) = locked else {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::NotFound);
        };
        if current.application_id != application_id || current.transaction_reference != expected_reference {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::Stale);
        }

        let outcome = match plan(&current, verdict, Utc::now()) {
            Plan::AlreadyCompleted => ReconcileOutcome::AlreadyCompleted(current),
            Plan::Unchanged => ReconcileOutcome::Unchanged(current),
            Plan::Write {
                next,
                marks_application_paid,
            } => {
                Self::write_tx(&mut tx, &next).await?;
                if marks_application_paid {
                    ApplicationsRepo::mark_paid_tx(&mut tx, next.application_id).await?;
                }
                ReconcileOutcome::Transitioned {
                    previous: current.status,
                    record: next,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_by_status(&self, status: PaymentStatus, limit: i64) -> Result<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE status = $1 ORDER BY updated_at ASC LIMIT $2",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(from_row).collect()
    }
}
