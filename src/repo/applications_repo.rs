use crate::domain::application::Application;
use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

#[derive(Clone)]
pub struct ApplicationsRepo {
    pub pool: PgPool,
}

const APPLICATION_SELECT: &str = r#"
    SELECT a.id, a.user_id, a.course_id, a.is_paid, c.course_name, c.course_code, c.course_fee
    FROM applications a
    JOIN courses c ON c.id = a.course_id
    WHERE a.id = $1
"#;

fn from_row(r: &PgRow) -> Result<Application> {
    Ok(Application {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        course_id: r.try_get("course_id")?,
        course_name: r.try_get("course_name")?,
        course_code: r.try_get("course_code")?,
        course_fee: r.try_get("course_fee")?,
        is_paid: r.try_get("is_paid")?,
    })
}

impl ApplicationsRepo {
    pub async fn find(&self, application_id: i64) -> Result<Option<Application>> {
        let row = sqlx::query(APPLICATION_SELECT)
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    /// Row lock on the application only; the course row stays free for seat approval.
    pub async fn lock_tx(
        tx: &mut Transaction<'_, Postgres>,
        application_id: i64,
    ) -> Result<Option<Application>> {
        let sql = format!("{} FOR UPDATE OF a", APPLICATION_SELECT);
        let row = sqlx::query(&sql)
            .bind(application_id)
            .fetch_optional(tx.as_mut())
            .await?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn mark_paid_tx(tx: &mut Transaction<'_, Postgres>, application_id: i64) -> Result<()> {
        sqlx::query("UPDATE applications SET is_paid = true WHERE id = $1 AND is_paid = false")
            .bind(application_id)
            .execute(tx.as_mut())
            .await?;
        Ok(())
    }
}
