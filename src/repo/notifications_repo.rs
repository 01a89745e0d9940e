use crate::domain::payment::{PaymentMethod, PaymentRecord};
use crate::service::notifier::Notifier;
use anyhow::Result;
use sqlx::PgPool;

#[derive(Clone)]
pub struct NotificationsRepo {
    pub pool: PgPool,
}

fn title_for(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Esewa => "Pay with E-Sewa",
        PaymentMethod::Khalti => "Payment with Khalti",
    }
}

impl NotificationsRepo {
    pub async fn insert(&self, user_id: i64, title: &str, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (user_id, title, message, is_read, created_at) VALUES ($1, $2, $3, false, now())",
        )
        .bind(user_id)
        .bind(title)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for NotificationsRepo {
    async fn payment_completed(&self, record: &PaymentRecord) -> Result<()> {
        let message = format!(
            "Your {} payment of Rs. {} has been done successfully and saved.",
            record.method.display_name(),
            record.amount
        );
        self.insert(record.user_id, title_for(record.method), &message)
            .await
    }
}
