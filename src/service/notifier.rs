use crate::domain::payment::PaymentRecord;
use anyhow::Result;

/// Side effects fired once, after commit, on the edge into COMPLETE.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_completed(&self, record: &PaymentRecord) -> Result<()>;
}
