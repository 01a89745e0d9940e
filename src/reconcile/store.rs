use crate::domain::application::Application;
use crate::domain::callback::RecordKey;
use crate::domain::payment::{NewAttempt, PaymentRecord, PaymentStatus};
use crate::reconcile::engine::{ReconcileOutcome, Verdict};
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptStart {
    Created(PaymentRecord),
    /// An open attempt existed and now carries the new reference and amount.
    Superseded(PaymentRecord),
    AlreadyPaid,
}

impl AttemptStart {
    pub fn record(&self) -> Option<&PaymentRecord> {
        match self {
            AttemptStart::Created(r) | AttemptStart::Superseded(r) => Some(r),
            AttemptStart::AlreadyPaid => None,
        }
    }
}

/// Durable payment records plus the application paid flag.
///
/// `begin_attempt` and `reconcile` are the only writers of `status`,
/// `is_completed` and the paid flag. Both take the application row first and
/// the payment row second.
#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    async fn application(&self, application_id: i64) -> Result<Option<Application>>;

    async fn payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>>;

    async fn payment_by_application(&self, application_id: i64) -> Result<Option<PaymentRecord>>;

    /// get-or-create for the application's single record, superseding an open
    /// attempt and refusing a completed one.
    async fn begin_attempt(&self, application_id: i64, attempt: &NewAttempt) -> Result<AttemptStart>;

    /// Stores the provider session token on an open attempt.
    async fn attach_gateway_token(&self, reference: &str, token: &str) -> Result<()>;

    /// Locks the record named by `key`, re-checks it still carries
    /// `expected_reference`, and applies `verdict` atomically.
    async fn reconcile(
        &self,
        key: &RecordKey,
        expected_reference: &str,
        verdict: &Verdict,
    ) -> Result<ReconcileOutcome>;

    async fn list_by_status(&self, status: PaymentStatus, limit: i64) -> Result<Vec<PaymentRecord>>;
}
