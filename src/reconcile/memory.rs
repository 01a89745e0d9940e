use crate::domain::application::Application;
use crate::domain::callback::RecordKey;
use crate::domain::payment::{NewAttempt, PaymentRecord, PaymentStatus};
use crate::reconcile::engine::{plan, Plan, ReconcileOutcome, Verdict};
use crate::reconcile::store::{AttemptStart, PaymentStore};
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    applications: HashMap<i64, Application>,
    // keyed by application id: one record per application
    payments: HashMap<i64, PaymentRecord>,
    next_id: i64,
}

impl MemoryState {
    fn find(&self, key: &RecordKey) -> Option<&PaymentRecord> {
        match key {
            RecordKey::Application(id) => self.payments.get(id),
            RecordKey::Reference(reference) => self
                .payments
                .values()
                .find(|p| &p.transaction_reference == reference),
        }
    }

    fn reference_taken(&self, reference: &str, except_application: i64) -> bool {
        self.payments
            .values()
            .any(|p| p.transaction_reference == reference && p.application_id != except_application)
    }
}

/// Single-mutex store for local runs and tests. Holding the mutex across a
/// whole operation gives the same serialization as a row lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_application(&self, application: Application) {
        let mut state = self.inner.lock().await;
        state.applications.insert(application.id, application);
    }
}

#[async_trait::async_trait]
impl PaymentStore for MemoryStore {
    async fn application(&self, application_id: i64) -> Result<Option<Application>> {
        Ok(self.inner.lock().await.applications.get(&application_id).cloned())
    }

    async fn payment_by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>> {
        let state = self.inner.lock().await;
        Ok(state.find(&RecordKey::Reference(reference.to_string())).cloned())
    }

    async fn payment_by_application(&self, application_id: i64) -> Result<Option<PaymentRecord>> {
        Ok(self.inner.lock().await.payments.get(&application_id).cloned())
    }

    async fn begin_attempt(&self, application_id: i64, attempt: &NewAttempt) -> Result<AttemptStart> {
        let mut state = self.inner.lock().await;
        let Some(application) = state.applications.get(&application_id) else {
            bail!("application {} disappeared during initiation", application_id);
        };
        if application.is_paid {
            return Ok(AttemptStart::AlreadyPaid);
        }
        if state.reference_taken(&attempt.transaction_reference, application_id) {
            bail!(
                "transaction reference {} already in use",
                attempt.transaction_reference
            );
        }

        let now = Utc::now();
        if let Some(existing) = state.payments.get_mut(&application_id) {
            if existing.is_completed {
                return Ok(AttemptStart::AlreadyPaid);
            }
            existing.user_id = attempt.user_id;
            existing.transaction_reference = attempt.transaction_reference.clone();
            existing.amount = attempt.amount;
            existing.product_code = attempt.product_code.clone();
            existing.method = attempt.method;
            existing.status = PaymentStatus::Initiated;
            existing.gateway_token = None;
            existing.gateway_transaction_id = None;
            existing.updated_at = now;
            return Ok(AttemptStart::Superseded(existing.clone()));
        }

        state.next_id += 1;
        let record = PaymentRecord {
            id: state.next_id,
            application_id,
            user_id: attempt.user_id,
            transaction_reference: attempt.transaction_reference.clone(),
            gateway_transaction_id: None,
            gateway_token: None,
            amount: attempt.amount,
            product_code: attempt.product_code.clone(),
            status: PaymentStatus::Initiated,
            is_completed: false,
            method: attempt.method,
            payment_date: None,
            created_at: now,
            updated_at: now,
        };
        state.payments.insert(application_id, record.clone());
        Ok(AttemptStart::Created(record))
    }

    async fn attach_gateway_token(&self, reference: &str, token: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        if let Some(record) = state
            .payments
            .values_mut()
            .find(|p| p.transaction_reference == reference && !p.is_completed)
        {
            record.gateway_token = Some(token.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        key: &RecordKey,
        expected_reference: &str,
        verdict: &Verdict,
    ) -> Result<ReconcileOutcome> {
        let mut state = self.inner.lock().await;
        let Some(current) = state.find(key).cloned() else {
            return Ok(ReconcileOutcome::NotFound);
        };
        if current.transaction_reference != expected_reference {
            return Ok(ReconcileOutcome::Stale);
        }

        match plan(&current, verdict, Utc::now()) {
            Plan::AlreadyCompleted => Ok(ReconcileOutcome::AlreadyCompleted(current)),
            Plan::Unchanged => Ok(ReconcileOutcome::Unchanged(current)),
            Plan::Write {
                next,
                marks_application_paid,
            } => {
                if marks_application_paid {
                    let Some(application) = state.applications.get_mut(&next.application_id) else {
                        bail!("payment {} has no application", next.transaction_reference);
                    };
                    application.is_paid = true;
                }
                state.payments.insert(next.application_id, next.clone());
                Ok(ReconcileOutcome::Transitioned {
                    previous: current.status,
                    record: next,
                })
            }
        }
    }

    async fn list_by_status(&self, status: PaymentStatus, limit: i64) -> Result<Vec<PaymentRecord>> {
        let state = self.inner.lock().await;
        let mut out: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.updated_at);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}
