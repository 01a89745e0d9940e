use crate::codec::amount::ensure_positive;
use crate::domain::callback::{CallbackParams, Correlation, RecordKey};
use crate::domain::payment::{NewAttempt, PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::PaymentError;
use crate::gateways::{callback_paths, AttemptContext, GatewayAdapter, InitiationPayload};
use crate::reconcile::engine::{ReconcileOutcome, Verdict};
use crate::reconcile::store::{AttemptStart, PaymentStore};
use crate::service::notifier::Notifier;
use crate::session::{SessionStore, SessionValues};
use anyhow::anyhow;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InitiateResult {
    AlreadyPaid,
    Started {
        reference: String,
        payload: InitiationPayload,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// This call moved the record into COMPLETE.
    Paid,
    AlreadyPaid,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackReport {
    pub reference: String,
    pub status: PaymentStatus,
    pub outcome: CallbackOutcome,
}

pub type Adapters = HashMap<PaymentMethod, Arc<dyn GatewayAdapter>>;

#[derive(Clone)]
pub struct PaymentService {
    pub store: Arc<dyn PaymentStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub adapters: Arc<Adapters>,
    pub public_base_url: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        adapters: Vec<Arc<dyn GatewayAdapter>>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.method(), a)).collect();
        Self {
            store,
            sessions,
            notifier,
            adapters: Arc::new(adapters),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn adapter(&self, method: PaymentMethod) -> Result<&Arc<dyn GatewayAdapter>, PaymentError> {
        self.adapters
            .get(&method)
            .ok_or_else(|| PaymentError::Internal(anyhow!("no adapter registered for {}", method)))
    }

    pub async fn initiate(
        &self,
        method: PaymentMethod,
        application_id: i64,
        caller: i64,
        session_id: Option<&str>,
    ) -> Result<InitiateResult, PaymentError> {
        let adapter = self.adapter(method)?;
        let application = self
            .store
            .application(application_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("application {}", application_id)))?;

        if application.user_id != caller {
            tracing::warn!(
                "user {} attempted to pay for application {} owned by {}",
                caller,
                application_id,
                application.user_id
            );
            return Err(PaymentError::Authorization {
                caller,
                application_id,
            });
        }
        if application.is_paid {
            return Ok(InitiateResult::AlreadyPaid);
        }
        let amount = ensure_positive(application.course_fee)?;

        let attempt = NewAttempt {
            user_id: caller,
            transaction_reference: adapter.new_reference(application_id),
            amount,
            product_code: adapter.product_code().to_string(),
            method,
        };
        let record = match self.store.begin_attempt(application_id, &attempt).await? {
            AttemptStart::AlreadyPaid => return Ok(InitiateResult::AlreadyPaid),
            AttemptStart::Created(r) => r,
            AttemptStart::Superseded(r) => {
                tracing::info!(
                    "application {} open attempt superseded by {}",
                    application_id,
                    r.transaction_reference
                );
                r
            }
        };

        let paths = callback_paths(method);
        let ctx = AttemptContext {
            application: &application,
            record: &record,
            success_url: format!("{}{}", self.public_base_url, paths.success),
            failure_url: format!("{}{}", self.public_base_url, paths.failure),
            website_url: self.public_base_url.clone(),
        };
        let payload = adapter.initiate(&ctx).await.map_err(|e| {
            tracing::warn!(
                "{} initiation failed for {}: {}",
                method,
                record.transaction_reference,
                e
            );
            e
        })?;

        if let InitiationPayload::Redirect { token, session, .. } = &payload {
            if let Some(token) = token {
                self.store
                    .attach_gateway_token(&record.transaction_reference, token)
                    .await?;
            }
            if let (Some(session_id), false) = (session_id, session.is_empty()) {
                self.sessions.put(session_id, session).await?;
            }
        }

        tracing::info!(
            "initiated {} payment {} for application {} amount {}",
            method,
            record.transaction_reference,
            application_id,
            record.amount
        );
        Ok(InitiateResult::Started {
            reference: record.transaction_reference,
            payload,
        })
    }

    /// Success/return redirect. Nothing in `params` is trusted: the record only
    /// moves after the provider's status API confirms status and amount.
    pub async fn handle_callback(
        &self,
        method: PaymentMethod,
        params: CallbackParams,
        session_id: Option<&str>,
    ) -> Result<CallbackReport, PaymentError> {
        let adapter = self.adapter(method)?;
        let session = self.load_session(session_id).await;

        let result = match adapter.decode_callback(&params, &session) {
            Ok(correlation) => self.verify_and_apply(adapter.as_ref(), &correlation).await,
            Err(e) => Err(e),
        };

        self.clear_session(adapter.as_ref(), session_id).await;
        if let Err(e) = &result {
            tracing::warn!("{} callback rejected: {}", method, e);
        }
        result
    }

    /// Failure/cancel redirect. Returns the record if one was correlated.
    pub async fn handle_failure(
        &self,
        method: PaymentMethod,
        params: CallbackParams,
        session_id: Option<&str>,
    ) -> Result<Option<PaymentRecord>, PaymentError> {
        let adapter = self.adapter(method)?;
        let session = self.load_session(session_id).await;
        let correlation = adapter.decode_failure(&params, &session);
        self.clear_session(adapter.as_ref(), session_id).await;

        let Some(correlation) = correlation else {
            tracing::info!("{} failure redirect without a usable reference", method);
            return Ok(None);
        };
        let Some(record) = self.find(&correlation.key).await? else {
            return Ok(None);
        };
        if record.method != method || !token_matches(adapter.as_ref(), &record, &correlation) {
            tracing::warn!(
                "{} failure redirect does not match current attempt {}",
                method,
                record.transaction_reference
            );
            return Ok(None);
        }

        let verdict = Verdict::Abandoned {
            status: adapter.failure_status(),
        };
        match self
            .store
            .reconcile(&correlation.key, &record.transaction_reference, &verdict)
            .await?
        {
            ReconcileOutcome::Transitioned { previous, record } => {
                tracing::info!(
                    "payment {} {} -> {} on failure redirect",
                    record.transaction_reference,
                    previous,
                    record.status
                );
                Ok(Some(record))
            }
            ReconcileOutcome::AlreadyCompleted(record) => Ok(Some(record)),
            ReconcileOutcome::Unchanged(record) => {
                tracing::info!(
                    "failure redirect leaves {} at {}",
                    record.transaction_reference,
                    record.status
                );
                Ok(Some(record))
            }
            ReconcileOutcome::Stale | ReconcileOutcome::NotFound => Ok(None),
        }
    }

    /// Operator or sweeper driven re-check of one attempt.
    pub async fn reverify(&self, reference: &str) -> Result<CallbackReport, PaymentError> {
        let record = self.payment(reference).await?;
        if record.is_completed {
            return Ok(report(&record, CallbackOutcome::AlreadyPaid));
        }
        if !record.status.is_reverifiable() {
            return Err(PaymentError::NotRetryable {
                reference: record.transaction_reference,
                status: record.status,
            });
        }

        let adapter = self.adapter(record.method)?;
        let correlation = Correlation {
            key: RecordKey::Reference(record.transaction_reference.clone()),
            token: record.gateway_token.clone(),
            gateway_transaction_id: record.gateway_transaction_id.clone(),
        };
        let verdict = adapter.verify(&record, &correlation).await;
        self.apply(&record, &correlation.key, verdict).await
    }

    pub async fn payment(&self, reference: &str) -> Result<PaymentRecord, PaymentError> {
        self.store
            .payment_by_reference(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", reference)))
    }

    async fn verify_and_apply(
        &self,
        adapter: &dyn GatewayAdapter,
        correlation: &Correlation,
    ) -> Result<CallbackReport, PaymentError> {
        let record = self
            .find(&correlation.key)
            .await?
            .ok_or_else(|| PaymentError::NotFound("payment record for callback".to_string()))?;

        if record.method != adapter.method() {
            return Err(PaymentError::MalformedCallback(format!(
                "{} callback names a {} payment",
                adapter.method(),
                record.method
            )));
        }
        if !token_matches(adapter, &record, correlation) {
            return Err(PaymentError::MalformedCallback(format!(
                "callback token does not belong to {}",
                record.transaction_reference
            )));
        }
        if record.is_completed {
            return Ok(report(&record, CallbackOutcome::AlreadyPaid));
        }

        // provider call happens outside any lock
        let verdict = adapter.verify(&record, correlation).await;
        self.apply(&record, &correlation.key, verdict).await
    }

    async fn apply(
        &self,
        record: &PaymentRecord,
        key: &RecordKey,
        verdict: Verdict,
    ) -> Result<CallbackReport, PaymentError> {
        let outcome = self
            .store
            .reconcile(key, &record.transaction_reference, &verdict)
            .await?;
        let completed_now = outcome.completed_now();

        let next = match outcome {
            ReconcileOutcome::AlreadyCompleted(r) => {
                return Ok(report(&r, CallbackOutcome::AlreadyPaid));
            }
            ReconcileOutcome::Unchanged(r) => {
                return Err(PaymentError::NotRetryable {
                    reference: r.transaction_reference,
                    status: r.status,
                });
            }
            ReconcileOutcome::Stale => {
                tracing::info!(
                    "attempt {} was superseded during verification",
                    record.transaction_reference
                );
                return Err(PaymentError::NotFound(format!(
                    "open attempt {}",
                    record.transaction_reference
                )));
            }
            ReconcileOutcome::NotFound => {
                return Err(PaymentError::NotFound(format!(
                    "payment {}",
                    record.transaction_reference
                )));
            }
            ReconcileOutcome::Transitioned { previous, record } => {
                tracing::info!(
                    "payment {} {} -> {}",
                    record.transaction_reference,
                    previous,
                    record.status
                );
                record
            }
        };

        if completed_now {
            if let Err(e) = self.notifier.payment_completed(&next).await {
                tracing::error!(
                    "notification for payment {} failed: {:#}",
                    next.transaction_reference,
                    e
                );
            }
        }

        match verdict {
            Verdict::Completed { .. } => Ok(report(&next, CallbackOutcome::Paid)),
            Verdict::Reported {
                status: PaymentStatus::Pending,
                ..
            } => Ok(report(&next, CallbackOutcome::Pending)),
            Verdict::Reported { raw, .. } => Err(PaymentError::VerificationMismatch(format!(
                "provider reported {}",
                raw
            ))),
            Verdict::AmountMismatch { expected, reported } => {
                tracing::warn!(
                    "payment {} amount mismatch: expected {} got {}",
                    next.transaction_reference,
                    expected,
                    reported
                );
                Err(PaymentError::VerificationMismatch(format!(
                    "amount {} does not match {}",
                    reported, expected
                )))
            }
            Verdict::Unverifiable { reason } => Err(PaymentError::Transport(reason)),
            Verdict::Abandoned { status } => Err(PaymentError::VerificationMismatch(format!(
                "attempt abandoned as {}",
                status
            ))),
        }
    }

    async fn find(&self, key: &RecordKey) -> Result<Option<PaymentRecord>, PaymentError> {
        let found = match key {
            RecordKey::Reference(reference) => self.store.payment_by_reference(reference).await?,
            RecordKey::Application(id) => self.store.payment_by_application(*id).await?,
        };
        Ok(found)
    }

    async fn load_session(&self, session_id: Option<&str>) -> SessionValues {
        let Some(session_id) = session_id else {
            return SessionValues::new();
        };
        match self.sessions.load(session_id).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("session load failed: {:#}", e);
                SessionValues::new()
            }
        }
    }

    async fn clear_session(&self, adapter: &dyn GatewayAdapter, session_id: Option<&str>) {
        let keys = adapter.session_keys();
        let Some(session_id) = session_id else { return };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.sessions.clear(session_id, keys).await {
            tracing::warn!("session clear failed: {:#}", e);
        }
    }
}

/// For token-issuing providers the record must hold a token and the callback
/// must present that same token. Otherwise a token, when both sides have one,
/// must agree.
fn token_matches(adapter: &dyn GatewayAdapter, record: &PaymentRecord, correlation: &Correlation) -> bool {
    match (&record.gateway_token, &correlation.token) {
        (Some(stored), Some(received)) => stored == received,
        _ => !adapter.issues_token(),
    }
}

fn report(record: &PaymentRecord, outcome: CallbackOutcome) -> CallbackReport {
    CallbackReport {
        reference: record.transaction_reference.clone(),
        status: record.status,
        outcome,
    }
}
