#![allow(dead_code)]

use admission_payments::config::{EsewaConfig, KhaltiConfig};
use admission_payments::domain::application::Application;
use admission_payments::domain::payment::PaymentRecord;
use admission_payments::gateways::esewa::EsewaGateway;
use admission_payments::gateways::khalti::KhaltiGateway;
use admission_payments::gateways::GatewayAdapter;
use admission_payments::reconcile::memory::MemoryStore;
use admission_payments::service::notifier::Notifier;
use admission_payments::service::payment_service::PaymentService;
use admission_payments::session::memory::MemorySessionStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use wiremock::MockServer;

pub const ESEWA_SECRET: &str = "8gBm/:&EnhH.1/q";
pub const KHALTI_SECRET: &str = "live_secret_key";

#[derive(Default)]
pub struct RecordingNotifier {
    completed: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn references(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_completed(&self, record: &PaymentRecord) -> anyhow::Result<()> {
        self.completed
            .lock()
            .unwrap()
            .push(record.transaction_reference.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: PaymentService,
    pub store: MemoryStore,
    pub sessions: MemorySessionStore,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn application(id: i64, user_id: i64, fee: &str) -> Application {
    Application {
        id,
        user_id,
        course_id: 100 + id,
        course_name: "BSc Computing".to_string(),
        course_code: Some("BSC-CS".to_string()),
        course_fee: Decimal::from_str(fee).unwrap(),
        is_paid: false,
    }
}

pub async fn harness(server: &MockServer) -> Harness {
    let client = reqwest::Client::new();
    let esewa = EsewaGateway::new(
        EsewaConfig {
            secret_key: ESEWA_SECRET.to_string(),
            product_code: "EPAYTEST".to_string(),
            form_url: format!("{}/form", server.uri()),
            status_url: format!("{}/status", server.uri()),
            timeout_ms: 300,
        },
        client.clone(),
    );
    let khalti = KhaltiGateway::new(
        KhaltiConfig {
            secret_key: KHALTI_SECRET.to_string(),
            initiate_url: format!("{}/epayment/initiate/", server.uri()),
            lookup_url: format!("{}/epayment/lookup/", server.uri()),
            timeout_ms: 300,
        },
        client,
    );
    let adapters: Vec<Arc<dyn GatewayAdapter>> = vec![Arc::new(esewa), Arc::new(khalti)];

    let store = MemoryStore::new();
    let sessions = MemorySessionStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let service = PaymentService::new(
        Arc::new(store.clone()),
        Arc::new(sessions.clone()),
        notifier.clone(),
        adapters,
        "https://portal.test/",
    );

    Harness {
        service,
        store,
        sessions,
        notifier,
    }
}

/// The `data` parameter eSewa appends to its success redirect.
pub fn esewa_data(reference: &str, transaction_code: &str, total_amount: &str) -> String {
    let payload = serde_json::json!({
        "transaction_code": transaction_code,
        "status": "COMPLETE",
        "total_amount": total_amount,
        "transaction_uuid": reference,
        "product_code": "EPAYTEST",
    });
    STANDARD.encode(payload.to_string())
}

pub fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
