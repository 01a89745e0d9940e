use admission_payments::config::AppConfig;
use admission_payments::domain::payment::PaymentStatus;
use admission_payments::gateways::esewa::EsewaGateway;
use admission_payments::gateways::khalti::KhaltiGateway;
use admission_payments::gateways::GatewayAdapter;
use admission_payments::reconcile::store::PaymentStore;
use admission_payments::repo::notifications_repo::NotificationsRepo;
use admission_payments::repo::payments_repo::PaymentsRepo;
use admission_payments::service::payment_service::PaymentService;
use admission_payments::session::memory::MemorySessionStore;
use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const BATCH: i64 = 100;

/// Re-checks payments whose provider lookup could not be completed.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let store = Arc::new(PaymentsRepo::new(pool.clone()));
    let http_client = reqwest::Client::new();
    let adapters: Vec<Arc<dyn GatewayAdapter>> = vec![
        Arc::new(EsewaGateway::new(cfg.esewa.clone(), http_client.clone())),
        Arc::new(KhaltiGateway::new(cfg.khalti.clone(), http_client)),
    ];
    // no browser sessions here; re-verification works from stored tokens
    let service = PaymentService::new(
        store.clone(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(NotificationsRepo { pool }),
        adapters,
        cfg.public_base_url.clone(),
    );

    let interval = std::time::Duration::from_secs(cfg.reverify_interval_secs.max(1));
    loop {
        let due = store.list_by_status(PaymentStatus::VerificationError, BATCH).await?;
        if !due.is_empty() {
            tracing::info!("re-verifying {} payments", due.len());
        }
        for record in due {
            match service.reverify(&record.transaction_reference).await {
                Ok(report) => tracing::info!(
                    "payment {} re-verified: {}",
                    report.reference,
                    report.status
                ),
                Err(e) => tracing::warn!(
                    "payment {} still unverified: {}",
                    record.transaction_reference,
                    e
                ),
            }
        }

        tokio::time::sleep(interval).await;
    }
}
