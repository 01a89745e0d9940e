use admission_payments::config::AppConfig;
use admission_payments::gateways::esewa::EsewaGateway;
use admission_payments::gateways::khalti::KhaltiGateway;
use admission_payments::gateways::GatewayAdapter;
use admission_payments::http::handlers::{ops, payments};
use admission_payments::http::middleware::admin_auth::require_admin_api_key;
use admission_payments::repo::notifications_repo::NotificationsRepo;
use admission_payments::repo::payments_repo::PaymentsRepo;
use admission_payments::service::payment_service::PaymentService;
use admission_payments::session::store_redis::SessionStoreRedis;
use admission_payments::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("refusing to start: {}", e);
            return Err(e.into());
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let http_client = reqwest::Client::new();

    let adapters: Vec<Arc<dyn GatewayAdapter>> = vec![
        Arc::new(EsewaGateway::new(cfg.esewa.clone(), http_client.clone())),
        Arc::new(KhaltiGateway::new(cfg.khalti.clone(), http_client)),
    ];

    let payment_service = PaymentService::new(
        Arc::new(PaymentsRepo::new(pool.clone())),
        Arc::new(SessionStoreRedis::new(redis_client.clone(), cfg.session_ttl_secs)),
        Arc::new(NotificationsRepo { pool: pool.clone() }),
        adapters,
        cfg.public_base_url.clone(),
    );

    let state = AppState {
        payment_service,
        pool,
        redis_client,
        dashboard_url: cfg.dashboard_url.clone(),
        session_ttl_secs: cfg.session_ttl_secs,
    };

    let admin_routes = Router::new()
        .route("/admin/payments/:reference", get(payments::admin_get_payment))
        .route("/admin/payments/:reference/reverify", post(payments::admin_reverify))
        .layer(from_fn_with_state(cfg.admin_api_key.clone(), require_admin_api_key));

    let app = Router::new()
        .route("/health", get(payments::health))
        .route("/payments/esewa/initiate/:application_id", post(payments::initiate_esewa))
        .route("/payments/esewa/success", get(payments::esewa_success))
        .route("/payments/esewa/failure", get(payments::esewa_failure))
        .route("/payments/khalti/initiate/:application_id", post(payments::initiate_khalti))
        .route("/payments/khalti/return", get(payments::khalti_return))
        .route("/payments/khalti/failure", get(payments::khalti_failure))
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .merge(admin_routes)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
