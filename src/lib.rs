pub mod config;
pub mod error;
pub mod codec {
    pub mod amount;
    pub mod signature;
}
pub mod domain {
    pub mod application;
    pub mod callback;
    pub mod payment;
}
pub mod gateways;
pub mod http {
    pub mod extract;
    pub mod handlers {
        pub mod ops;
        pub mod payments;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
}
pub mod reconcile {
    pub mod engine;
    pub mod memory;
    pub mod store;
}
pub mod repo {
    pub mod applications_repo;
    pub mod notifications_repo;
    pub mod payments_repo;
}
pub mod service {
    pub mod notifier;
    pub mod payment_service;
}
pub mod session;

#[derive(Clone)]
pub struct AppState {
    pub payment_service: service::payment_service::PaymentService,
    pub pool: sqlx::PgPool,
    pub redis_client: redis::Client,
    pub dashboard_url: String,
    pub session_ttl_secs: u64,
}
