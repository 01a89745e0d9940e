use anyhow::Result;
use std::collections::HashMap;

pub mod memory;
pub mod store_redis;

/// Correlation values cached between initiation and the provider's redirect back.
pub mod keys {
    pub const KHALTI_PIDX: &str = "khalti_pidx";
    pub const KHALTI_ORDER_ID: &str = "khalti_order_id";
    pub const KHALTI_APPLICATION_ID: &str = "khalti_application_id";
    pub const KHALTI_AMOUNT_PAISA: &str = "khalti_amount_paisa";
    pub const KHALTI_COURSE_NAME: &str = "khalti_course_name";

    pub const KHALTI_ALL: [&str; 5] = [
        KHALTI_PIDX,
        KHALTI_ORDER_ID,
        KHALTI_APPLICATION_ID,
        KHALTI_AMOUNT_PAISA,
        KHALTI_COURSE_NAME,
    ];
}

pub type SessionValues = HashMap<String, String>;

/// Key-value store scoped to one browser session id.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session_id: &str, entries: &[(&str, String)]) -> Result<()>;

    async fn load(&self, session_id: &str) -> Result<SessionValues>;

    async fn clear(&self, session_id: &str, keys: &[&str]) -> Result<()>;
}
