use crate::session::{SessionStore, SessionValues};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<String, SessionValues>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session_id: &str, entries: &[(&str, String)]) -> Result<()> {
        let mut write = self.inner.write().await;
        let session = write.entry(session_id.to_string()).or_default();
        for (k, v) in entries {
            session.insert(k.to_string(), v.clone());
        }
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<SessionValues> {
        let read = self.inner.read().await;
        Ok(read.get(session_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, session_id: &str, keys: &[&str]) -> Result<()> {
        let mut write = self.inner.write().await;
        if let Some(session) = write.get_mut(session_id) {
            for k in keys {
                session.remove(*k);
            }
        }
        Ok(())
    }
}
