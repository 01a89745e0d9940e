use crate::session::{SessionStore, SessionValues};
use anyhow::Result;
use redis::AsyncCommands;

#[derive(Clone)]
pub struct SessionStoreRedis {
    pub client: redis::Client,
    pub ttl_secs: u64,
}

impl SessionStoreRedis {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    fn session_key(session_id: &str) -> String {
        format!("payments:session:{}", session_id)
    }
}

#[async_trait::async_trait]
impl SessionStore for SessionStoreRedis {
    async fn put(&self, session_id: &str, entries: &[(&str, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::session_key(session_id);
        let _: () = conn.hset_multiple(&key, entries).await?;
        let _: bool = conn.expire(&key, self.ttl_secs as i64).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<SessionValues> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let values: SessionValues = conn.hgetall(Self::session_key(session_id)).await?;
        Ok(values)
    }

    async fn clear(&self, session_id: &str, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.hdel(Self::session_key(session_id), keys).await?;
        Ok(())
    }
}
