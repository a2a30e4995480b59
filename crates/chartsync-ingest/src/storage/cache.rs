//! Redis cache

use super::CacheStore;
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to e.g. `redis://:password@127.0.0.1:6379/0`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set_json(&self, key: &str, value: &Value, ttl_secs: u64) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        if ttl_secs > 0 {
            conn.set_ex::<_, _, ()>(key, payload, ttl_secs).await?;
        } else {
            conn.set::<_, _, ()>(key, payload).await?;
        }
        debug!(key, ttl_secs, "Cache entry written");
        Ok(())
    }
}
