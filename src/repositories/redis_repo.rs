//! Redis connection and pub/sub for presence storage and channel messaging.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, info};

use super::{PresenceStore, Subscription};
use crate::error::{AppError, AppResult};

/// Redis-backed presence store: plain keys for connection records and tags, sets for rooms,
/// pub/sub for live frames and event streams.
#[derive(Clone)]
pub struct RedisRepository {
    client: Arc<redis::Client>,
    manager: ConnectionManager,
}

impl RedisRepository {
    /// Connect to Redis. The command connection reconnects on its own after failures.
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        info!("connected to redis");
        Ok(Self {
            client: Arc::new(client),
            manager,
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl PresenceStore for RedisRepository {
    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.connection();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn set_add(&self, set_key: &str, member: &str) -> AppResult<bool> {
        let mut conn = self.connection();
        let added: u64 = conn.sadd(set_key, member).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> AppResult<bool> {
        let mut conn = self.connection();
        let removed: u64 = conn.srem(set_key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, set_key: &str) -> AppResult<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.smembers(set_key).await?;
        Ok(members)
    }

    async fn set_scan(&self, set_key: &str, pattern: &str) -> AppResult<Vec<String>> {
        let mut conn = self.connection();
        let iter = conn.sscan_match::<_, _, String>(set_key, pattern).await?;
        let members: Vec<String> = iter.collect().await;
        Ok(members)
    }

    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let mut conn = self.connection();
        let iter = conn.scan_match::<_, String>(pattern).await?;
        let keys: Vec<String> = iter.collect().await;
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<u64> {
        let mut conn = self.connection();
        let count: u64 = conn.publish(channel, payload).await?;
        debug!(channel = %channel, count, "published");
        Ok(count)
    }

    /// One dedicated pub/sub connection per subscription; dropping the stream closes it.
    async fn subscribe(&self, channel: &str) -> AppResult<Subscription> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| AppError::Unavailable(format!("pub/sub connection for {}: {}", channel, e)))?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        debug!(channel = %channel, "subscribed to redis channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(stream.boxed())
    }
}
