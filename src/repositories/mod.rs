//! Presence store: the shared key/value + pub/sub backend holding every connection record and room set.

mod memory;
mod redis_repo;

pub use memory::MemoryPresenceStore;
pub use redis_repo::RedisRepository;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::AppResult;

/// Payloads published on a channel, in publish order. Dropping it releases the subscription.
pub type Subscription = BoxStream<'static, String>;

/// Operations are atomic per key; nothing here spans more than one key. An unreachable backend
/// surfaces as a retryable error and never as a silently dropped mutation.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;

    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> AppResult<u64>;

    /// Returns true when `member` was not already present.
    async fn set_add(&self, set_key: &str, member: &str) -> AppResult<bool>;

    /// Returns true when `member` was present.
    async fn set_remove(&self, set_key: &str, member: &str) -> AppResult<bool>;

    async fn set_members(&self, set_key: &str) -> AppResult<Vec<String>>;

    /// Members of `set_key` matching a glob pattern (`*`, `?`).
    async fn set_scan(&self, set_key: &str, pattern: &str) -> AppResult<Vec<String>>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>>;

    /// Returns the number of subscribers that received the payload.
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<u64>;

    /// The subscription is active once this returns: later publishes are never missed.
    async fn subscribe(&self, channel: &str) -> AppResult<Subscription>;
}
