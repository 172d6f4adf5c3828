//! Push-to-device delivery and the durable subscription mirror.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::channel::{user_push_key, user_tags_pattern};
use crate::repositories::PresenceStore;

/// Delivers a payload to the device described by an opaque subscription descriptor.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, subscription: &str, payload: &str) -> AppResult<()>;
}

/// Relays pushes to a web-push gateway, which owns VAPID signing and payload encryption.
#[derive(Clone)]
pub struct HttpPushTransport {
    client: reqwest::Client,
    gateway_url: String,
    vapid_subject: String,
}

impl HttpPushTransport {
    pub fn new(gateway_url: String, vapid_subject: String) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("push client: {}", e)))?;
        Ok(Self {
            client,
            gateway_url,
            vapid_subject,
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(&self, subscription: &str, payload: &str) -> AppResult<()> {
        let subscription: serde_json::Value = serde_json::from_str(subscription)?;
        let body = json!({
            "subscription": subscription,
            "payload": payload,
            "vapid_subject": self.vapid_subject,
        });
        let res = self
            .client
            .post(&self.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Push(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AppError::Push(format!("gateway answered {}", res.status())));
        }
        debug!(status = %res.status(), "push relayed");
        Ok(())
    }
}

/// Used when no gateway is configured: the push is logged and counts as delivered.
#[derive(Clone, Default)]
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    async fn send(&self, _subscription: &str, payload: &str) -> AppResult<()> {
        info!(payload = %payload, "push gateway not configured; push skipped");
        Ok(())
    }
}

/// Keeps the `webpush:` tags in the presence store in step with the durable subscriptions.
#[derive(Clone)]
pub struct SubscriptionService {
    chat: Arc<dyn ChatStore>,
    store: Arc<dyn PresenceStore>,
}

impl SubscriptionService {
    pub fn new(chat: Arc<dyn ChatStore>, store: Arc<dyn PresenceStore>) -> Self {
        Self { chat, store }
    }

    /// Store the descriptor durably, then mirror it.
    #[instrument(skip(self, descriptor))]
    pub async fn subscribe(&self, user_id: i64, descriptor: &serde_json::Value) -> AppResult<()> {
        let raw = serde_json::to_string(descriptor)?;
        let saved = self.chat.save_push_subscription(user_id, &raw).await?;
        self.store
            .set(&user_push_key(saved.user_id)?, &saved.subscription_json)
            .await?;
        info!(user_id, "push subscription stored");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, user_id: i64) -> AppResult<()> {
        if !self.chat.delete_push_subscription(user_id).await? {
            return Err(AppError::NotFound("Service Worker Key was not found.".to_string()));
        }
        self.store.delete(&[user_push_key(user_id)?]).await?;
        info!(user_id, "push subscription removed");
        Ok(())
    }

    /// Mirror every durable subscription into the store. Run before accepting traffic.
    pub async fn mirror_all(&self) -> AppResult<usize> {
        let subs = self.chat.list_push_subscriptions().await?;
        for sub in &subs {
            self.store
                .set(&user_push_key(sub.user_id)?, &sub.subscription_json)
                .await?;
        }
        info!(count = subs.len(), "push subscriptions mirrored");
        Ok(subs.len())
    }

    /// Drop every channel tag of a user and their durable subscription.
    #[instrument(skip(self))]
    pub async fn purge_user(&self, user_id: i64) -> AppResult<u64> {
        let keys = self.store.keys(&user_tags_pattern(user_id)).await?;
        let removed = self.store.delete(&keys).await?;
        if let Err(e) = self.chat.delete_push_subscription(user_id).await {
            warn!(user_id, error = %e, "could not delete push subscription");
            return Err(e);
        }
        info!(user_id, removed, "user channels purged");
        Ok(removed)
    }
}
