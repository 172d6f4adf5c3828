//! The durable store as seen by the realtime core.

use async_trait::async_trait;

use super::{repositories as repo, DbPool};
use crate::error::AppResult;
use crate::models::{Message, NewMessage, Project, PushSubscription, User};

/// CRUD over users, projects, messages and push subscriptions.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_project(&self, id: i64) -> AppResult<Option<Project>>;

    async fn get_user(&self, id: i64) -> AppResult<Option<User>>;

    async fn save_message(&self, message: NewMessage) -> AppResult<Message>;

    async fn list_members_of_project(&self, id: i64) -> AppResult<Vec<i64>>;

    /// Insert or replace the user's subscription.
    async fn save_push_subscription(
        &self,
        user_id: i64,
        subscription_json: &str,
    ) -> AppResult<PushSubscription>;

    /// Returns false when the user had no subscription.
    async fn delete_push_subscription(&self, user_id: i64) -> AppResult<bool>;

    async fn list_push_subscriptions(&self) -> AppResult<Vec<PushSubscription>>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn get_project(&self, id: i64) -> AppResult<Option<Project>> {
        repo::project_get(&self.pool, id).await
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        repo::user_get_by_id(&self.pool, id).await
    }

    async fn save_message(&self, message: NewMessage) -> AppResult<Message> {
        repo::message_create(&self.pool, &message).await
    }

    async fn list_members_of_project(&self, id: i64) -> AppResult<Vec<i64>> {
        repo::project_member_ids(&self.pool, id).await
    }

    async fn save_push_subscription(
        &self,
        user_id: i64,
        subscription_json: &str,
    ) -> AppResult<PushSubscription> {
        repo::push_subscription_upsert(&self.pool, user_id, subscription_json).await
    }

    async fn delete_push_subscription(&self, user_id: i64) -> AppResult<bool> {
        repo::push_subscription_delete(&self.pool, user_id).await
    }

    async fn list_push_subscriptions(&self) -> AppResult<Vec<PushSubscription>> {
        repo::push_subscriptions_all(&self.pool).await
    }
}
