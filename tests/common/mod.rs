//! Shared fixtures: in-memory durable store, recording push transport, app state builder.

#![allow(dead_code)]

use async_trait::async_trait;
use chatrelay::auth::JwtSecret;
use chatrelay::db::ChatStore;
use chatrelay::error::{AppError, AppResult};
use chatrelay::models::{Message, NewMessage, Project, PushSubscription, User};
use chatrelay::repositories::{MemoryPresenceStore, PresenceStore, Subscription};
use chatrelay::services::PushTransport;
use chatrelay::{AppState, StateOptions};
use chrono::{Duration as TokenTtl, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const APP_KEY: &str = "test-app-key";
pub const JWT_SECRET: &str = "test-jwt-secret-min-32-chars!!";

/// Owner 1, coach 2, participants 3 and 4, all in project 7.
pub const PROJECT_ID: i64 = 7;

#[derive(Default)]
struct ChatData {
    users: HashMap<i64, User>,
    projects: HashMap<i64, Project>,
    messages: Vec<Message>,
    subscriptions: HashMap<i64, String>,
    fail_saves: bool,
}

#[derive(Clone, Default)]
pub struct MemoryChatStore {
    data: Arc<Mutex<ChatData>>,
}

impl MemoryChatStore {
    pub fn seeded() -> Self {
        let store = Self::default();
        {
            let mut data = store.data.lock().unwrap();
            for (id, name) in [(1, "olivia"), (2, "carl"), (3, "pete"), (4, "dana"), (9, "outsider")] {
                data.users.insert(
                    id,
                    User {
                        id,
                        username: name.to_string(),
                        first_name: None,
                        last_name: None,
                    },
                );
            }
            data.projects.insert(
                PROJECT_ID,
                Project {
                    id: PROJECT_ID,
                    title: "Apollo".to_string(),
                    owner_id: 1,
                    coach_ids: vec![2],
                    participant_ids: vec![3, 4],
                },
            );
        }
        store
    }

    pub fn messages(&self) -> Vec<Message> {
        self.data.lock().unwrap().messages.clone()
    }

    /// Make every later `save_message` fail as if the database were down.
    pub fn fail_saves(&self) {
        self.data.lock().unwrap().fail_saves = true;
    }

    pub fn insert_subscription(&self, user_id: i64, descriptor: &str) {
        self.data
            .lock()
            .unwrap()
            .subscriptions
            .insert(user_id, descriptor.to_string());
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_project(&self, id: i64) -> AppResult<Option<Project>> {
        Ok(self.data.lock().unwrap().projects.get(&id).cloned())
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.data.lock().unwrap().users.get(&id).cloned())
    }

    async fn save_message(&self, message: NewMessage) -> AppResult<Message> {
        let mut data = self.data.lock().unwrap();
        if data.fail_saves {
            return Err(AppError::Unavailable("database down".to_string()));
        }
        let saved = Message {
            id: data.messages.len() as i64 + 1,
            project_id: message.project_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            file_name: message.file_name,
            file_base64: message.file_base64,
            created_at: Utc::now(),
        };
        data.messages.push(saved.clone());
        Ok(saved)
    }

    async fn list_members_of_project(&self, id: i64) -> AppResult<Vec<i64>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .projects
            .get(&id)
            .map(|p| p.member_ids())
            .unwrap_or_default())
    }

    async fn save_push_subscription(
        &self,
        user_id: i64,
        subscription_json: &str,
    ) -> AppResult<PushSubscription> {
        self.insert_subscription(user_id, subscription_json);
        Ok(PushSubscription {
            user_id,
            subscription_json: subscription_json.to_string(),
        })
    }

    async fn delete_push_subscription(&self, user_id: i64) -> AppResult<bool> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .subscriptions
            .remove(&user_id)
            .is_some())
    }

    async fn list_push_subscriptions(&self) -> AppResult<Vec<PushSubscription>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .map(|(user_id, json)| PushSubscription {
                user_id: *user_id,
                subscription_json: json.clone(),
            })
            .collect())
    }
}

/// Push transport that records every send; optionally fails them all.
#[derive(Clone, Default)]
pub struct RecordingPush {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingPush {
    async fn send(&self, subscription: &str, payload: &str) -> AppResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((subscription.to_string(), payload.to_string()));
        if self.fail {
            return Err(AppError::Push("gateway down".to_string()));
        }
        Ok(())
    }
}

/// Presence store whose `publish` can be switched to fail; everything else goes to the memory store.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryPresenceStore>,
    fail_publish: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn fail_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PresenceStore for FlakyStore {
    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        self.inner.delete(keys).await
    }

    async fn set_add(&self, set_key: &str, member: &str) -> AppResult<bool> {
        self.inner.set_add(set_key, member).await
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> AppResult<bool> {
        self.inner.set_remove(set_key, member).await
    }

    async fn set_members(&self, set_key: &str) -> AppResult<Vec<String>> {
        self.inner.set_members(set_key).await
    }

    async fn set_scan(&self, set_key: &str, pattern: &str) -> AppResult<Vec<String>> {
        self.inner.set_scan(set_key, pattern).await
    }

    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<u64> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("publish refused".to_string()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> AppResult<Subscription> {
        self.inner.subscribe(channel).await
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryPresenceStore>,
    pub flaky: FlakyStore,
    pub chat: MemoryChatStore,
    pub push: RecordingPush,
}

pub fn harness() -> Harness {
    harness_with(RecordingPush::default())
}

pub fn harness_with(push: RecordingPush) -> Harness {
    let flaky = FlakyStore::default();
    let store = flaky.inner.clone();
    let chat = MemoryChatStore::seeded();
    let state = AppState::new(
        Arc::new(flaky.clone()),
        Arc::new(chat.clone()),
        Arc::new(push.clone()),
        JwtSecret::new(JWT_SECRET.to_string()),
        StateOptions {
            app_key: APP_KEY.to_string(),
            allowed_extensions: ["txt", "pdf", "png", "jpg", "jpeg", "gif", "doc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sse_retry_ms: 30_000,
        },
    );
    Harness {
        state,
        store,
        flaky,
        chat,
        push,
    }
}

pub fn token_for(user_id: i64) -> String {
    JwtSecret::new(JWT_SECRET.to_string())
        .issue(user_id, false, TokenTtl::hours(1))
        .unwrap()
}

/// Mirror a push subscription for `user_id` straight into the presence store.
pub async fn tag_push(store: &MemoryPresenceStore, user_id: i64) {
    store
        .set(
            &format!("webpush:sub:user:{}", user_id),
            r#"{"endpoint":"https://push.example/abc"}"#,
        )
        .await
        .unwrap();
}

/// Next frame from an outbox, parsed, within one second.
pub async fn next_frame(frames: &mut mpsc::UnboundedReceiver<String>) -> Value {
    let raw = timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbox closed");
    serde_json::from_str(&raw).unwrap()
}

/// Next frame whose `event` equals `event`, skipping others.
pub async fn next_event(frames: &mut mpsc::UnboundedReceiver<String>, event: &str) -> Value {
    loop {
        let frame = next_frame(frames).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

/// True when no frame arrives within a short grace period.
pub async fn stays_quiet(frames: &mut mpsc::UnboundedReceiver<String>) -> bool {
    timeout(Duration::from_millis(150), frames.recv()).await.is_err()
}

/// Let spawned forwarders run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
