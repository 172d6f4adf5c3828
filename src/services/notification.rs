//! Offline notification routing: event stream first, push second, otherwise dropped.

use crate::error::AppResult;
use crate::models::channel::{user_push_key, user_stream_channel};
use crate::models::notification::{Delivery, Envelope};
use crate::models::stream::StreamedEvent;
use crate::repositories::PresenceStore;
use crate::services::push::PushTransport;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Picks exactly one delivery channel per recipient. There is no outbox: a user with neither an
/// active stream nor a push subscription does not get the notification.
#[derive(Clone)]
pub struct NotificationRouter {
    store: Arc<dyn PresenceStore>,
    push: Arc<dyn PushTransport>,
    retry_ms: u64,
}

impl NotificationRouter {
    pub fn new(store: Arc<dyn PresenceStore>, push: Arc<dyn PushTransport>, retry_ms: u64) -> Self {
        Self {
            store,
            push,
            retry_ms,
        }
    }

    /// Deliver `envelope` to one user. Push failures are logged and reported as
    /// [`Delivery::PushFailed`]; only store failures are errors.
    #[instrument(skip(self, envelope), fields(kind = ?envelope.kind))]
    pub async fn route(&self, user_id: i64, envelope: &Envelope) -> AppResult<Delivery> {
        let action = envelope.kind.action();

        if let Some(channel) = self.store.get(&user_stream_channel(user_id)?).await? {
            let event = StreamedEvent::new(serde_json::to_value(envelope)?)
                .with_type(action)
                .with_retry(Some(self.retry_ms));
            let payload = serde_json::to_string(&event)?;
            let count = self.store.publish(&channel, &payload).await?;
            debug!(user_id, channel = %channel, count, "notification streamed");
            return Ok(Delivery::Stream);
        }

        if let Some(subscription) = self.store.get(&user_push_key(user_id)?).await? {
            let payload = json!({ "type": action, "data": envelope }).to_string();
            return match self.push.send(&subscription, &payload).await {
                Ok(()) => {
                    debug!(user_id, "notification pushed");
                    Ok(Delivery::Push)
                }
                Err(e) => {
                    error!(user_id, error = %e, "push delivery failed");
                    Ok(Delivery::PushFailed)
                }
            };
        }

        debug!(user_id, "no reachable channel; notification dropped");
        Ok(Delivery::Dropped)
    }

    /// Route to every id in `members` not in `exclude`, once per distinct id.
    pub async fn notify_members(
        &self,
        members: &[i64],
        exclude: &[i64],
        envelope: &Envelope,
    ) -> AppResult<Vec<(i64, Delivery)>> {
        let recipients = recipients(members, exclude);
        let mut outcomes = Vec::with_capacity(recipients.len());
        for user_id in recipients {
            outcomes.push((user_id, self.route(user_id, envelope).await?));
        }
        info!(
            recipients = outcomes.len(),
            excluded = exclude.len(),
            "notification fan-out"
        );
        Ok(outcomes)
    }
}

/// `members` minus `exclude`, deduplicated and ordered.
pub fn recipients(members: &[i64], exclude: &[i64]) -> Vec<i64> {
    let exclude: BTreeSet<i64> = exclude.iter().copied().collect();
    members
        .iter()
        .copied()
        .filter(|id| !exclude.contains(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::notification::NotificationKind;
    use crate::repositories::MemoryPresenceStore;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPush {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl PushTransport for RecordingPush {
        async fn send(&self, subscription: &str, payload: &str) -> AppResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((subscription.to_string(), payload.to_string()));
            if self.fail {
                return Err(AppError::Push("gone".into()));
            }
            Ok(())
        }
    }

    fn envelope() -> Envelope {
        Envelope::new(NotificationKind::ProjectEdited, "edited", json!({ "id": 1 }))
    }

    #[test]
    fn recipients_is_set_difference() {
        assert_eq!(recipients(&[3, 1, 2, 3, 4], &[2, 9]), vec![1, 3, 4]);
        assert!(recipients(&[1], &[1]).is_empty());
    }

    #[tokio::test]
    async fn stream_tag_wins_and_push_is_untouched() {
        let store = Arc::new(MemoryPresenceStore::new());
        let push = Arc::new(RecordingPush::default());
        let router = NotificationRouter::new(store.clone(), push.clone(), 30_000);

        let channel = user_stream_channel(1).unwrap();
        store.set(&channel, &channel).await.unwrap();
        store.set(&user_push_key(1).unwrap(), r#"{"endpoint":"x"}"#).await.unwrap();
        let mut sub = store.subscribe(&channel).await.unwrap();

        assert_eq!(router.route(1, &envelope()).await.unwrap(), Delivery::Stream);
        let ev: StreamedEvent = serde_json::from_str(&sub.next().await.unwrap()).unwrap();
        assert_eq!(ev.event_type.as_deref(), Some("action-project"));
        assert_eq!(ev.data["type"], "project-edited");
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_tag_used_without_stream() {
        let store = Arc::new(MemoryPresenceStore::new());
        let push = Arc::new(RecordingPush::default());
        let router = NotificationRouter::new(store.clone(), push.clone(), 30_000);
        store.set(&user_push_key(2).unwrap(), r#"{"endpoint":"x"}"#).await.unwrap();

        assert_eq!(router.route(2, &envelope()).await.unwrap(), Delivery::Push);
        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, r#"{"endpoint":"x"}"#);
        let payload: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(payload["type"], "action-project");
        assert_eq!(payload["data"]["message"], "edited");
    }

    #[tokio::test]
    async fn untagged_user_is_dropped_quietly() {
        let store = Arc::new(MemoryPresenceStore::new());
        let push = Arc::new(RecordingPush::default());
        let router = NotificationRouter::new(store, push.clone(), 30_000);
        assert_eq!(router.route(3, &envelope()).await.unwrap(), Delivery::Dropped);
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_failure_does_not_stop_fan_out() {
        let store = Arc::new(MemoryPresenceStore::new());
        let push = Arc::new(RecordingPush {
            fail: true,
            ..Default::default()
        });
        let router = NotificationRouter::new(store.clone(), push.clone(), 30_000);
        store.set(&user_push_key(1).unwrap(), "{}").await.unwrap();
        store.set(&user_push_key(2).unwrap(), "{}").await.unwrap();

        let outcomes = router.notify_members(&[1, 2, 3], &[3], &envelope()).await.unwrap();
        assert_eq!(
            outcomes,
            vec![(1, Delivery::PushFailed), (2, Delivery::PushFailed)]
        );
        assert_eq!(push.sent.lock().unwrap().len(), 2);
    }
}
