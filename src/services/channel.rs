//! Channel subscription and broadcast: one store subscription per channel, fan-out to local receivers.

use crate::error::AppResult;
use crate::models::event::{RoomBroadcast, ServerEvent};
use crate::models::channel::connection_channel;
use crate::repositories::PresenceStore;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const LOCAL_CAPACITY: usize = 256;

struct Topic {
    tx: broadcast::Sender<String>,
    refs: usize,
    pump: JoinHandle<()>,
}

/// Shares one upstream subscription per channel among every local connection listening on it.
/// The upstream is dropped when the last local subscriber releases the channel.
#[derive(Clone)]
pub struct ChannelService {
    store: Arc<dyn PresenceStore>,
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl ChannelService {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get a receiver for the channel. Each call must be paired with one [`release`](Self::release).
    ///
    /// The upstream subscribe runs without the topic lock, so connections opening different
    /// channels never wait on each other. When two callers race on the same channel the loser's
    /// upstream is dropped and it joins the winner's topic.
    pub async fn subscribe(&self, channel: &str) -> AppResult<broadcast::Receiver<String>> {
        if let Some(rx) = self.join_existing(channel).await {
            return Ok(rx);
        }

        let mut upstream = self.store.subscribe(channel).await?;

        let mut topics = self.topics.lock().await;
        if let Some(topic) = topics.get_mut(channel) {
            topic.refs += 1;
            debug!(channel = %channel, "channel opened concurrently, sharing it");
            return Ok(topic.tx.subscribe());
        }
        let (tx, rx) = broadcast::channel(LOCAL_CAPACITY);
        let tx_pump = tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(payload) = upstream.next().await {
                let _ = tx_pump.send(payload);
            }
        });
        topics.insert(channel.to_string(), Topic { tx, refs: 1, pump });
        debug!(channel = %channel, "channel opened");
        Ok(rx)
    }

    async fn join_existing(&self, channel: &str) -> Option<broadcast::Receiver<String>> {
        let mut topics = self.topics.lock().await;
        let topic = topics.get_mut(channel)?;
        topic.refs += 1;
        Some(topic.tx.subscribe())
    }

    /// Drop one local reference; closes the upstream subscription when none remain.
    pub async fn release(&self, channel: &str) {
        let mut topics = self.topics.lock().await;
        let Some(topic) = topics.get_mut(channel) else {
            return;
        };
        topic.refs = topic.refs.saturating_sub(1);
        if topic.refs == 0 {
            if let Some(topic) = topics.remove(channel) {
                topic.pump.abort();
            }
            debug!(channel = %channel, "channel closed");
        }
    }

    /// Number of channels with at least one local subscriber.
    pub async fn open_channels(&self) -> usize {
        self.topics.lock().await.len()
    }

    /// Publish any serializable frame to a channel.
    pub async fn publish<T: Serialize>(&self, channel: &str, frame: &T) -> AppResult<u64> {
        let payload = serde_json::to_string(frame)?;
        self.store.publish(channel, &payload).await
    }

    /// Send `event` to every connection in `room` except `except`.
    pub async fn broadcast_room(
        &self,
        room: &str,
        event: ServerEvent,
        except: Option<&str>,
    ) -> AppResult<u64> {
        let name = event.event.clone();
        let frame = RoomBroadcast {
            except: except.map(str::to_string),
            event,
        };
        let count = self.publish(room, &frame).await?;
        info!(room = %room, event = %name, count, "room broadcast");
        Ok(count)
    }

    /// Send `event` to a single connection, wherever it is hosted.
    pub async fn send_to_connection(&self, sid: &str, event: &ServerEvent) -> AppResult<u64> {
        let count = self.publish(&connection_channel(sid), event).await?;
        debug!(sid = %sid, event = %event.event, count, "direct send");
        Ok(count)
    }
}
