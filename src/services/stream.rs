//! Per-user event streams fed from the user's `sse:` channel.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::AppResult;
use crate::models::channel::user_stream_channel;
use crate::models::stream::StreamedEvent;
use crate::repositories::PresenceStore;

struct ActiveStream {
    generation: u64,
    stop: watch::Sender<bool>,
}

/// Opens and tears down event streams. While a stream is open the user's channel is tagged, which
/// makes the notification router pick it over push.
#[derive(Clone)]
pub struct StreamService {
    store: Arc<dyn PresenceStore>,
    active: Arc<Mutex<HashMap<i64, ActiveStream>>>,
    generations: Arc<AtomicU64>,
}

impl StreamService {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to the user's channel and tag it active. The returned stream never restarts; it
    /// ends on [`disconnect`](Self::disconnect) or when a newer stream for the same user opens
    /// here. Dropping it untags the channel.
    #[instrument(skip(self))]
    pub async fn stream(&self, user_id: i64) -> AppResult<EventStream> {
        let channel = user_stream_channel(user_id)?;
        let subscription = self.store.subscribe(&channel).await?;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        {
            // Tag and take over under the lock: a release of an older stream either finished
            // before this point or will see that it is no longer current.
            let mut active = self.active.lock().await;
            self.store.set(&channel, &channel).await?;
            let previous = active.insert(
                user_id,
                ActiveStream {
                    generation,
                    stop: stop_tx,
                },
            );
            if let Some(previous) = previous {
                let _ = previous.stop.send(true);
                debug!(user_id, "previous stream superseded");
            }
        }

        let stopped = async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        };
        let events = subscription
            .filter_map(|raw| async move {
                match serde_json::from_str::<StreamedEvent>(&raw) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "discarding malformed stream payload");
                        None
                    }
                }
            })
            .take_until(stopped)
            .boxed();

        info!(user_id, channel = %channel, "event stream opened");
        Ok(EventStream {
            events,
            guard: StreamGuard {
                service: self.clone(),
                user_id,
                channel,
                generation,
            },
        })
    }

    /// End the user's stream on this instance and untag the channel. Idempotent.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, user_id: i64) -> AppResult<()> {
        let channel = user_stream_channel(user_id)?;
        let mut active = self.active.lock().await;
        if let Some(previous) = active.remove(&user_id) {
            let _ = previous.stop.send(true);
        }
        self.store.delete(&[channel]).await?;
        info!(user_id, "event stream disconnected");
        Ok(())
    }

    pub async fn is_streaming(&self, user_id: i64) -> bool {
        self.active.lock().await.contains_key(&user_id)
    }

    /// Cleanup for a dropped stream: only the current stream of a user clears the tag. The lock is
    /// held through the delete so a stream opening meanwhile re-tags after it.
    async fn release(&self, user_id: i64, channel: String, generation: u64) {
        let mut active = self.active.lock().await;
        match active.get(&user_id) {
            Some(s) if s.generation == generation => {
                active.remove(&user_id);
            }
            _ => return,
        }
        if let Err(e) = self.store.delete(&[channel]).await {
            warn!(user_id, error = %e, "could not clear stream tag");
        }
        debug!(user_id, "event stream released");
    }
}

struct StreamGuard {
    service: StreamService,
    user_id: i64,
    channel: String,
    generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let service = self.service.clone();
        let (user_id, generation) = (self.user_id, self.generation);
        let channel = std::mem::take(&mut self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { service.release(user_id, channel, generation).await });
            }
            Err(_) => warn!(user_id, "no runtime to release event stream"),
        }
    }
}

/// Lazy, infinite sequence of events for one user.
pub struct EventStream {
    events: BoxStream<'static, StreamedEvent>,
    guard: StreamGuard,
}

impl EventStream {
    pub fn user_id(&self) -> i64 {
        self.guard.user_id
    }
}

impl Stream for EventStream {
    type Item = StreamedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
