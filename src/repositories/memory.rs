//! In-process presence store for single-node development and tests.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{PresenceStore, Subscription};
use crate::error::AppResult;

const TOPIC_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
}

/// Same semantics as the Redis store, held in process memory. Every operation takes the lock once,
/// so each one is atomic.
#[derive(Clone, Default)]
pub struct MemoryPresenceStore {
    inner: Arc<RwLock<Inner>>,
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.sets.remove(key);
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.inner.read().await.values.get(key).cloned())
    }

    async fn delete(&self, keys: &[String]) -> AppResult<u64> {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            if inner.values.remove(key).is_some() || inner.sets.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn set_add(&self, set_key: &str, member: &str) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.sets.get_mut(set_key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            inner.sets.remove(set_key);
        }
        Ok(removed)
    }

    async fn set_members(&self, set_key: &str) -> AppResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_scan(&self, set_key: &str, pattern: &str) -> AppResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(set_key)
            .map(|s| s.iter().filter(|m| glob_match(pattern, m)).cloned().collect())
            .unwrap_or_default())
    }

    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .values
            .keys()
            .chain(inner.sets.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> AppResult<u64> {
        let topics = self.topics.read().await;
        let count = match topics.get(channel) {
            Some(tx) => tx.send(payload.to_string()).unwrap_or(0) as u64,
            None => 0,
        };
        debug!(channel = %channel, count, "published");
        Ok(count)
    }

    async fn subscribe(&self, channel: &str) -> AppResult<Subscription> {
        let rx = {
            let mut topics = self.topics.write().await;
            topics
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
                .subscribe()
        };
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "memory subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Redis-style glob: `*` matches any run, `?` any single character, `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == t[ti] => {
                    pi += 2;
                    ti += 1;
                    continue;
                }
                c if c != '\\' && c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
