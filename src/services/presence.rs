//! Room registry: connection records and room membership sets in the presence store.

use crate::error::{AppError, AppResult};
use crate::models::channel::{connection_key, room_name, PRESENCE_KEY_PATTERNS};
use crate::models::presence::{ConnectionRecord, JoinOutcome, LeaveOutcome, OnlineMember};
use crate::repositories::PresenceStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Room membership operations. Every mutation is a single-key store operation, so concurrent
/// joins and leaves on one room never lose a set entry.
#[derive(Clone)]
pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
}

impl PresenceService {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self { store }
    }

    /// `room:project:<id>`
    pub fn derive_room_name(project_id: i64) -> String {
        room_name(project_id)
    }

    /// Remember which user owns `sid`.
    #[instrument(skip(self))]
    pub async fn register_connection(&self, sid: &str, user_id: i64) -> AppResult<()> {
        let record = ConnectionRecord::identity(user_id).encode()?;
        self.store.set(&connection_key(sid), &record).await?;
        info!(sid = %sid, user_id, "connection registered");
        Ok(())
    }

    pub async fn connection(&self, sid: &str) -> AppResult<Option<ConnectionRecord>> {
        let Some(raw) = self.store.get(&connection_key(sid)).await? else {
            return Ok(None);
        };
        Ok(Some(ConnectionRecord::decode(&raw)?))
    }

    /// Owner of `sid`; an unregistered connection is an authentication failure.
    pub async fn user_of(&self, sid: &str) -> AppResult<i64> {
        self.connection(sid)
            .await?
            .map(|r| r.user_id)
            .ok_or_else(|| AppError::Auth(format!("connection {} is not registered", sid)))
    }

    /// Add the connection to `room` and point its record at the room. Returns every online
    /// member, the joiner included. A user connected twice appears twice.
    #[instrument(skip(self))]
    pub async fn join(&self, sid: &str, room: &str) -> AppResult<JoinOutcome> {
        let user_id = self.user_of(sid).await?;
        let record = ConnectionRecord::in_room(user_id, sid, room).encode()?;
        self.store.set_add(room, &record).await?;
        self.store.set(&connection_key(sid), &record).await?;
        let online = self.list_online_members(room).await?;
        info!(sid = %sid, user_id, room = %room, online = online.len(), "joined room");
        Ok(JoinOutcome {
            room: room.to_string(),
            user_id,
            online,
        })
    }

    /// Remove the connection from its room and clear the room pointer. `None` when the
    /// connection was not in a room.
    #[instrument(skip(self))]
    pub async fn leave(&self, sid: &str) -> AppResult<Option<LeaveOutcome>> {
        let Some(record) = self.connection(sid).await? else {
            return Ok(None);
        };
        let Some(room) = record.room.clone() else {
            return Ok(None);
        };
        let removed = self.store.set_remove(&room, &record.encode()?).await?;
        if !removed {
            warn!(sid = %sid, room = %room, "connection record missing from room set");
        }
        let identity = ConnectionRecord::identity(record.user_id).encode()?;
        self.store.set(&connection_key(sid), &identity).await?;
        info!(sid = %sid, user_id = record.user_id, room = %room, "left room");
        Ok(Some(LeaveOutcome {
            room,
            user_id: record.user_id,
        }))
    }

    /// Leave any room and delete the connection record.
    #[instrument(skip(self))]
    pub async fn unregister_connection(&self, sid: &str) -> AppResult<Option<LeaveOutcome>> {
        let left = self.leave(sid).await?;
        self.store.delete(&[connection_key(sid)]).await?;
        Ok(left)
    }

    /// Snapshot of the room, read fresh on every call.
    pub async fn list_online_members(&self, room: &str) -> AppResult<Vec<OnlineMember>> {
        Ok(self
            .room_records(room)
            .await?
            .into_iter()
            .map(|r| OnlineMember { user_id: r.user_id })
            .collect())
    }

    /// Ids of users with at least one connection in the room.
    pub async fn online_user_ids(&self, room: &str) -> AppResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .room_records(room)
            .await?
            .into_iter()
            .map(|r| r.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// A connection `user_id` holds in `room`, if any. With several, the last one scanned wins.
    pub async fn find_connection_in_room(&self, user_id: i64, room: &str) -> AppResult<Option<String>> {
        let pattern = format!("*\"user_id\":{}}}", user_id);
        let sid = self
            .store
            .set_scan(room, &pattern)
            .await?
            .iter()
            .filter_map(|raw| ConnectionRecord::decode(raw).ok())
            .filter(|r| r.user_id == user_id)
            .filter_map(|r| r.sid)
            .last();
        Ok(sid)
    }

    /// Delete every presence key left over from a previous run. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> AppResult<u64> {
        let mut removed = 0;
        for pattern in PRESENCE_KEY_PATTERNS {
            let keys = self.store.keys(pattern).await?;
            if !keys.is_empty() {
                removed += self.store.delete(&keys).await?;
            }
        }
        info!(removed, "presence store reset");
        Ok(removed)
    }

    async fn room_records(&self, room: &str) -> AppResult<Vec<ConnectionRecord>> {
        let raw = self.store.set_members(room).await?;
        let mut records = Vec::with_capacity(raw.len());
        for data in raw {
            match ConnectionRecord::decode(&data) {
                Ok(r) => records.push(r),
                Err(e) => warn!(room = %room, error = %e, "skipping malformed room member"),
            }
        }
        Ok(records)
    }
}
