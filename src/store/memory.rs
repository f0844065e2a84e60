use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Participant, RoomId, RoomState, SyncMessage, UserId};

use super::{CoordinationStore, LockToken, StoreError, StoreResult};

struct LockEntry {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-process double for [`CoordinationStore`], standing in for Redis in
/// tests (§4.5): `HashMap`s behind locks, plus a `broadcast` channel in
/// place of pub/sub.
pub struct InMemoryStore {
    states: DashMap<RoomId, RoomState>,
    participants: DashMap<RoomId, HashMap<UserId, Participant>>,
    locks: Mutex<HashMap<RoomId, LockEntry>>,
    active: DashMap<RoomId, DateTime<Utc>>,
    topics: DashMap<RoomId, broadcast::Sender<SyncMessage>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
            participants: DashMap::new(),
            locks: Mutex::new(HashMap::new()),
            active: DashMap::new(),
            topics: DashMap::new(),
        }
    }

    fn topic(&self, room_id: RoomId) -> broadcast::Sender<SyncMessage> {
        self.topics
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get_state(&self, room_id: RoomId, _cancel: &CancellationToken) -> StoreResult<Option<RoomState>> {
        Ok(self.states.get(&room_id).map(|entry| entry.clone()))
    }

    async fn set_state(&self, state: &RoomState, _cancel: &CancellationToken) -> StoreResult<()> {
        self.states.insert(state.room_id, state.clone());
        Ok(())
    }

    async fn add_participant(
        &self,
        room_id: RoomId,
        participant: &Participant,
        _cancel: &CancellationToken,
    ) -> StoreResult<()> {
        self.participants
            .entry(room_id)
            .or_default()
            .insert(participant.user_id, participant.clone());
        Ok(())
    }

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        _cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if let Some(mut room) = self.participants.get_mut(&room_id) {
            room.remove(&user_id);
        }
        Ok(())
    }

    async fn get_participants(&self, room_id: RoomId, _cancel: &CancellationToken) -> StoreResult<Vec<Participant>> {
        Ok(self
            .participants
            .get(&room_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn touch_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        now: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if let Some(mut room) = self.participants.get_mut(&room_id) {
            if let Some(participant) = room.get_mut(&user_id) {
                participant.last_seen = now;
            }
        }
        Ok(())
    }

    async fn publish(&self, room_id: RoomId, message: &SyncMessage, _cancel: &CancellationToken) -> StoreResult<()> {
        // A send with no subscribers is not an error: pub/sub is best-effort.
        let _ = self.topic(room_id).send(message.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        room_id: RoomId,
        _cancel: &CancellationToken,
    ) -> StoreResult<BoxStream<'static, SyncMessage>> {
        let receiver = self.topic(room_id).subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }

    async fn acquire_lock(
        &self,
        room_id: RoomId,
        holder: &str,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> StoreResult<LockToken> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Utc::now();

        if let Some(existing) = locks.get(&room_id) {
            if existing.expires_at > now {
                return Err(StoreError::Conflict);
            }
        }

        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(5));
        locks.insert(
            room_id,
            LockEntry {
                holder: holder.to_string(),
                expires_at,
            },
        );
        Ok(LockToken(holder.to_string()))
    }

    async fn release_lock(&self, room_id: RoomId, token: &LockToken, _cancel: &CancellationToken) -> StoreResult<()> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = locks.get(&room_id) {
            if existing.holder == token.0 {
                locks.remove(&room_id);
            }
        }
        Ok(())
    }

    async fn mark_active(&self, room_id: RoomId, now: DateTime<Utc>, _cancel: &CancellationToken) -> StoreResult<()> {
        self.active.insert(room_id, now);
        Ok(())
    }

    async fn list_stale_rooms(
        &self,
        older_than: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> StoreResult<Vec<RoomId>> {
        Ok(self
            .active
            .iter()
            .filter(|entry| *entry.value() < older_than)
            .map(|entry| *entry.key())
            .collect())
    }

    async fn remove_room(&self, room_id: RoomId, _cancel: &CancellationToken) -> StoreResult<()> {
        self.states.remove(&room_id);
        self.participants.remove(&room_id);
        self.active.remove(&room_id);
        self.topics.remove(&room_id);
        Ok(())
    }
}
