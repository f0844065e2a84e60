//! Coordination Store Adapter (§4.5) — the trait-based storage boundary
//! between the core and the external coordination store: one trait, one
//! production backend, one in-memory test double.
//!
//! Key layout (§6):
//! - `room:sync:{roomID}` — hash holding the room's [`RoomState`]
//! - `room:participants:{roomID}` — hash of participant id → [`Participant`]
//! - `room:{roomID}:events` — pub/sub topic carrying [`SyncMessage`]s
//! - `room:lock:{roomID}` — string used for set-if-absent locking
//! - `rooms:active` — sorted set of active room ids, scored by last activity

pub mod error;
pub mod memory;
pub mod redis_store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Participant, RoomId, RoomState, SyncMessage, UserId};

pub type StoreResult<T> = Result<T, StoreError>;

/// A held lock token, released by dropping the guard or calling
/// [`CoordinationStore::release_lock`] explicitly (§4.3/§4.4, §8 "lock
/// correctness").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// The Coordination Store Adapter boundary (§4.5). Every operation accepts a
/// [`CancellationToken`] so in-flight calls can be abandoned cleanly during
/// shutdown (§5).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get_state(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<Option<RoomState>>;

    async fn set_state(&self, state: &RoomState, cancel: &CancellationToken) -> StoreResult<()>;

    async fn add_participant(
        &self,
        room_id: RoomId,
        participant: &Participant,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    async fn get_participants(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<Vec<Participant>>;

    async fn touch_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    async fn publish(&self, room_id: RoomId, message: &SyncMessage, cancel: &CancellationToken) -> StoreResult<()>;

    /// Subscribe to a room's events topic. Returns a stream that yields
    /// every published [`SyncMessage`]; a dropped stream unsubscribes.
    async fn subscribe(
        &self,
        room_id: RoomId,
        cancel: &CancellationToken,
    ) -> StoreResult<BoxStream<'static, SyncMessage>>;

    /// Attempt to acquire the per-room lock via set-if-absent with a TTL
    /// (§4.3/§4.4). Returns `Err(StoreError::Conflict)` if already held.
    async fn acquire_lock(
        &self,
        room_id: RoomId,
        holder: &str,
        ttl: std::time::Duration,
        cancel: &CancellationToken,
    ) -> StoreResult<LockToken>;

    /// Release a previously acquired lock. A no-op if the lock has already
    /// expired or was taken over by another holder.
    async fn release_lock(&self, room_id: RoomId, token: &LockToken, cancel: &CancellationToken) -> StoreResult<()>;

    /// Record that a room has seen activity, refreshing its score in
    /// `rooms:active`.
    async fn mark_active(&self, room_id: RoomId, now: DateTime<Utc>, cancel: &CancellationToken) -> StoreResult<()>;

    /// List rooms whose last recorded activity is older than `older_than`,
    /// used by the Janitor (§4.6) to find sweep candidates.
    async fn list_stale_rooms(
        &self,
        older_than: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<RoomId>>;

    /// Remove a room entirely: its state, participant hash, and entry in
    /// `rooms:active`.
    async fn remove_room(&self, room_id: RoomId, cancel: &CancellationToken) -> StoreResult<()>;
}
