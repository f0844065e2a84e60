use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a room. Supplied by the external collaborator that owns
/// room lifecycle; the core only ever receives and echoes it back.
pub type RoomId = Uuid;

/// Identifier for a participant. Stable for the lifetime of a session;
/// a reconnecting guest under the same display name is assigned the same
/// `UserId` (§3 — derived deterministically from `room_id + name`).
pub type UserId = Uuid;

/// Namespace used to derive deterministic guest ids, so that the same
/// `(room_id, name)` pair always yields the same `UserId` across replicas.
const GUEST_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x61, 0x74, 0x63, 0x68, 0x2d, 0x67, 0x75, 0x65, 0x73, 0x74, 0x2d, 0x6e, 0x73, 0x00, 0x00,
]);

/// Derive a stable guest `UserId` from a room id and display name.
#[must_use]
pub fn derive_guest_id(room_id: RoomId, name: &str) -> UserId {
    let mut seed = room_id.as_bytes().to_vec();
    seed.extend_from_slice(name.as_bytes());
    Uuid::new_v5(&GUEST_ID_NAMESPACE, &seed)
}

/// A zero user id attributed to system-originated mutations (§4.4 — the
/// optional synthetic pause on buffering is attributed to `updated_by = 0`).
#[must_use]
pub fn system_actor() -> UserId {
    Uuid::nil()
}

/// Authoritative playback state for a room (§3 — `RoomState`).
///
/// Invariant: `current_time` is always within `[0, duration]` when
/// `duration > 0`. Invariant: `last_updated` only ever moves forward
/// (monotonic) for a fixed `room_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub last_updated: DateTime<Utc>,
    pub updated_by: UserId,
}

impl RoomState {
    /// A fresh room state, created on first participant join (§3).
    #[must_use]
    pub fn new(room_id: RoomId, duration: f64) -> Self {
        Self {
            room_id,
            is_playing: false,
            current_time: 0.0,
            duration,
            playback_rate: 1.0,
            last_updated: Utc::now(),
            updated_by: system_actor(),
        }
    }

    /// Clamp a candidate `current_time` into `[0, duration]` (§3/§8 — when
    /// `duration` is unknown (0), only the lower bound is enforced).
    #[must_use]
    pub fn clamp_time(&self, candidate: f64) -> f64 {
        if self.duration > 0.0 {
            candidate.clamp(0.0, self.duration)
        } else {
            candidate.max(0.0)
        }
    }

    /// `current_time` derived forward from `last_updated` if the room is
    /// playing (§3 — "derived forward on read").
    #[must_use]
    pub fn live_current_time(&self, now: DateTime<Utc>) -> f64 {
        if !self.is_playing {
            return self.current_time;
        }
        let elapsed = (now - self.last_updated).num_milliseconds() as f64 / 1000.0;
        let projected = self.current_time + elapsed.max(0.0) * self.playback_rate;
        self.clamp_time(projected)
    }
}

/// A participant attached to a room (§3 — `Participant`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_buffering: bool,
}

impl Participant {
    #[must_use]
    pub fn new(user_id: UserId, username: String, is_host: bool) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            username,
            is_host,
            joined_at: now,
            last_seen: now,
            is_buffering: false,
        }
    }
}
