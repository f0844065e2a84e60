//! Sync Controller — enforces the protocol rules for state transitions and
//! drives conflict resolution (§4.4). Invoked by the Room Hub on every
//! state-changing event; has no transport or session knowledge of its own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{system_actor, ActionData, Participant, RoomId, RoomState, SyncAction, SyncMessage, UserId};
use crate::store::{CoordinationStore, StoreError};

/// How long a participant may report `is_buffering` while the room is
/// playing before the optional synthetic pause kicks in (§4.4).
const BUFFERING_GRACE: Duration = Duration::from_secs(2);

/// The tie-break window: an incoming action only overrides the current
/// state, once the lock is contended, if its timestamp clears
/// `last_updated + LOCK_TIEBREAK_MARGIN` (§4.4).
const LOCK_TIEBREAK_MARGIN: Duration = Duration::from_millis(200);

/// Behavior knobs the Hub passes down on every submission (§4.1/§9 Open
/// Question — synthetic pause is opt-in, lock TTL is fixed at 5s).
#[derive(Debug, Clone, Copy)]
pub struct SyncControllerConfig {
    pub room_lock_ttl: Duration,
    pub synthetic_pause_on_buffering: bool,
}

/// Outcome of submitting an action (§4.3 `Submit`).
#[derive(Debug)]
pub enum SyncOutcome {
    /// The action mutated room state; broadcast `message` and the new
    /// `state` to the room. `synthetic_followup` is an additional message
    /// to broadcast (a system-attributed synthetic pause).
    Applied {
        state: RoomState,
        message: SyncMessage,
        synthetic_followup: Option<(RoomState, SyncMessage)>,
    },
    /// The action was accepted but mutates no room state (chat, ready,
    /// join/leave bookkeeping already handled by the caller).
    FannedOut { message: SyncMessage },
    /// The action lost the conflict-resolution race and is dropped
    /// silently per §4.4 — no error, no broadcast.
    Dropped,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("room has no state to mutate")]
    NoRoomState,
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

/// Submit a single action for processing. `is_host` and `host_connected`
/// describe the submitter and room at call time; `now` is the action's
/// client-observed timestamp (defaults to server time if absent).
#[allow(clippy::too_many_arguments)]
pub async fn submit(
    store: &dyn CoordinationStore,
    config: &SyncControllerConfig,
    room_id: RoomId,
    user_id: UserId,
    username: &str,
    is_host: bool,
    host_connected: bool,
    action: SyncAction,
    data: ActionData,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    match action {
        SyncAction::Join | SyncAction::Leave => {
            Ok(SyncOutcome::FannedOut {
                message: envelope(room_id, user_id, username, action, data),
            })
        }
        SyncAction::Chat => Ok(SyncOutcome::FannedOut {
            message: envelope(room_id, user_id, username, action, data),
        }),
        SyncAction::Buffering | SyncAction::Ready => {
            handle_presence_only(store, config, room_id, user_id, username, action, data, cancel).await
        }
        SyncAction::Play | SyncAction::Pause | SyncAction::Seek => {
            handle_playback(
                store,
                config,
                room_id,
                user_id,
                username,
                is_host,
                host_connected,
                action,
                data,
                cancel,
            )
            .await
        }
    }
}

async fn handle_presence_only(
    store: &dyn CoordinationStore,
    config: &SyncControllerConfig,
    room_id: RoomId,
    user_id: UserId,
    username: &str,
    action: SyncAction,
    data: ActionData,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    let is_buffering = matches!(action, SyncAction::Buffering) && data.is_buffering.unwrap_or(true);
    if let Some(mut participant) = store.get_participants(room_id, cancel).await?.into_iter().find(|p| p.user_id == user_id) {
        participant.is_buffering = is_buffering;
        store.add_participant(room_id, &participant, cancel).await?;
    }

    let message = envelope(room_id, user_id, username, action, data);

    if !config.synthetic_pause_on_buffering || !is_buffering {
        return Ok(SyncOutcome::FannedOut { message });
    }

    let Some(state) = store.get_state(room_id, cancel).await? else {
        return Ok(SyncOutcome::FannedOut { message });
    };
    if !state.is_playing || Utc::now() - state.last_updated < chrono::Duration::from_std(BUFFERING_GRACE).unwrap() {
        return Ok(SyncOutcome::FannedOut { message });
    }

    let mut paused = state.clone();
    paused.is_playing = false;
    paused.current_time = state.live_current_time(Utc::now());
    paused.last_updated = Utc::now();
    paused.updated_by = system_actor();
    store.set_state(&paused, cancel).await?;

    let synthetic = SyncMessage {
        id: Uuid::new_v4(),
        room_id,
        user_id: system_actor(),
        username: "system".to_string(),
        action: SyncAction::Pause,
        timestamp: paused.last_updated,
        data: ActionData {
            current_time: Some(paused.current_time),
            ..Default::default()
        },
    };

    Ok(SyncOutcome::Applied {
        state: paused.clone(),
        message,
        synthetic_followup: Some((paused, synthetic)),
    })
}

#[allow(clippy::too_many_arguments)]
async fn handle_playback(
    store: &dyn CoordinationStore,
    config: &SyncControllerConfig,
    room_id: RoomId,
    user_id: UserId,
    username: &str,
    is_host: bool,
    host_connected: bool,
    action: SyncAction,
    data: ActionData,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, SyncError> {
    let current = store.get_state(room_id, cancel).await?.ok_or(SyncError::NoRoomState)?;

    if !authorized(action, is_host, host_connected, current.is_playing) {
        return Ok(SyncOutcome::Dropped);
    }

    let holder = user_id.to_string();
    let lock = store.acquire_lock(room_id, &holder, config.room_lock_ttl, cancel).await;

    let lock_token = match lock {
        Ok(token) => Some(token),
        Err(StoreError::Conflict) => {
            let incoming_timestamp = Utc::now();
            let margin = chrono::Duration::from_std(LOCK_TIEBREAK_MARGIN).unwrap();
            if incoming_timestamp <= current.last_updated + margin {
                return Ok(SyncOutcome::Dropped);
            }
            None
        }
        Err(err) => return Err(err.into()),
    };

    let new_state = apply_action(&current, action, &data, user_id);
    store.set_state(&new_state, cancel).await?;

    if let Some(token) = lock_token {
        store.release_lock(room_id, &token, cancel).await?;
    }

    let message = envelope(room_id, user_id, username, action, data);
    Ok(SyncOutcome::Applied {
        state: new_state,
        message,
        synthetic_followup: None,
    })
}

fn authorized(action: SyncAction, is_host: bool, host_connected: bool, is_playing: bool) -> bool {
    match action {
        SyncAction::Play | SyncAction::Pause => is_host || !host_connected,
        SyncAction::Seek => is_host || !is_playing,
        _ => true,
    }
}

fn apply_action(current: &RoomState, action: SyncAction, data: &ActionData, user_id: UserId) -> RoomState {
    let mut next = current.clone();
    next.last_updated = Utc::now();
    next.updated_by = user_id;

    match action {
        SyncAction::Play => {
            next.is_playing = true;
            next.current_time = data.current_time.unwrap_or_else(|| current.live_current_time(next.last_updated));
            next.playback_rate = data.playback_rate.unwrap_or(current.playback_rate);
        }
        SyncAction::Pause => {
            next.is_playing = false;
            next.current_time = data.current_time.unwrap_or_else(|| current.live_current_time(next.last_updated));
        }
        SyncAction::Seek => {
            let candidate = data.current_time.unwrap_or(current.current_time);
            next.current_time = current.clamp_time(candidate);
        }
        _ => {}
    }

    next
}

fn envelope(room_id: RoomId, user_id: UserId, username: &str, action: SyncAction, data: ActionData) -> SyncMessage {
    SyncMessage {
        id: Uuid::new_v4(),
        room_id,
        user_id,
        username: username.to_string(),
        action,
        timestamp: Utc::now(),
        data,
    }
}

/// Build the initial `Participant` record for a joining user (§4.3 `Attach`).
#[must_use]
pub fn new_participant(user_id: UserId, username: &str, is_host: bool) -> Participant {
    Participant::new(user_id, username.to_string(), is_host)
}

#[must_use]
pub fn room_is_stale(last_updated: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    now - last_updated > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn config() -> SyncControllerConfig {
        SyncControllerConfig {
            room_lock_ttl: Duration::from_secs(5),
            synthetic_pause_on_buffering: false,
        }
    }

    async fn seed_room(store: &InMemoryStore, room_id: RoomId, duration: f64) {
        let cancel = CancellationToken::new();
        store.set_state(&RoomState::new(room_id, duration), &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn host_play_is_accepted_and_updates_state() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let room_id = Uuid::new_v4();
        let host = Uuid::new_v4();
        seed_room(&store, room_id, 120.0).await;

        let outcome = submit(
            &store,
            &config(),
            room_id,
            host,
            "alice",
            true,
            true,
            SyncAction::Play,
            ActionData {
                current_time: Some(5.0),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

        match outcome {
            SyncOutcome::Applied { state, .. } => {
                assert!(state.is_playing);
                assert_eq!(state.current_time, 5.0);
                assert_eq!(state.updated_by, host);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_host_play_is_dropped_while_host_connected() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let room_id = Uuid::new_v4();
        seed_room(&store, room_id, 120.0).await;

        let outcome = submit(
            &store,
            &config(),
            room_id,
            Uuid::new_v4(),
            "bob",
            false,
            true,
            SyncAction::Play,
            ActionData::default(),
            &cancel,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, SyncOutcome::Dropped));
    }

    #[tokio::test]
    async fn non_host_seek_allowed_only_when_paused() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let room_id = Uuid::new_v4();
        seed_room(&store, room_id, 120.0).await;

        let outcome = submit(
            &store,
            &config(),
            room_id,
            Uuid::new_v4(),
            "bob",
            false,
            true,
            SyncAction::Seek,
            ActionData {
                current_time: Some(42.0),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, SyncOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn seek_clamps_to_duration() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let room_id = Uuid::new_v4();
        let host = Uuid::new_v4();
        seed_room(&store, room_id, 120.0).await;

        let outcome = submit(
            &store,
            &config(),
            room_id,
            host,
            "alice",
            true,
            true,
            SyncAction::Seek,
            ActionData {
                current_time: Some(999.0),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

        match outcome {
            SyncOutcome::Applied { state, .. } => assert_eq!(state.current_time, 120.0),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_is_always_fanned_out_without_state_change() {
        let store = InMemoryStore::new();
        let cancel = CancellationToken::new();
        let room_id = Uuid::new_v4();

        let outcome = submit(
            &store,
            &config(),
            room_id,
            Uuid::new_v4(),
            "bob",
            false,
            true,
            SyncAction::Chat,
            ActionData {
                chat_message: Some("hi".into()),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, SyncOutcome::FannedOut { .. }));
    }
}
