//! Janitor — the periodic sweep that reclaims abandoned rooms and stale
//! participants (§4.6): a single background task on a fixed interval,
//! logging and continuing past individual failures rather than letting
//! one bad room stop the sweep.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::store::CoordinationStore;
use crate::sync_controller::room_is_stale;

/// Runs until `cancel` fires, sweeping on `config.janitor_interval`.
pub async fn run(store: Arc<dyn CoordinationStore>, config: Arc<Config>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(config.janitor_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("janitor shutting down");
                break;
            }
            _ = ticker.tick() => {
                sweep(&store, &config, &cancel).await;
            }
        }
    }
}

async fn sweep(store: &Arc<dyn CoordinationStore>, config: &Config, cancel: &CancellationToken) {
    let now = Utc::now();
    let stale_cutoff = now - chrono::Duration::from_std(config.room_inactive_timeout).unwrap_or_else(|_| chrono::Duration::hours(2));

    let stale_rooms = match store.list_stale_rooms(stale_cutoff, cancel).await {
        Ok(rooms) => rooms,
        Err(err) => {
            error!(error = %err, "janitor failed to list stale rooms; skipping this sweep");
            return;
        }
    };

    for room_id in stale_rooms {
        // A room with any still-connected participant is not actually idle;
        // its last_updated timestamp may simply predate a long pause. Leave
        // it for the participant sweep below instead of tearing it down.
        match store.get_participants(room_id, cancel).await {
            Ok(participants) if participants.is_empty() => {
                // Double-check the room's own `last_updated` before deleting:
                // the active-index score can lag a fresh state write by one
                // sweep interval.
                let still_stale = match store.get_state(room_id, cancel).await {
                    Ok(Some(state)) => room_is_stale(state.last_updated, now, config.room_inactive_timeout),
                    Ok(None) => true,
                    Err(_) => true,
                };
                if !still_stale {
                    continue;
                }
                if let Err(err) = store.remove_room(room_id, cancel).await {
                    warn!(%room_id, error = %err, "failed to remove stale room");
                } else {
                    info!(%room_id, "removed stale room with no participants");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%room_id, error = %err, "failed to read participants during room sweep"),
        }
    }

    // Stale-participant removal is left to each Room Hub: the Janitor only
    // owns room-lifetime sweeps against the store, since per-participant
    // `last_seen` comparisons need the in-process session map to know which
    // departures are genuinely silent versus already detached. Hubs consult
    // `participant_stale_timeout` independently when processing their own
    // command loop. Locks with an expired TTL are never explicitly deleted
    // here; they expire naturally in the store (§4.6).
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomState;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn sweep_removes_stale_empty_rooms() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let cancel = CancellationToken::new();
        let room_id = uuid::Uuid::new_v4();

        store.set_state(&RoomState::new(room_id, 120.0), &cancel).await.unwrap();
        store.mark_active(room_id, Utc::now() - chrono::Duration::hours(3), &cancel).await.unwrap();

        let config = Config::default();
        sweep(&store, &config, &cancel).await;

        assert!(store.get_state(room_id, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_leaves_rooms_with_participants() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let cancel = CancellationToken::new();
        let room_id = uuid::Uuid::new_v4();

        store.set_state(&RoomState::new(room_id, 120.0), &cancel).await.unwrap();
        store.mark_active(room_id, Utc::now() - chrono::Duration::hours(3), &cancel).await.unwrap();
        let participant = crate::sync_controller::new_participant(uuid::Uuid::new_v4(), "alice", true);
        store.add_participant(room_id, &participant, &cancel).await.unwrap();

        let config = Config::default();
        sweep(&store, &config, &cancel).await;

        assert!(store.get_state(room_id, &cancel).await.unwrap().is_some());
    }
}
