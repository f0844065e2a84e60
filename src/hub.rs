//! Room Hub — the per-(room, replica) aggregation point (§4.3). A single
//! processing task per room serializes every mutation; the rest of the
//! service stays multi-threaded. The registry below keeps one handle per
//! room id, spawning a fresh Hub task on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::protocol::{
    validate_chat_message, ActionData, ClientMessage, ErrorCode, ErrorPayload, RoomId, RoomState,
    ServerMessage, SyncAction, SyncMessage, UserId,
};
use crate::session::SessionHandle;
use crate::store::CoordinationStore;
use crate::sync_controller::{self, SyncControllerConfig, SyncOutcome};

/// Extension seam for chat rate limiting (§9 Open Question), grounded on the
/// teacher's pluggable `RoomRateLimiter`/`rate_limit.rs` shape. The core
/// ships only the no-op implementation; a deployment wanting per-user chat
/// throttling supplies its own.
pub trait ChatRateLimiter: Send + Sync {
    /// Returns `true` if `user_id` may send another chat message in
    /// `room_id` right now.
    fn allow(&self, room_id: RoomId, user_id: UserId) -> bool;
}

/// Default limiter: chat is not rate-limited in the core.
pub struct NoopChatRateLimiter;

impl ChatRateLimiter for NoopChatRateLimiter {
    fn allow(&self, _room_id: RoomId, _user_id: UserId) -> bool {
        true
    }
}

/// A command submitted to a Room Hub's single processing task.
enum HubCommand {
    Attach {
        user_id: UserId,
        username: String,
        is_host: bool,
        session: SessionHandle,
    },
    Detach {
        user_id: UserId,
    },
    Inbound {
        user_id: UserId,
        username: String,
        message: ClientMessage,
    },
}

/// A cheaply cloneable reference to a running Hub's command channel.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn attach(&self, user_id: UserId, username: String, is_host: bool, session: SessionHandle) {
        let _ = self
            .tx
            .send(HubCommand::Attach { user_id, username, is_host, session })
            .await;
    }

    pub async fn detach(&self, user_id: UserId) {
        let _ = self.tx.send(HubCommand::Detach { user_id }).await;
    }

    pub async fn submit(&self, user_id: UserId, username: String, message: ClientMessage) {
        let _ = self
            .tx
            .send(HubCommand::Inbound { user_id, username, message })
            .await;
    }
}

/// Process-wide map from room id to its running Hub (§4.3, §5 — "the only
/// shared mutable surface is the Room Hub's registry, protected by a single
/// mutex with short critical sections").
pub struct HubRegistry {
    store: Arc<dyn CoordinationStore>,
    config: Arc<Config>,
    chat_limiter: Arc<dyn ChatRateLimiter>,
    hubs: Mutex<HashMap<RoomId, HubHandle>>,
    shutdown: CancellationToken,
}

impl HubRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, config: Arc<Config>, shutdown: CancellationToken) -> Self {
        Self::with_chat_limiter(store, config, shutdown, Arc::new(NoopChatRateLimiter))
    }

    #[must_use]
    pub fn with_chat_limiter(
        store: Arc<dyn CoordinationStore>,
        config: Arc<Config>,
        shutdown: CancellationToken,
        chat_limiter: Arc<dyn ChatRateLimiter>,
    ) -> Self {
        Self {
            store,
            config,
            chat_limiter,
            hubs: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Return the Hub for `room_id`, spawning one if this is the first local
    /// session for that room.
    pub async fn get_or_create(&self, room_id: RoomId) -> HubHandle {
        let mut hubs = self.hubs.lock().await;
        if let Some(handle) = hubs.get(&room_id) {
            return handle.clone();
        }
        let handle = spawn_hub(
            room_id,
            self.store.clone(),
            self.config.clone(),
            self.chat_limiter.clone(),
            self.shutdown.child_token(),
        );
        hubs.insert(room_id, handle.clone());
        handle
    }
}

fn spawn_hub(
    room_id: RoomId,
    store: Arc<dyn CoordinationStore>,
    config: Arc<Config>,
    chat_limiter: Arc<dyn ChatRateLimiter>,
    cancel: CancellationToken,
) -> HubHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run_hub(room_id, store, config, chat_limiter, cancel, rx));
    HubHandle { tx }
}

async fn run_hub(
    room_id: RoomId,
    store: Arc<dyn CoordinationStore>,
    config: Arc<Config>,
    chat_limiter: Arc<dyn ChatRateLimiter>,
    cancel: CancellationToken,
    mut cmd_rx: mpsc::Receiver<HubCommand>,
) {
    let mut sessions: HashMap<UserId, SessionHandle> = HashMap::new();
    let mut host_connected = false;
    let mut subscription = match store.subscribe(room_id, &cancel).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(%room_id, error = %err, "failed to subscribe to room events topic; hub exiting");
            return;
        }
    };

    let controller_config = SyncControllerConfig {
        room_lock_ttl: config.room_lock_ttl,
        synthetic_pause_on_buffering: config.synthetic_pause_on_buffering,
    };
    let mut stale_sweep = tokio::time::interval(config.participant_stale_timeout);
    stale_sweep.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(%room_id, "hub shutting down");
                break;
            }
            _ = stale_sweep.tick() => {
                touch_local_participants(&store, room_id, &sessions, &cancel).await;
                sweep_stale_participants(&store, room_id, config.participant_stale_timeout, &sessions, &cancel).await;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    HubCommand::Attach { user_id, username, is_host, session } => {
                        handle_attach(&store, room_id, user_id, &username, is_host, session, &mut sessions, &mut host_connected, &cancel).await;
                    }
                    HubCommand::Detach { user_id } => {
                        handle_detach(&store, room_id, user_id, &mut sessions, &mut host_connected, &cancel).await;
                    }
                    HubCommand::Inbound { user_id, username, message } => {
                        handle_inbound(&store, &controller_config, chat_limiter.as_ref(), room_id, user_id, &username, message, &sessions, host_connected, &cancel).await;
                    }
                }
            }
            incoming = subscription.next() => {
                let Some(message) = incoming else {
                    warn!(%room_id, "event subscription ended; resubscribing");
                    subscription = match resubscribe_with_backoff(store.as_ref(), room_id, &cancel).await {
                        Some(stream) => stream,
                        None => {
                            error!(%room_id, "giving up on resubscribe; hub exiting");
                            break;
                        }
                    };
                    if let Ok(Some(state)) = store.get_state(room_id, &cancel).await {
                        broadcast_state(&sessions, &state);
                    }
                    continue;
                };
                // §8 no-echo concerns the store round-trip (this Hub never
                // re-publishes what it just received), not delivery: the
                // originating client only learns the action was accepted
                // through this same fanned-out sync frame, so it is
                // delivered to every local session including the sender.
                fan_out(&sessions, &message);
            }
        }
    }
    // Idle hubs (no local sessions) are reaped by the Janitor's stale-room
    // sweep rather than torn down eagerly here, so a reconnecting
    // participant within the sweep window finds the same in-process Hub.
}

#[allow(clippy::too_many_arguments)]
async fn handle_attach(
    store: &Arc<dyn CoordinationStore>,
    room_id: RoomId,
    user_id: UserId,
    username: &str,
    is_host: bool,
    session: SessionHandle,
    sessions: &mut HashMap<UserId, SessionHandle>,
    host_connected: &mut bool,
    cancel: &CancellationToken,
) {
    // Attach of an already-attached user replaces the prior session and
    // closes the old connection (§8 round-trip law).
    if let Some(previous) = sessions.insert(user_id, session) {
        previous.request_close(crate::protocol::close_codes::NORMAL);
    }
    if is_host {
        *host_connected = true;
    }

    let state = match store.get_state(room_id, cancel).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            let fresh = RoomState::new(room_id, 0.0);
            if let Err(err) = store.set_state(&fresh, cancel).await {
                error!(%room_id, error = %err, "failed to initialize room state");
            }
            fresh
        }
        Err(err) => {
            error!(%room_id, error = %err, "failed to load room state on attach");
            return;
        }
    };

    let participant = sync_controller::new_participant(user_id, username, is_host);
    if let Err(err) = store.add_participant(room_id, &participant, cancel).await {
        error!(%room_id, %user_id, error = %err, "failed to register participant");
    }
    if let Err(err) = store.mark_active(room_id, Utc::now(), cancel).await {
        warn!(%room_id, error = %err, "failed to mark room active");
    }

    if let Some(handle) = sessions.get(&user_id) {
        handle.enqueue(ServerMessage::State { payload: state.clone() });
    }
    if let Ok(participants) = store.get_participants(room_id, cancel).await {
        if let Some(handle) = sessions.get(&user_id) {
            handle.enqueue(ServerMessage::Participants { payload: participants });
        }
    }

    let join_message = SyncMessage {
        id: uuid::Uuid::new_v4(),
        room_id,
        user_id,
        username: username.to_string(),
        action: SyncAction::Join,
        timestamp: Utc::now(),
        data: ActionData::default(),
    };
    // Delivered to every other local (and remote) session once it round-
    // trips back through the subscription below — publishing here and
    // fanning out directly would double-deliver to this Hub's own sessions.
    if let Err(err) = store.publish(room_id, &join_message, cancel).await {
        warn!(%room_id, error = %err, "failed to publish join event");
    }
}

async fn handle_detach(
    store: &Arc<dyn CoordinationStore>,
    room_id: RoomId,
    user_id: UserId,
    sessions: &mut HashMap<UserId, SessionHandle>,
    host_connected: &mut bool,
    cancel: &CancellationToken,
) {
    // Double-Detach is a no-op after the first (§8).
    if sessions.remove(&user_id).is_none() {
        return;
    }

    if let Err(err) = store.remove_participant(room_id, user_id, cancel).await {
        warn!(%room_id, %user_id, error = %err, "failed to remove participant on detach");
    }

    *host_connected = match store.get_participants(room_id, cancel).await {
        Ok(participants) => participants.iter().any(|p| p.is_host && sessions.contains_key(&p.user_id)),
        Err(_) => *host_connected,
    };

    let leave_message = SyncMessage {
        id: uuid::Uuid::new_v4(),
        room_id,
        user_id,
        username: String::new(),
        action: SyncAction::Leave,
        timestamp: Utc::now(),
        data: ActionData::default(),
    };
    // See the comment in `handle_attach`: fan-out happens once, via the
    // subscription round-trip, not here.
    if let Err(err) = store.publish(room_id, &leave_message, cancel).await {
        warn!(%room_id, error = %err, "failed to publish leave event");
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_inbound(
    store: &Arc<dyn CoordinationStore>,
    controller_config: &SyncControllerConfig,
    chat_limiter: &dyn ChatRateLimiter,
    room_id: RoomId,
    user_id: UserId,
    username: &str,
    message: ClientMessage,
    sessions: &HashMap<UserId, SessionHandle>,
    host_connected: bool,
    cancel: &CancellationToken,
) {
    let (action, data) = match message {
        ClientMessage::Action { action, data } => (action, data),
        ClientMessage::Chat { message } => {
            if !chat_limiter.allow(room_id, user_id) {
                if let Some(handle) = sessions.get(&user_id) {
                    handle.enqueue(ServerMessage::Error {
                        payload: ErrorPayload { code: ErrorCode::InvalidInput, message: "chat rate limit exceeded".into() },
                    });
                }
                return;
            }
            if let Err(err) = validate_chat_message(&message) {
                if let Some(handle) = sessions.get(&user_id) {
                    handle.enqueue(ServerMessage::Error {
                        payload: ErrorPayload { code: ErrorCode::InvalidInput, message: err.to_string() },
                    });
                }
                return;
            }
            (
                SyncAction::Chat,
                ActionData { chat_message: Some(message), ..Default::default() },
            )
        }
        ClientMessage::Heartbeat => return,
    };

    let is_host = store
        .get_participants(room_id, cancel)
        .await
        .map(|participants| participants.iter().any(|p| p.user_id == user_id && p.is_host))
        .unwrap_or(false);

    let outcome = sync_controller::submit(
        store.as_ref(),
        controller_config,
        room_id,
        user_id,
        username,
        is_host,
        host_connected,
        action,
        data,
        cancel,
    )
    .await;

    // Every branch below only publishes; delivery to local sessions happens
    // once, when the publish round-trips back through this Hub's own
    // subscription (see the comment on that arm in `run_hub`).
    match outcome {
        Ok(SyncOutcome::Applied { message, synthetic_followup, .. }) => {
            if let Err(err) = store.publish(room_id, &message, cancel).await {
                warn!(%room_id, error = %err, "failed to publish sync event");
            }

            if let Some((_, synthetic)) = synthetic_followup {
                if let Err(err) = store.publish(room_id, &synthetic, cancel).await {
                    warn!(%room_id, error = %err, "failed to publish synthetic pause");
                }
            }
        }
        Ok(SyncOutcome::FannedOut { message }) => {
            if let Err(err) = store.publish(room_id, &message, cancel).await {
                warn!(%room_id, error = %err, "failed to publish fan-out event");
            }
        }
        Ok(SyncOutcome::Dropped) => {
            // §4.4: lost the conflict-resolution race; dropped silently.
        }
        Err(err) => {
            warn!(%room_id, %user_id, error = %err, "sync submission failed");
            if let Some(handle) = sessions.get(&user_id) {
                handle.enqueue(ServerMessage::Error {
                    payload: ErrorPayload { code: ErrorCode::InternalError, message: err.to_string() },
                });
            }
        }
    }
}

/// Deliver `message` to every local session, including its originator.
fn fan_out(sessions: &HashMap<UserId, SessionHandle>, message: &SyncMessage) {
    for handle in sessions.values() {
        handle.enqueue(ServerMessage::Sync { payload: message.clone() });
    }
}

fn broadcast_state(sessions: &HashMap<UserId, SessionHandle>, state: &RoomState) {
    for handle in sessions.values() {
        handle.enqueue(ServerMessage::State { payload: state.clone() });
    }
}

/// Refresh `last_seen` in the store for every participant this Hub holds a
/// live local session for. A room's participants can be served by Hubs on
/// other replicas, so a locally-connected user still needs its store record
/// touched or a sibling replica's sweep would wrongly call it stale (§4.6).
async fn touch_local_participants(
    store: &Arc<dyn CoordinationStore>,
    room_id: RoomId,
    sessions: &HashMap<UserId, SessionHandle>,
    cancel: &CancellationToken,
) {
    let now = Utc::now();
    for user_id in sessions.keys() {
        if let Err(err) = store.touch_participant(room_id, *user_id, now, cancel).await {
            warn!(%room_id, %user_id, error = %err, "failed to refresh participant last_seen");
        }
    }
}

/// Remove participants who have not been heard from within `stale_after`
/// (§4.6) and publish a synthetic leave for each. A participant with a live
/// local session is never considered stale regardless of its stored
/// `last_seen`, since the Gateway's heartbeat keeps that session alive
/// independently of store round-trips.
async fn sweep_stale_participants(
    store: &Arc<dyn CoordinationStore>,
    room_id: RoomId,
    stale_after: Duration,
    sessions: &HashMap<UserId, SessionHandle>,
    cancel: &CancellationToken,
) {
    let participants = match store.get_participants(room_id, cancel).await {
        Ok(participants) => participants,
        Err(err) => {
            warn!(%room_id, error = %err, "failed to read participants during stale sweep");
            return;
        }
    };

    let now = Utc::now();
    for participant in participants {
        if sessions.contains_key(&participant.user_id) {
            continue;
        }
        let idle = now.signed_duration_since(participant.last_seen);
        if idle > chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::seconds(90)) {
            if let Err(err) = store.remove_participant(room_id, participant.user_id, cancel).await {
                warn!(%room_id, user_id = %participant.user_id, error = %err, "failed to remove stale participant");
                continue;
            }
            let leave_message = SyncMessage {
                id: uuid::Uuid::new_v4(),
                room_id,
                user_id: participant.user_id,
                username: participant.username,
                action: SyncAction::Leave,
                timestamp: now,
                data: ActionData::default(),
            };
            if let Err(err) = store.publish(room_id, &leave_message, cancel).await {
                warn!(%room_id, error = %err, "failed to publish stale-participant leave");
            }
        }
    }
}

/// Resubscribe to a room's events topic, retrying with the same backoff
/// schedule as the store-read retry policy (§7) rather than hot-looping
/// against a persistently unreachable store.
async fn resubscribe_with_backoff(
    store: &dyn CoordinationStore,
    room_id: RoomId,
    cancel: &CancellationToken,
) -> Option<futures_util::stream::BoxStream<'static, SyncMessage>> {
    let retry_config = crate::retry::RetryConfig::store_read();
    let mut delay = retry_config.initial_delay;
    for attempt in 1..=retry_config.max_attempts {
        match store.subscribe(room_id, cancel).await {
            Ok(stream) => return Some(stream),
            Err(err) if attempt < retry_config.max_attempts => {
                warn!(%room_id, attempt, error = %err, "resubscribe failed; backing off");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(
                    Duration::from_millis((delay.as_millis() as f64 * retry_config.backoff_multiplier) as u64),
                    retry_config.max_delay,
                );
            }
            Err(err) => {
                error!(%room_id, attempt, error = %err, "resubscribe exhausted retries");
                return None;
            }
        }
    }
    None
}
