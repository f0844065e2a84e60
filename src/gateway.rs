//! Connection Gateway — the single upgrade entry point (§4.1). Authenticates
//! either a bearer JWT or a room-scoped guest token, checks room membership,
//! and hands off to a [`crate::session::Session`] registered with the room's
//! [`HubHandle`]. Router construction and per-connection handling are kept
//! in separate functions below so each half stays independently testable.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::auth::{AuthedClaims, GuestTokenIssuer, Identity, JwtValidator, RoomMembership};
use crate::config::Config;
use crate::hub::HubRegistry;
use crate::protocol::{close_codes, derive_guest_id, ClientMessage, RoomId};
use crate::session::{HeartbeatMonitor, Session};
use crate::store::CoordinationStore;

/// Shared application state threaded through every route (§9 — "global
/// mutable process state... constructed at startup, injected into each
/// task, torn down on shutdown").
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CoordinationStore>,
    pub hubs: Arc<HubRegistry>,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtValidator>,
    pub guest_tokens: Arc<GuestTokenIssuer>,
    pub membership: Arc<dyn RoomMembership>,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    let cors = if state.config.cors_allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = state
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/ws/room/{room_id}", get(upgrade))
        .route("/rooms/{room_id}/state", get(get_state))
        .route("/rooms/{room_id}/participants", get(get_participants))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_state(State(state): State<AppState>, Path(room_id): Path<RoomId>) -> Response {
    let cancel = CancellationToken::new();
    match state.store.get_state(room_id, &cancel).await {
        Ok(Some(room_state)) => Json(room_state).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(%room_id, error = %err, "failed to read room state");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn get_participants(State(state): State<AppState>, Path(room_id): Path<RoomId>) -> Response {
    let cancel = CancellationToken::new();
    match state.store.get_participants(room_id, &cancel).await {
        Ok(participants) => Json(participants).into_response(),
        Err(err) => {
            warn!(%room_id, error = %err, "failed to read room participants");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpgradeQuery {
    #[serde(rename = "guestToken")]
    guest_token: Option<String>,
}

/// `GET /ws/room/{roomID}` (§6). Validates credentials within the 5s
/// upgrade+auth budget (§5) before the socket is handed off to a Session.
async fn upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match tokio::time::timeout(Duration::from_secs(5), authenticate(&state, room_id, &headers, query.guest_token)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(close_code)) => return reject(close_code),
        Err(_) => return reject(close_codes::POLICY_VIOLATION),
    };

    if !state.membership.is_member(room_id, identity.user_id).await {
        return reject(close_codes::POLICY_VIOLATION);
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state, room_id, identity))
}

fn reject(close_code: u16) -> Response {
    (
        if close_code == close_codes::POLICY_VIOLATION {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::BAD_REQUEST
        },
        "upgrade rejected",
    )
        .into_response()
}

async fn authenticate(
    state: &AppState,
    room_id: RoomId,
    headers: &HeaderMap,
    guest_token: Option<String>,
) -> Result<Identity, u16> {
    if let Some(token) = bearer_token(headers) {
        let claims: AuthedClaims = state.jwt.validate(&token).map_err(|_| close_codes::POLICY_VIOLATION)?;
        return Ok(Identity { user_id: claims.sub, display_name: claims.name, is_guest: false });
    }

    if let Some(token) = guest_token {
        let (user_id, name) = state.guest_tokens.verify(room_id, &token).map_err(|_| close_codes::POLICY_VIOLATION)?;
        debug_assert_eq!(user_id, derive_guest_id(room_id, &name));
        return Ok(Identity { user_id, display_name: name, is_guest: true });
    }

    Err(close_codes::POLICY_VIOLATION)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

async fn handle_connection(socket: WebSocket, state: AppState, room_id: RoomId, identity: Identity) {
    let hub = state.hubs.get_or_create(room_id).await;
    let (session, handle) = Session::new(identity.user_id, state.config.outbound_queue_depth);
    let is_host = !identity.is_guest;

    hub.attach(identity.user_id, identity.display_name.clone(), is_host, handle).await;

    let (mut sink, mut stream) = socket.split();
    let cancel = state.shutdown.child_token();
    let heartbeat = Arc::new(HeartbeatMonitor::new(state.config.heartbeat_interval, state.config.heartbeat_timeout));
    let session = session;

    let writer = {
        let cancel = cancel.clone();
        let heartbeat = heartbeat.clone();
        async move {
            let mut ticker = tokio::time::interval(heartbeat.interval());
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    code = session.wait_close_requested() => {
                        warn!(%room_id, user_id = %identity.user_id, code, "session closed by request");
                        let frame = axum::extract::ws::CloseFrame {
                            code,
                            reason: "session closed".into(),
                        };
                        let _ = sink.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                    outgoing = session.recv() => {
                        let Some(message) = outgoing else { break };
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if sink.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if heartbeat.is_expired() {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                        let frame = crate::protocol::ServerMessage::Heartbeat {
                            payload: crate::protocol::HeartbeatPayload {
                                timestamp: chrono::Utc::now(),
                                user_id: identity.user_id,
                            },
                        };
                        if let Ok(text) = serde_json::to_string(&frame) {
                            let _ = sink.send(WsMessage::Text(text.into())).await;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        }
    };

    let reader = {
        let hub = hub.clone();
        let username = identity.display_name.clone();
        let user_id = identity.user_id;
        let cancel = cancel.clone();
        let heartbeat = heartbeat.clone();
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = stream.next() => {
                        let Some(frame) = frame else { break };
                        match frame {
                            Ok(WsMessage::Text(text)) => {
                                // Any client frame counts toward the heartbeat
                                // contract, not just a reciprocal heartbeat (§4.2).
                                heartbeat.record_activity();
                                match serde_json::from_str::<ClientMessage>(&text) {
                                    Ok(message) => hub.submit(user_id, username.clone(), message).await,
                                    Err(err) => {
                                        warn!(%room_id, %user_id, error = %err, "discarding malformed client frame");
                                    }
                                }
                            }
                            Ok(WsMessage::Close(_)) => break,
                            Ok(_) => heartbeat.record_activity(),
                            Err(err) => {
                                warn!(%room_id, %user_id, error = %err, "websocket read error");
                                break;
                            }
                        }
                    }
                }
            }
        }
    };

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    cancel.cancel();
    hub.detach(identity.user_id).await;
    info!(%room_id, user_id = %identity.user_id, "session closed");
}
