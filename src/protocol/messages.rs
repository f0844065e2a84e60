use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_codes::ErrorCode;
use super::types::{Participant, RoomState, UserId};

/// An inbound envelope as parsed off the wire, before it has been resolved
/// to a concrete room/session. §4.1/§9 — two structurally different shapes
/// share the same wire, so this type is given a manual `Deserialize` rather
/// than a single `#[serde(tag = ...)]` enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `{action: "<action>", data: {...}}` — a video sync action.
    Action { action: SyncAction, data: ActionData },
    /// `{type: "chat", message: "..."}`
    Chat { message: String },
    /// `{type: "heartbeat", ...}`
    Heartbeat,
}

/// The set of sync actions carried by the canonical internal [`SyncMessage`]
/// (§3). `Chat` only ever arises from a [`ClientMessage::Chat`] frame on the
/// way in; it carries no state mutation and is fanned out as-is (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Play,
    Pause,
    Seek,
    Join,
    Leave,
    Buffering,
    Ready,
    Chat,
}

/// The payload accompanying a [`SyncAction`] (§3 — `Sync Message.data`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_buffering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| serde::de::Error::custom("client message must be a JSON object"))?;

        if let Some(action_value) = obj.get("action") {
            let action: SyncAction = serde_json::from_value(action_value.clone())
                .map_err(|e| serde::de::Error::custom(format!("invalid action: {e}")))?;
            let data = match obj.get("data") {
                Some(data_value) => serde_json::from_value(data_value.clone())
                    .map_err(|e| serde::de::Error::custom(format!("invalid action data: {e}")))?,
                None => ActionData::default(),
            };
            return Ok(Self::Action { action, data });
        }

        let frame_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| serde::de::Error::custom("message has neither 'action' nor 'type'"))?;

        match frame_type {
            "chat" => {
                let message = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| serde::de::Error::custom("chat frame missing 'message'"))?
                    .to_string();
                Ok(Self::Chat { message })
            }
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(serde::de::Error::custom(format!(
                "unknown client frame type '{other}'"
            ))),
        }
    }
}

/// A fully-resolved sync event, the canonical internal representation that
/// everything downstream of the parser boundary speaks (§9). Also the shape
/// broadcast over pub/sub and to clients as a `sync` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncMessage {
    pub id: uuid::Uuid,
    pub room_id: uuid::Uuid,
    pub user_id: UserId,
    pub username: String,
    pub action: SyncAction,
    pub timestamp: DateTime<Utc>,
    pub data: ActionData,
}

/// Outbound frames sent to clients (§6).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State { payload: RoomState },
    Participants { payload: Vec<Participant> },
    Sync { payload: SyncMessage },
    Error { payload: ErrorPayload },
    Heartbeat { payload: HeartbeatPayload },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HeartbeatPayload {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
}
