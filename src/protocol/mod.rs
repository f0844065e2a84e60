//! Wire protocol and data model types for the watch-party sync server.
//!
//! - [`types`]: `RoomId`, `UserId`, `RoomState`, `Participant`
//! - [`messages`]: `ClientMessage` (manual `Deserialize`), `ServerMessage`, `SyncMessage`
//! - [`error_codes`]: `ErrorCode` and WebSocket close-code mapping
//! - [`validation`]: wire-level validation (chat length, etc.)

pub mod error_codes;
pub mod messages;
pub mod types;
pub mod validation;

pub use error_codes::{close_codes, ErrorCode};
pub use messages::{
    ActionData, ClientMessage, ErrorPayload, HeartbeatPayload, ServerMessage, SyncAction,
    SyncMessage,
};
pub use types::{derive_guest_id, system_actor, Participant, RoomId, RoomState, UserId};
pub use validation::{validate_chat_message, ValidationError, MAX_CHAT_LENGTH};
