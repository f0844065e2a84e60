use serde::{Deserialize, Serialize};
use std::fmt;

/// WebSocket close codes used by the Gateway and Session (§7, §6).
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_VIOLATION: u16 = 1003;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Structured error codes sent to clients in `error` frames (§6, §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication / authorization (closes with 1008)
    Unauthorized,
    InvalidToken,
    AuthenticationTimeout,
    RoomAccessDenied,

    // Protocol violations (closes with 1003)
    InvalidInput,
    MalformedMessage,
    MessageTooLarge,
    UnknownActionType,

    // Room errors
    RoomNotFound,
    InvalidSeekTarget,

    // Coordination store
    StoreUnavailable,

    // Internal
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Access denied. Authentication credentials are missing or invalid.",
            Self::InvalidToken => "The authentication token is invalid, malformed, or has expired.",
            Self::AuthenticationTimeout => "Authentication took too long to complete.",
            Self::RoomAccessDenied => "You are not a member of this room.",
            Self::InvalidInput => "The provided input is invalid or malformed.",
            Self::MalformedMessage => "The message envelope could not be parsed.",
            Self::MessageTooLarge => "The message exceeds the maximum allowed size.",
            Self::UnknownActionType => "The action type is not recognized.",
            Self::RoomNotFound => "The requested room could not be found.",
            Self::InvalidSeekTarget => "The requested seek position is outside the movie's duration.",
            Self::StoreUnavailable => "The coordination store is temporarily unavailable.",
            Self::InternalError => "An internal server error occurred.",
        }
    }

    /// The WebSocket close code this error implies, if the connection should
    /// be closed as a result (§7).
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized | Self::InvalidToken | Self::AuthenticationTimeout | Self::RoomAccessDenied => {
                Some(close_codes::POLICY_VIOLATION)
            }
            Self::InvalidInput | Self::MalformedMessage | Self::MessageTooLarge | Self::UnknownActionType => {
                Some(close_codes::PROTOCOL_VIOLATION)
            }
            Self::RoomNotFound | Self::InvalidSeekTarget | Self::StoreUnavailable | Self::InternalError => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
