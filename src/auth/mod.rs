//! Authentication for the Connection Gateway (§4.1).
//!
//! Authed users present `Authorization: Bearer <token>`, a JWT validated
//! with `jsonwebtoken` against the shared `JWT_SECRET`. Guests present a
//! `guestToken` query parameter, an HMAC-SHA256 token over `room_id + name`
//! that this module both mints (for local testing) and verifies.

pub mod error;
pub mod guest;
pub mod jwt;

pub use error::AuthError;
pub use guest::GuestTokenIssuer;
pub use jwt::{AuthedClaims, JwtValidator};

use crate::protocol::{RoomId, UserId};

/// The identity resolved from a successfully authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub is_guest: bool,
}

/// External collaborator the Gateway consults to confirm a user is allowed
/// into a room (§4.1 — "room-membership lookup", explicitly out of scope
/// for this core, modeled as an injectable trait so the Gateway's logic is
/// independently testable).
#[async_trait::async_trait]
pub trait RoomMembership: Send + Sync {
    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> bool;
}

/// A permissive membership check used when no external directory is wired
/// up (e.g. guest-only deployments, or tests).
pub struct AllowAll;

#[async_trait::async_trait]
impl RoomMembership for AllowAll {
    async fn is_member(&self, _room_id: RoomId, _user_id: UserId) -> bool {
        true
    }
}
