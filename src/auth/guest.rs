use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::AuthError;
use crate::protocol::{derive_guest_id, RoomId, UserId};

type HmacSha256 = Hmac<Sha256>;

/// Mints and verifies guest tokens, an HMAC-SHA256 signature over
/// `room_id + name` keyed with the shared `JWT_SECRET` (§4.1 — "guestToken").
/// The resulting `UserId` is always [`derive_guest_id`]'s deterministic
/// value, so the same display name reconnecting to the same room resumes
/// the same participant slot.
pub struct GuestTokenIssuer {
    secret: String,
}

impl GuestTokenIssuer {
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Mint a token of the form `{name}.{signature}`.
    #[must_use]
    pub fn mint(&self, room_id: RoomId, name: &str) -> String {
        let signature = self.sign(room_id, name);
        format!("{name}.{signature}")
    }

    /// Verify a token, returning the resolved guest identity.
    pub fn verify(&self, room_id: RoomId, token: &str) -> Result<(UserId, String), AuthError> {
        let (name, signature) = token
            .rsplit_once('.')
            .ok_or(AuthError::InvalidToken)?;

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::InvalidToken)?;

        self.mac_for(room_id, name)
            .verify_slice(&provided)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok((derive_guest_id(room_id, name), name.to_string()))
    }

    fn sign(&self, room_id: RoomId, name: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac_for(room_id, name).finalize().into_bytes())
    }

    fn mac_for(&self, room_id: RoomId, name: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(room_id.as_bytes());
        mac.update(name.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_verify_round_trips() {
        let issuer = GuestTokenIssuer::new("shared-secret".into());
        let room_id = uuid::Uuid::new_v4();
        let token = issuer.mint(room_id, "alice");

        let (user_id, name) = issuer.verify(room_id, &token).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(user_id, derive_guest_id(room_id, "alice"));
    }

    #[test]
    fn rejects_token_for_a_different_room() {
        let issuer = GuestTokenIssuer::new("shared-secret".into());
        let room_a = uuid::Uuid::new_v4();
        let room_b = uuid::Uuid::new_v4();
        let token = issuer.mint(room_a, "alice");

        assert!(issuer.verify(room_b, &token).is_err());
    }

    #[test]
    fn rejects_tampered_signature() {
        let issuer = GuestTokenIssuer::new("shared-secret".into());
        let room_id = uuid::Uuid::new_v4();
        let token = issuer.mint(room_id, "alice");
        let tampered = format!("{token}x");

        assert!(issuer.verify(room_id, &tampered).is_err());
    }
}
