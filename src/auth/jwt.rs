use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::protocol::UserId;

/// Claims expected in a bearer token minted by the external auth
/// collaborator (§1 — token minting is explicitly out of scope for this
/// core; it only validates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthedClaims {
    pub sub: UserId,
    pub name: String,
    pub exp: usize,
}

/// Validates bearer tokens against the shared `JWT_SECRET` (§4.1).
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn validate(&self, token: &str) -> Result<AuthedClaims, AuthError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let data = decode::<AuthedClaims>(token, &key, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn sign(secret: &str, claims: &AuthedClaims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn validates_correctly_signed_token() {
        let secret = "a-shared-secret-for-tests";
        let claims = AuthedClaims {
            sub: uuid::Uuid::new_v4(),
            name: "alice".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = sign(secret, &claims);

        let validator = JwtValidator::new(secret.to_string());
        let decoded = validator.validate(&token).unwrap();
        assert_eq!(decoded.sub, claims.sub);
    }

    #[test]
    fn rejects_token_signed_with_wrong_secret() {
        let claims = AuthedClaims {
            sub: uuid::Uuid::new_v4(),
            name: "alice".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = sign("wrong-secret", &claims);

        let validator = JwtValidator::new("correct-secret".to_string());
        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let secret = "a-shared-secret-for-tests";
        let claims = AuthedClaims {
            sub: uuid::Uuid::new_v4(),
            name: "alice".into(),
            exp: (chrono::Utc::now().timestamp() - 3600) as usize,
        };
        let token = sign(secret, &claims);

        let validator = JwtValidator::new(secret.to_string());
        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::InvalidToken)
        ));
    }
}
