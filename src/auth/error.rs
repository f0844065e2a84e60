use thiserror::Error;

/// Authentication failures (§7 — all close the Gateway upgrade with 1008).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token or guest token")]
    MissingCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("authentication timed out")]
    Timeout,
    #[error("user is not a member of this room")]
    NotAMember,
}
