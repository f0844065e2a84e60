//! Wire-level validation rules (§6, §4.4 edge cases).

/// Maximum length of a chat message, in characters (§6).
pub const MAX_CHAT_LENGTH: usize = 500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("chat message exceeds {MAX_CHAT_LENGTH} characters")]
    ChatTooLong,
    #[error("chat message is empty")]
    ChatEmpty,
}

pub fn validate_chat_message(message: &str) -> Result<(), ValidationError> {
    if message.is_empty() {
        return Err(ValidationError::ChatEmpty);
    }
    if message.chars().count() > MAX_CHAT_LENGTH {
        return Err(ValidationError::ChatTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_chat() {
        assert_eq!(validate_chat_message(""), Err(ValidationError::ChatEmpty));
    }

    #[test]
    fn rejects_overlong_chat() {
        let message = "a".repeat(MAX_CHAT_LENGTH + 1);
        assert_eq!(
            validate_chat_message(&message),
            Err(ValidationError::ChatTooLong)
        );
    }

    #[test]
    fn accepts_boundary_length_chat() {
        let message = "a".repeat(MAX_CHAT_LENGTH);
        assert!(validate_chat_message(&message).is_ok());
    }
}
