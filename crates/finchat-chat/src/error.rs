//! Error types for the conversation engine.
//!
//! Only rejections surface as errors: backend failures are converted into
//! synthetic assistant messages by the controller instead.

/// Reasons a conversation operation was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("a message is already being sent")]
    Busy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(500).to_string(),
            "message exceeds maximum length of 500 characters"
        );
        assert_eq!(
            ChatError::Busy.to_string(),
            "a message is already being sent"
        );
    }
}
