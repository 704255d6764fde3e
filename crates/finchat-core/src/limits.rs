//! Input validation limits shared by the conversation engine and its callers.

/// Maximum length of a user message, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 500;

/// Minimum length of a user message after trimming, in characters.
pub const MIN_MESSAGE_LENGTH: usize = 1;

/// Wait time reported to the user when a rate-limit reply omits one.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
