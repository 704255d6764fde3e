//! Conversation engine for the finchat assistant.
//!
//! Interprets semi-structured assistant replies (embedded actions and
//! charts), owns the message history, and drives the single-in-flight
//! send/retry lifecycle against the assistant backend.

pub mod backend;
pub mod controller;
pub mod error;
pub mod extractor;
mod history;
pub mod mock;
pub mod normalizer;
pub mod response;
pub mod session;
pub mod store;

pub use backend::{BackendError, ChatBackend, ChatRequest, HttpBackend, RateLimitError};
pub use controller::{
    rate_limited_text, ChatFailure, ConversationController, ConversationState, FailureKind,
    EMPTY_REPLY_TEXT, TRANSPORT_FAILURE_TEXT,
};
pub use error::ChatError;
pub use extractor::{
    cleanup, extract, validate_shape, ActionStrategy, Extraction, VisualizationStrategy,
};
pub use mock::ScriptedBackend;
pub use normalizer::{normalize, RawAction};
pub use response::{interpret, reply_text, InterpretedReply};
pub use session::SessionManager;
pub use store::{MessageStore, Snapshot};
