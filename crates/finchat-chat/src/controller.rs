//! Send/retry controller.
//!
//! Owns the single in-flight request and is the only writer of the message
//! history. State transitions:
//!
//! ```text
//! Idle | Failed --submit--> Sending --reply--> Idle
//!                                   --empty or error--> Failed
//! ```
//!
//! A submit while `Sending` is rejected with [`ChatError::Busy`] and has no
//! side effects. Backend failures never surface as errors: they become a
//! synthetic assistant message plus a recorded [`ChatFailure`]. A submit
//! future dropped before the reply lands is settled the same way, as a
//! transport failure, so every user message is answered.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use finchat_core::config::ChatConfig;
use finchat_core::limits::{MAX_MESSAGE_LENGTH, MIN_MESSAGE_LENGTH};
use finchat_core::types::Message;
use finchat_storage::PersistenceGateway;

use crate::backend::{BackendError, ChatBackend, ChatRequest};
use crate::error::ChatError;
use crate::history::{HistoryWriter, PendingSave};
use crate::response::{interpret, reply_text};
use crate::session::{log_persistence_failure, SessionManager};
use crate::store::{MessageStore, Snapshot};

pub const TRANSPORT_FAILURE_TEXT: &str =
    "Sorry, I'm having trouble connecting right now. Please try again in a moment.";

pub const EMPTY_REPLY_TEXT: &str = "I received an empty response. Please try again.";

pub fn rate_limited_text(retry_after_seconds: u64) -> String {
    format!(
        "You're sending messages too quickly. Please wait {} seconds before trying again.",
        retry_after_seconds
    )
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    RateLimited { retry_after_seconds: u64 },
    EmptyResponse,
}

/// The most recent failed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatFailure {
    pub kind: FailureKind,
    /// Text shown to the user.
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ChatFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    Sending,
    /// Idle, with the failure of the last exchange kept for display.
    Failed(ChatFailure),
}

// =============================================================================
// ConversationController
// =============================================================================

pub struct ConversationController {
    backend: Arc<dyn ChatBackend>,
    gateway: Arc<PersistenceGateway>,
    sessions: SessionManager,
    store: MessageStore,
    history: HistoryWriter,
    state: Mutex<ConversationState>,
}

impl ConversationController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        gateway: Arc<PersistenceGateway>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            backend,
            sessions: SessionManager::new(gateway.clone(), config.session_prefix.clone()),
            history: HistoryWriter::new(gateway.clone()),
            gateway,
            store: MessageStore::new(),
            state: Mutex::new(ConversationState::Idle),
        }
    }

    /// Send a user message and wait for the assistant's answer.
    ///
    /// Returns the appended assistant message, which is a synthetic error
    /// message when the backend failed or replied with nothing.
    pub async fn submit(&self, text: &str) -> Result<Message, ChatError> {
        let text = self.validate(text)?;
        self.begin_sending()?;
        let (guard, save) = SendingGuard::arm(self, Message::user(text.clone()));
        save.run().await;

        let request = ChatRequest {
            message: text,
            session_id: self.sessions.get_session_id(),
        };
        let outcome = self.backend.send(&request).await;
        let (reply, failure) = resolve(outcome);

        guard.settle(reply.clone(), failure).run().await;
        Ok(reply)
    }

    /// Re-send the most recent user message. `Ok(None)` if there is none.
    pub async fn retry_last_message(&self) -> Result<Option<Message>, ChatError> {
        let Some(last) = self.store.last_user_message() else {
            debug!("Nothing to retry");
            return Ok(None);
        };
        info!("Retrying last message");
        self.submit(&last.text).await.map(Some)
    }

    /// Seed the history from persistence. Returns the number of messages loaded.
    pub fn restore_history(&self) -> Result<usize, ChatError> {
        if self.is_sending() {
            return Err(ChatError::Busy);
        }
        let messages = match self.gateway.load_messages() {
            Ok(Some(messages)) => messages,
            Ok(None) => Vec::new(),
            Err(e) => {
                log_persistence_failure("load messages", &e);
                Vec::new()
            }
        };
        let count = messages.len();
        self.store.replace_all(messages);
        info!(count, "Restored conversation history");
        Ok(count)
    }

    /// Drop the history and session, locally and in persistence.
    pub fn clear_history(&self) -> Result<(), ChatError> {
        let mut state = self.lock_state();
        if *state == ConversationState::Sending {
            return Err(ChatError::Busy);
        }
        self.store.clear();
        self.history.fence(|| self.sessions.clear_history());
        *state = ConversationState::Idle;
        Ok(())
    }

    pub fn state(&self) -> ConversationState {
        self.lock_state().clone()
    }

    pub fn last_error(&self) -> Option<ChatFailure> {
        match &*self.lock_state() {
            ConversationState::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    pub fn is_sending(&self) -> bool {
        *self.lock_state() == ConversationState::Sending
    }

    pub fn messages(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn session_id(&self) -> String {
        self.sessions.get_session_id()
    }

    // ---- internals ----

    fn validate(&self, text: &str) -> Result<String, ChatError> {
        let text = text.trim();
        let length = text.chars().count();
        if length < MIN_MESSAGE_LENGTH {
            return Err(ChatError::EmptyMessage);
        }
        if length > MAX_MESSAGE_LENGTH {
            return Err(ChatError::MessageTooLong(MAX_MESSAGE_LENGTH));
        }
        Ok(text.to_string())
    }

    /// Atomic Idle/Failed -> Sending transition.
    fn begin_sending(&self) -> Result<(), ChatError> {
        let mut state = self.lock_state();
        if *state == ConversationState::Sending {
            debug!("Rejected submit while a message is in flight");
            return Err(ChatError::Busy);
        }
        *state = ConversationState::Sending;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append the assistant message that ends an exchange and leave `Sending`.
    fn finish(&self, reply: Message, failure: Option<ChatFailure>) -> PendingSave {
        let mut state = self.lock_state();
        let save = self.history.prepare(self.store.append(reply));
        *state = match failure {
            Some(failure) => ConversationState::Failed(failure),
            None => ConversationState::Idle,
        };
        save
    }
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("state", &self.state())
            .field("messages", &self.store.len())
            .finish()
    }
}

/// Owns one exchange from the user message to its answer.
///
/// Dropped unsettled (the submit future was cancelled), it answers the user
/// message with a transport failure and persists that in the background.
struct SendingGuard<'a> {
    controller: &'a ConversationController,
    settled: bool,
}

impl<'a> SendingGuard<'a> {
    fn arm(controller: &'a ConversationController, message: Message) -> (Self, PendingSave) {
        let save = controller.history.prepare(controller.store.append(message));
        let guard = Self {
            controller,
            settled: false,
        };
        (guard, save)
    }

    fn settle(mut self, reply: Message, failure: Option<ChatFailure>) -> PendingSave {
        self.settled = true;
        self.controller.finish(reply, failure)
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Send abandoned before the backend answered");
        let (reply, failure) =
            failure_message(ChatFailure::new(FailureKind::Transport, TRANSPORT_FAILURE_TEXT));
        self.controller.finish(reply, failure).detach();
    }
}

/// Turn a backend outcome into the assistant message to append.
fn resolve(outcome: Result<Value, BackendError>) -> (Message, Option<ChatFailure>) {
    match outcome {
        Ok(body) => match reply_text(&body) {
            Some(text) => {
                let reply = interpret(&text);
                (
                    Message::bot(reply.text, reply.action, reply.visualization),
                    None,
                )
            }
            None => {
                warn!("Backend returned an empty reply");
                failure_message(ChatFailure::new(FailureKind::EmptyResponse, EMPTY_REPLY_TEXT))
            }
        },
        Err(BackendError::RateLimited(limit)) => {
            let retry_after_seconds = limit.retry_after();
            failure_message(ChatFailure::new(
                FailureKind::RateLimited {
                    retry_after_seconds,
                },
                rate_limited_text(retry_after_seconds),
            ))
        }
        Err(e) => {
            warn!(error = %e, "Chat request failed");
            failure_message(ChatFailure::new(
                FailureKind::Transport,
                TRANSPORT_FAILURE_TEXT,
            ))
        }
    }
}

fn failure_message(failure: ChatFailure) -> (Message, Option<ChatFailure>) {
    (Message::bot(failure.message.clone(), None, None), Some(failure))
}
