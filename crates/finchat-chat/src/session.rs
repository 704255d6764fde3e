//! Conversation session identifiers.
//!
//! A session id correlates requests of one conversation on the backend. It
//! is persisted per user and only replaced when the history is cleared.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use finchat_core::error::FinchatError;
use finchat_storage::PersistenceGateway;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Provides the current session id, minting and persisting one on demand.
pub struct SessionManager {
    gateway: Arc<PersistenceGateway>,
    prefix: String,
    current: Mutex<Option<String>>,
}

impl SessionManager {
    pub fn new(gateway: Arc<PersistenceGateway>, prefix: impl Into<String>) -> Self {
        Self {
            gateway,
            prefix: prefix.into(),
            current: Mutex::new(None),
        }
    }

    /// The cached id, else the stored one, else a freshly minted id.
    pub fn get_session_id(&self) -> String {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = current.as_ref() {
            return id.clone();
        }

        let id = match self.gateway.load_session_id() {
            Ok(Some(id)) => {
                debug!(session_id = %id, "Resumed stored session");
                id
            }
            Ok(None) => self.mint_and_save(),
            Err(e) => {
                log_persistence_failure("load session id", &e);
                self.mint_and_save()
            }
        };
        *current = Some(id.clone());
        id
    }

    /// Remove stored messages and session id; the next call mints a new id.
    pub fn clear_history(&self) {
        if let Err(e) = self.gateway.clear_messages() {
            log_persistence_failure("clear messages", &e);
        }
        if let Err(e) = self.gateway.clear_session_id() {
            log_persistence_failure("clear session id", &e);
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("Conversation history cleared");
    }

    fn mint_and_save(&self) -> String {
        let id = generate_session_id(&self.prefix);
        if let Err(e) = self.gateway.save_session_id(&id) {
            log_persistence_failure("save session id", &e);
        }
        info!(session_id = %id, "Started new session");
        id
    }
}

/// `<prefix>_<unix-millis>_<9 random base36 chars>`.
pub fn generate_session_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

pub(crate) fn log_persistence_failure(operation: &str, err: &FinchatError) {
    match err {
        FinchatError::NoUserContext => {
            warn!(operation, "Skipping persistence: no user context")
        }
        other => warn!(operation, error = %other, "Persistence failed"),
    }
}
