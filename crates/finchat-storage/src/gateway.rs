//! User-scoped persistence gateway.
//!
//! Serializes the conversation history and session id under per-user keys
//! of an injected [`KeyValueStore`]. Every operation requires an established
//! user context and fails with [`FinchatError::NoUserContext`] otherwise.

use std::sync::{Arc, RwLock};

use tracing::debug;

use finchat_core::error::{FinchatError, Result};
use finchat_core::types::Message;

use crate::kv::KeyValueStore;

const MESSAGES_PREFIX: &str = "chat_messages";
const SESSION_PREFIX: &str = "chat_session";

/// Loads and saves conversation state for the current user.
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    user: RwLock<Option<String>>,
}

impl PersistenceGateway {
    /// Create a gateway with no user context.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            user: RwLock::new(None),
        }
    }

    /// Create a gateway already scoped to `user_id`.
    pub fn for_user(store: Arc<dyn KeyValueStore>, user_id: impl Into<String>) -> Self {
        let gateway = Self::new(store);
        gateway.set_user(Some(user_id.into()));
        gateway
    }

    /// Establish (or drop, with `None`) the user context.
    pub fn set_user(&self, user_id: Option<String>) {
        let user_id = user_id.filter(|u| !u.trim().is_empty());
        match self.user.write() {
            Ok(mut guard) => *guard = user_id,
            Err(poisoned) => *poisoned.into_inner() = user_id,
        }
    }

    /// The current user id, if one is established.
    pub fn current_user(&self) -> Option<String> {
        match self.user.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Persist the full message sequence, replacing what was stored before.
    pub fn save_messages(&self, messages: &[Message]) -> Result<()> {
        let key = self.scoped_key(MESSAGES_PREFIX)?;
        let json = serde_json::to_string(messages)?;
        self.store.set(&key, &json)?;
        debug!(key = %key, count = messages.len(), "Saved chat messages");
        Ok(())
    }

    /// Load the stored message sequence, or `None` if nothing was saved.
    pub fn load_messages(&self) -> Result<Option<Vec<Message>>> {
        let key = self.scoped_key(MESSAGES_PREFIX)?;
        match self.store.get(&key)? {
            Some(json) => {
                let messages: Vec<Message> = serde_json::from_str(&json)?;
                debug!(key = %key, count = messages.len(), "Loaded chat messages");
                Ok(Some(messages))
            }
            None => Ok(None),
        }
    }

    /// Delete the stored message sequence.
    pub fn clear_messages(&self) -> Result<()> {
        let key = self.scoped_key(MESSAGES_PREFIX)?;
        self.store.remove(&key)
    }

    /// Load the stored session id, if any.
    pub fn load_session_id(&self) -> Result<Option<String>> {
        let key = self.scoped_key(SESSION_PREFIX)?;
        Ok(self.store.get(&key)?.filter(|id| !id.is_empty()))
    }

    /// Persist the session id.
    pub fn save_session_id(&self, session_id: &str) -> Result<()> {
        let key = self.scoped_key(SESSION_PREFIX)?;
        self.store.set(&key, session_id)
    }

    /// Delete the stored session id.
    pub fn clear_session_id(&self) -> Result<()> {
        let key = self.scoped_key(SESSION_PREFIX)?;
        self.store.remove(&key)
    }

    fn scoped_key(&self, prefix: &str) -> Result<String> {
        self.current_user()
            .map(|user| format!("{}_{}", prefix, user))
            .ok_or(FinchatError::NoUserContext)
    }
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("user", &self.current_user())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use finchat_core::types::{ActionType, ChartType};

    fn gateway(user: &str) -> (PersistenceGateway, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gw = PersistenceGateway::for_user(store.clone(), user);
        (gw, store)
    }

    #[test]
    fn test_save_and_load_messages() {
        let (gw, _) = gateway("alice");
        let messages = vec![
            Message::user("Show my budget"),
            Message::bot("Here it is.", None, None),
        ];
        gw.save_messages(&messages).unwrap();

        let loaded = gw.load_messages().unwrap().unwrap();
        assert_eq!(loaded, messages);
    }

    #[test]
    fn test_timestamps_survive_round_trip() {
        let (gw, store) = gateway("alice");
        let msg = Message::user("hi");
        gw.save_messages(std::slice::from_ref(&msg)).unwrap();

        let raw = store.get("chat_messages_alice").unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let ts = stored[0]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());

        let loaded = gw.load_messages().unwrap().unwrap();
        assert_eq!(loaded[0].timestamp, msg.timestamp);
    }

    #[test]
    fn test_action_and_visualization_round_trip() {
        let (gw, _) = gateway("alice");
        let json = r#"[{
            "text": "Spending by category",
            "isUser": false,
            "timestamp": "2024-05-01T08:00:00Z",
            "action": { "type": "navigate", "path": "/budgets", "label": "Manage budgets", "icon": "wallet" },
            "visualization": { "type": "doughnut", "data": { "labels": ["Food"], "values": [42] } }
        }]"#;
        let messages: Vec<Message> = serde_json::from_str(json).unwrap();
        gw.save_messages(&messages).unwrap();

        let loaded = gw.load_messages().unwrap().unwrap();
        assert_eq!(loaded[0].action.as_ref().unwrap().kind, ActionType::Navigate);
        assert_eq!(
            loaded[0].visualization.as_ref().unwrap().kind,
            ChartType::Doughnut
        );
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (gw, _) = gateway("alice");
        assert!(gw.load_messages().unwrap().is_none());
        assert!(gw.load_session_id().unwrap().is_none());
    }

    #[test]
    fn test_keys_are_user_scoped() {
        let store = Arc::new(MemoryStore::new());
        let alice = PersistenceGateway::for_user(store.clone(), "alice");
        let bob = PersistenceGateway::for_user(store.clone(), "bob");

        alice.save_session_id("session_a").unwrap();
        bob.save_session_id("session_b").unwrap();

        assert_eq!(alice.load_session_id().unwrap().as_deref(), Some("session_a"));
        assert_eq!(bob.load_session_id().unwrap().as_deref(), Some("session_b"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_no_user_context_refuses() {
        let store = Arc::new(MemoryStore::new());
        let gw = PersistenceGateway::new(store.clone());

        assert!(matches!(
            gw.save_messages(&[Message::user("x")]),
            Err(FinchatError::NoUserContext)
        ));
        assert!(matches!(gw.load_messages(), Err(FinchatError::NoUserContext)));
        assert!(matches!(
            gw.save_session_id("s"),
            Err(FinchatError::NoUserContext)
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_blank_user_is_no_context() {
        let store = Arc::new(MemoryStore::new());
        let gw = PersistenceGateway::for_user(store, "   ");
        assert!(gw.current_user().is_none());
    }

    #[test]
    fn test_clear_removes_both_keys() {
        let (gw, store) = gateway("alice");
        gw.save_messages(&[Message::user("x")]).unwrap();
        gw.save_session_id("session_1").unwrap();

        gw.clear_messages().unwrap();
        gw.clear_session_id().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_history_is_serialization_error() {
        let (gw, store) = gateway("alice");
        store.set("chat_messages_alice", "{not json").unwrap();
        assert!(matches!(
            gw.load_messages(),
            Err(FinchatError::Serialization(_))
        ));
    }
}
