//! In-memory message history.
//!
//! Readers get cheap immutable snapshots and can subscribe to changes. Only
//! code inside this crate (the controller) can mutate the history.

use std::sync::Arc;

use tokio::sync::watch;

use finchat_core::types::Message;

/// Immutable view of the history at one point in time.
pub type Snapshot = Arc<Vec<Message>>;

/// Ordered, append-only message sequence for the active conversation.
pub struct MessageStore {
    tx: watch::Sender<Snapshot>,
}

impl MessageStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Vec::new()));
        Self { tx }
    }

    /// Current history.
    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    /// Most recent user-authored message, if any.
    pub fn last_user_message(&self) -> Option<Message> {
        self.tx.borrow().iter().rev().find(|m| m.is_user).cloned()
    }

    pub(crate) fn append(&self, message: Message) -> Snapshot {
        self.tx.send_modify(|history| Arc::make_mut(history).push(message));
        self.snapshot()
    }

    pub(crate) fn replace_all(&self, messages: Vec<Message>) {
        self.tx.send_replace(Arc::new(messages));
    }

    pub(crate) fn clear(&self) {
        self.replace_all(Vec::new());
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("len", &self.len())
            .finish()
    }
}
