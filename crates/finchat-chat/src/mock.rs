//! Scripted backend for offline use and tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::{BackendError, ChatBackend, ChatRequest};

/// Replays queued replies in order, then answers with a fixed fallback.
///
/// Every request is recorded so callers can inspect what was sent.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Value, BackendError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    fallback: Value,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_fallback(json!({
            "output": "I'm running offline, so I can't look at your finances right now."
        }))
    }

    pub fn with_fallback(fallback: Value) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback,
        }
    }

    /// Queue a reply body.
    pub fn push_reply(&self, body: Value) -> &Self {
        self.push(Ok(body))
    }

    /// Queue a failure.
    pub fn push_error(&self, err: BackendError) -> &Self {
        self.push(Err(err))
    }

    fn push(&self, reply: Result<Value, BackendError>) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send(&self, request: &ChatRequest) -> Result<Value, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
