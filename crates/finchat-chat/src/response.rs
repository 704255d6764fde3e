//! Interpretation of backend replies.
//!
//! Pulls the reply text out of whatever JSON shape the backend returned and
//! runs it through extraction and normalization.

use serde_json::Value;

use finchat_core::types::{Action, Visualization};

use crate::extractor::extract;
use crate::normalizer::normalize;

/// Keys searched, in order, for the reply text.
const REPLY_KEYS: [&str; 4] = ["output", "text", "message", "response"];

// =============================================================================
// InterpretedReply
// =============================================================================

/// Display text plus the structured payloads found in it.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpretedReply {
    pub text: String,
    pub action: Option<Action>,
    pub visualization: Option<Visualization>,
}

/// Extract and normalize the structured parts of a reply.
pub fn interpret(text: &str) -> InterpretedReply {
    let extraction = extract(text);
    InterpretedReply {
        text: extraction.cleaned_text,
        action: extraction.action.map(normalize),
        visualization: extraction.visualization,
    }
}

/// Reply text from a backend body. `None` means the reply was empty.
///
/// Arrays are unwrapped to their first element. Objects yield the first
/// non-null of `output`, `text`, `message`, `response`; an object with none
/// of them is stringified whole.
pub fn reply_text(body: &Value) -> Option<String> {
    match body {
        Value::Null => None,
        Value::String(s) => non_blank(s),
        Value::Array(items) => items.first().and_then(reply_text),
        Value::Object(map) => match REPLY_KEYS
            .iter()
            .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
        {
            Some(Value::String(s)) => non_blank(s),
            Some(other) => Some(other.to_string()),
            None => Some(body.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn non_blank(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
