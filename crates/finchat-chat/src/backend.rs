//! Assistant backend transport.
//!
//! `ChatBackend` is the seam between the controller and the remote
//! assistant. `HttpBackend` posts `{ message, sessionId }` as JSON and
//! returns the decoded reply body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use finchat_core::limits::DEFAULT_RETRY_AFTER_SECS;

/// Outgoing chat request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

/// Body of a `429 Too Many Requests` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitError {
    pub error: Option<String>,
    pub output: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitError {
    /// Seconds to wait, falling back to the default when the backend gave none.
    pub fn retry_after(&self) -> u64 {
        self.retry_after_seconds.unwrap_or(DEFAULT_RETRY_AFTER_SECS)
    }
}

/// Failures talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rate limited, retry after {} seconds", .0.retry_after())]
    RateLimited(RateLimitError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Something that can deliver a chat request and return the raw reply body.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<Value, BackendError>;
}

// =============================================================================
// HttpBackend
// =============================================================================

/// JSON-over-HTTP backend.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send(&self, request: &ChatRequest) -> Result<Value, BackendError> {
        debug!(endpoint = %self.endpoint, session_id = %request.session_id, "Sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(format!("Failed to read response: {}", e)))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            let limit = rate_limit_from(&text, retry_after.as_deref());
            warn!(retry_after = limit.retry_after(), "Backend rate limit hit");
            return Err(BackendError::RateLimited(limit));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(parse_body(&text))
    }
}

/// Decode a reply body: empty is `Null`, non-JSON is kept as a string.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Build the rate-limit details from a 429 body and `Retry-After` header.
///
/// Each body field is read on its own, so one malformed field does not lose
/// the others. Fractional waits round up.
pub fn rate_limit_from(body: &str, retry_after_header: Option<&str>) -> RateLimitError {
    let body: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

    let retry_after_seconds = body
        .get("retryAfterSeconds")
        .and_then(wait_seconds)
        .or_else(|| retry_after_header.and_then(|h| parse_seconds(h.trim())));

    RateLimitError {
        error: text("error"),
        output: text("output"),
        retry_after_seconds,
    }
}

fn wait_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(ceil_seconds)),
        Value::String(s) => parse_seconds(s.trim()),
        _ => None,
    }
}

fn parse_seconds(raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(ceil_seconds))
}

fn ceil_seconds(secs: f64) -> Option<u64> {
    (secs.is_finite() && secs >= 0.0).then_some(secs.ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = ChatRequest {
            message: "How am I doing?".to_string(),
            session_id: "session_1_abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"message": "How am I doing?", "sessionId": "session_1_abc"})
        );
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  \n"), Value::Null);
        assert_eq!(parse_body(r#"{"output":"hi"}"#), json!({"output": "hi"}));
        assert_eq!(parse_body("null"), Value::Null);
        assert_eq!(parse_body("plain words"), json!("plain words"));
    }

    #[test]
    fn test_rate_limit_from_body() {
        let limit = rate_limit_from(
            r#"{"error":"rate_limited","output":"Slow down","retryAfterSeconds":30}"#,
            Some("90"),
        );
        assert_eq!(limit.retry_after_seconds, Some(30));
        assert_eq!(limit.output.as_deref(), Some("Slow down"));
    }

    #[test]
    fn test_rate_limit_lenient_wait_values() {
        let limit = rate_limit_from(
            r#"{"error":"rate_limited","output":"Slow down","retryAfterSeconds":30.5}"#,
            None,
        );
        assert_eq!(limit.retry_after(), 31);
        assert_eq!(limit.error.as_deref(), Some("rate_limited"));
        assert_eq!(limit.output.as_deref(), Some("Slow down"));

        let limit = rate_limit_from(r#"{"output":"Slow down","retryAfterSeconds":"30"}"#, None);
        assert_eq!(limit.retry_after(), 30);
        assert_eq!(limit.output.as_deref(), Some("Slow down"));
    }

    #[test]
    fn test_rate_limit_bad_fields_fall_back_separately() {
        let limit = rate_limit_from(
            r#"{"error":42,"output":"Slow down","retryAfterSeconds":-5}"#,
            Some("20"),
        );
        assert_eq!(limit.error, None);
        assert_eq!(limit.output.as_deref(), Some("Slow down"));
        assert_eq!(limit.retry_after(), 20);

        let limit = rate_limit_from(r#"{"retryAfterSeconds":"soon"}"#, None);
        assert_eq!(limit.retry_after(), DEFAULT_RETRY_AFTER_SECS);
    }

    #[test]
    fn test_rate_limit_falls_back_to_header_then_default() {
        let limit = rate_limit_from("not json", Some(" 45 "));
        assert_eq!(limit.retry_after(), 45);

        let limit = rate_limit_from("{}", None);
        assert_eq!(limit.retry_after_seconds, None);
        assert_eq!(limit.retry_after(), DEFAULT_RETRY_AFTER_SECS);
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::RateLimited(RateLimitError {
            retry_after_seconds: Some(12),
            ..RateLimitError::default()
        });
        assert_eq!(err.to_string(), "rate limited, retry after 12 seconds");

        let err = BackendError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "backend returned 502: bad gateway");
    }

    #[test]
    fn test_http_backend_keeps_endpoint() {
        let backend =
            HttpBackend::new("http://localhost:5678/webhook/chat", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:5678/webhook/chat");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let backend = HttpBackend::new("http://127.0.0.1:1/chat", Duration::from_secs(2)).unwrap();
        let request = ChatRequest {
            message: "hi".to_string(),
            session_id: "s".to_string(),
        };
        assert!(matches!(
            backend.send(&request).await,
            Err(BackendError::Transport(_))
        ));
    }
}
