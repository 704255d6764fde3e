use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Message
// =============================================================================

/// A single entry in the conversation history.
///
/// Messages are immutable once appended. Timestamps serialize as RFC 3339
/// strings and deserialize back into instants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable identifier, used as a render key.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Display text (already cleaned of embedded payloads for bot messages).
    pub text: String,
    /// Whether the user authored this message.
    pub is_user: bool,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Suggested action attached to a bot reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Chart attached to a bot reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
}

impl Message {
    /// A user-authored message stamped with the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user: true,
            timestamp: Utc::now(),
            action: None,
            visualization: None,
        }
    }

    /// A bot-authored message stamped with the current time.
    pub fn bot(
        text: impl Into<String>,
        action: Option<Action>,
        visualization: Option<Visualization>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user: false,
            timestamp: Utc::now(),
            action,
            visualization,
        }
    }
}

// =============================================================================
// Action
// =============================================================================

/// Kind of machine-actionable instruction the assistant can suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Navigate,
    Scroll,
    #[serde(alias = "openModal", alias = "open_modal")]
    OpenModal,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Navigate => write!(f, "navigate"),
            ActionType::Scroll => write!(f, "scroll"),
            ActionType::OpenModal => write!(f, "open-modal"),
        }
    }
}

/// A query-string value: numeric when it parsed as a finite float, text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Number(f64),
    Text(String),
}

impl QueryValue {
    /// Coerce a raw query-string value.
    pub fn coerce(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => QueryValue::Number(n),
            _ => QueryValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Number(n) => write!(f, "{}", n),
            QueryValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A normalized action: `label` and `icon` are always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<BTreeMap<String, QueryValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    pub label: String,
    pub icon: String,
}

// =============================================================================
// Visualization
// =============================================================================

/// Chart kinds the client knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Doughnut,
    Pie,
    Bar,
    Line,
}

impl ChartType {
    pub const ALL: [ChartType; 4] = [
        ChartType::Doughnut,
        ChartType::Pie,
        ChartType::Bar,
        ChartType::Line,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Doughnut => "doughnut",
            ChartType::Pie => "pie",
            ChartType::Bar => "bar",
            ChartType::Line => "line",
        }
    }

    /// Parse a chart kind name; `None` for anything outside the four kinds.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels and values of a chart series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

/// Chart-ready data embedded in an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub kind: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub data: ChartData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
}
