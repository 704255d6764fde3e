//! Action normalization.
//!
//! Upstream action payloads are often partial. [`normalize`] fills in the
//! action type, a human-readable label, and an icon so that every action
//! handed to the UI is complete.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use finchat_core::types::{Action, ActionType, QueryValue};

/// Icon identifiers understood by the client.
pub mod icons {
    pub const TRANSACTION: &str = "receipt";
    pub const SAVINGS: &str = "piggy-bank";
    pub const BUDGET: &str = "wallet";
    pub const DASHBOARD: &str = "home";
    pub const REPORT: &str = "bar-chart";
    pub const NAVIGATE: &str = "arrow-right";
    pub const SCROLL: &str = "arrow-down";
    pub const MODAL: &str = "plus";
}

/// Path keywords, checked in order, with the label and icon they imply.
static PATH_DEFAULTS: &[(&str, &str, &str)] = &[
    ("transaction", "Add transaction", icons::TRANSACTION),
    ("saving", "View savings goals", icons::SAVINGS),
    ("budget", "Manage budgets", icons::BUDGET),
    ("dashboard", "Go to dashboard", icons::DASHBOARD),
    ("report", "View reports", icons::REPORT),
];

/// An action as it arrives from the assistant: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAction {
    #[serde(rename = "type", default)]
    pub kind: Option<ActionType>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, alias = "query_params", deserialize_with = "lenient_params")]
    pub query_params: Option<BTreeMap<String, QueryValue>>,
    #[serde(default, alias = "element_id")]
    pub element_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Complete a raw action. Never fails.
pub fn normalize(raw: RawAction) -> Action {
    let kind = raw.kind.unwrap_or(ActionType::Navigate);
    let (default_label, default_icon) = defaults_for(kind, raw.path.as_deref());

    Action {
        kind,
        label: non_blank(raw.label).unwrap_or_else(|| default_label.to_string()),
        icon: non_blank(raw.icon).unwrap_or_else(|| default_icon.to_string()),
        path: raw.path,
        query_params: raw.query_params.filter(|q| !q.is_empty()),
        element_id: raw.element_id,
    }
}

fn defaults_for(kind: ActionType, path: Option<&str>) -> (&'static str, &'static str) {
    if let Some(path) = path {
        let path = path.to_lowercase();
        if let Some(&(_, label, icon)) = PATH_DEFAULTS
            .iter()
            .find(|(keyword, _, _)| path.contains(keyword))
        {
            return (label, icon);
        }
    }

    match kind {
        ActionType::Navigate => ("Open page", icons::NAVIGATE),
        ActionType::Scroll => ("Show me", icons::SCROLL),
        ActionType::OpenModal => ("Open", icons::MODAL),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Numbers stay numbers, nulls are dropped, anything else becomes text.
/// A non-object is treated as absent.
fn lenient_params<'de, D>(
    deserializer: D,
) -> Result<Option<BTreeMap<String, QueryValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Object(map)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let params = map
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Number(n) => match n.as_f64() {
                    Some(n) => QueryValue::Number(n),
                    None => QueryValue::Text(n.to_string()),
                },
                Value::String(s) => QueryValue::Text(s),
                other => QueryValue::Text(other.to_string()),
            };
            Some((key, value))
        })
        .collect();
    Ok(Some(params))
}
