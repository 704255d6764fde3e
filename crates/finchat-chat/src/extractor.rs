//! Action and visualization extraction from assistant replies.
//!
//! The assistant answers in free text that may embed a suggested action or a
//! chart as a fenced JSON block, an inline `[ACTION:...]` marker, or a bare
//! JSON object. Each payload kind has an ordered list of strategies; the
//! first strategy that finds a valid payload wins. Recognized fragments are
//! cut out of the text shown to the user.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use finchat_core::types::{ActionType, ChartData, ChartType, QueryValue, Visualization};

use crate::normalizer::RawAction;

/// Any fenced code block: optional info tag, then the body up to the closing fence.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)(.*?)```").unwrap());

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ACTION:([A-Za-z_-]+):([^\]\s]+)\]").unwrap());

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Result of scanning one reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    /// Action payload before normalization.
    pub action: Option<RawAction>,
    pub visualization: Option<Visualization>,
    /// Reply text with recognized fragments removed.
    pub cleaned_text: String,
}

/// A payload found by a strategy, with the byte range it occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct Found<T> {
    pub value: T,
    pub span: Range<usize>,
}

// ---- Strategies ----

/// Ways an action can be embedded in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStrategy {
    /// ```` ```json {"action": {...}} ``` ````
    FencedJsonBlock,
    /// `[ACTION:navigate:/path?key=value]`
    InlineMarker,
    /// A bare `{"action": {...}}` outside any fence.
    InlineObject,
}

impl ActionStrategy {
    pub const ORDER: [ActionStrategy; 3] = [
        ActionStrategy::FencedJsonBlock,
        ActionStrategy::InlineMarker,
        ActionStrategy::InlineObject,
    ];

    pub fn find(self, text: &str) -> Option<Found<RawAction>> {
        self.find_in(text, &fences(text))
    }

    fn find_in(self, text: &str, fences: &[Fence<'_>]) -> Option<Found<RawAction>> {
        match self {
            ActionStrategy::FencedJsonBlock => fences
                .iter()
                .filter(|f| f.tag.eq_ignore_ascii_case("json"))
                .find_map(|f| {
                    let body = parse_object(f.body)?;
                    let value = action_from(body.get("action")?)?;
                    Some(Found {
                        value,
                        span: f.span.clone(),
                    })
                }),
            ActionStrategy::InlineMarker => MARKER_RE.captures_iter(text).find_map(|caps| {
                let whole = caps.get(0)?;
                if !caps[1].eq_ignore_ascii_case("navigate") {
                    return None;
                }
                let value = parse_marker_target(&caps[2])?;
                Some(Found {
                    value,
                    span: whole.range(),
                })
            }),
            ActionStrategy::InlineObject => text
                .match_indices('{')
                .map(|(start, _)| start)
                .filter(|start| !fences.iter().any(|f| f.span.contains(start)))
                .find_map(|start| {
                    let end = balanced_object_end(text, start)?;
                    let candidate = &text[start..end];
                    if !candidate.contains("\"action\"") {
                        return None;
                    }
                    let body = parse_object(candidate)?;
                    let value = action_from(body.get("action")?)?;
                    Some(Found {
                        value,
                        span: start..end,
                    })
                }),
        }
    }
}

/// Ways a chart can be embedded in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationStrategy {
    /// A fenced block with a `visualization` key.
    FencedVisualizationKey,
    /// A fenced block that is itself a chart object.
    FencedChartObject,
}

impl VisualizationStrategy {
    pub const ORDER: [VisualizationStrategy; 2] = [
        VisualizationStrategy::FencedVisualizationKey,
        VisualizationStrategy::FencedChartObject,
    ];

    pub fn find(self, text: &str) -> Option<Found<Visualization>> {
        self.find_in(&fences(text))
    }

    fn find_in(self, fences: &[Fence<'_>]) -> Option<Found<Visualization>> {
        fences.iter().find_map(|f| {
            let body = parse_object(f.body)?;
            let candidate = match self {
                VisualizationStrategy::FencedVisualizationKey => body.get("visualization")?,
                VisualizationStrategy::FencedChartObject => &body,
            };
            let value = validate_shape(candidate)?;
            Some(Found {
                value,
                span: f.span.clone(),
            })
        })
    }
}

// ---- Extraction ----

/// Scan a reply for an action and a visualization and strip what was found.
pub fn extract(text: &str) -> Extraction {
    let fences = fences(text);

    let action = ActionStrategy::ORDER.iter().find_map(|strategy| {
        strategy.find_in(text, &fences).map(|found| {
            debug!(strategy = ?strategy, "Extracted action");
            found
        })
    });
    let visualization = VisualizationStrategy::ORDER.iter().find_map(|strategy| {
        strategy.find_in(&fences).map(|found| {
            debug!(strategy = ?strategy, "Extracted visualization");
            found
        })
    });

    let mut spans = Vec::new();
    spans.extend(action.as_ref().map(|f| f.span.clone()));
    spans.extend(visualization.as_ref().map(|f| f.span.clone()));

    let cleaned_text = if spans.is_empty() {
        text.trim().to_string()
    } else {
        cleanup(&remove_spans(text, spans))
    };

    Extraction {
        action: action.map(|f| f.value),
        visualization: visualization.map(|f| f.value),
        cleaned_text,
    }
}

/// Collapse runs of three or more newlines to two and trim. Idempotent.
pub fn cleanup(text: &str) -> String {
    BLANK_RUN_RE.replace_all(text, "\n\n").trim().to_string()
}

/// Accept a chart only if its type is known and both series are non-empty.
///
/// Non-string labels are stringified and numeric-string values parsed. A
/// value that is not a number rejects the chart. A malformed `title` or
/// `colors` is dropped rather than rejecting it.
pub fn validate_shape(candidate: &Value) -> Option<Visualization> {
    let kind = ChartType::parse(candidate.get("type")?.as_str()?)?;
    let data = candidate.get("data")?;
    let series = |key: &str| {
        data.get(key)
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
    };

    let labels = series("labels")?
        .iter()
        .map(|label| match label {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let values = series("values")?
        .iter()
        .map(chart_value)
        .collect::<Option<Vec<f64>>>()?;

    let title = candidate
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);
    let colors = candidate
        .get("colors")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .map(|c| c.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
        });

    Some(Visualization {
        kind,
        title,
        data: ChartData { labels, values },
        colors,
    })
}

fn chart_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

// ---- Helpers ----

struct Fence<'a> {
    tag: &'a str,
    body: &'a str,
    span: Range<usize>,
}

fn fences(text: &str) -> Vec<Fence<'_>> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(Fence {
                tag: caps.get(1)?.as_str(),
                body: caps.get(2)?.as_str().trim(),
                span: caps.get(0)?.range(),
            })
        })
        .collect()
}

fn parse_object(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
}

fn action_from(value: &Value) -> Option<RawAction> {
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

/// `/path?key=value&...` into a navigate action. Empty paths are rejected.
fn parse_marker_target(target: &str) -> Option<RawAction> {
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    if path.is_empty() {
        return None;
    }

    let params: BTreeMap<String, QueryValue> = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key);
            if key.is_empty() {
                return None;
            }
            Some((key, QueryValue::coerce(&decode_component(value))))
        })
        .collect();

    Some(RawAction {
        kind: Some(ActionType::Navigate),
        path: Some(path.to_string()),
        query_params: (!params.is_empty()).then_some(params),
        ..RawAction::default()
    })
}

fn decode_component(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// End (exclusive) of the JSON object starting at `start`, honoring strings and escapes.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove the given byte ranges (possibly overlapping) from `text`.
fn remove_spans(text: &str, mut spans: Vec<Range<usize>>) -> String {
    spans.sort_by_key(|s| s.start);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            out.push_str(&text[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET_BLOCK: &str = "```json\n{\"action\": {\"type\": \"navigate\", \"path\": \"/budgets\"}}\n```";

    // ---- Action strategies ----

    #[test]
    fn test_fenced_json_action() {
        let text = format!("Let's look at your budgets.\n\n{}", BUDGET_BLOCK);
        let result = extract(&text);

        let action = result.action.unwrap();
        assert_eq!(action.kind, Some(ActionType::Navigate));
        assert_eq!(action.path.as_deref(), Some("/budgets"));
        assert_eq!(result.cleaned_text, "Let's look at your budgets.");
    }

    #[test]
    fn test_fence_tag_is_case_insensitive() {
        let text = "```JSON\n{\"action\": {\"path\": \"/reports\"}}\n```";
        let found = ActionStrategy::FencedJsonBlock.find(text).unwrap();
        assert_eq!(found.value.path.as_deref(), Some("/reports"));
        assert_eq!(found.span, 0..text.len());
    }

    #[test]
    fn test_inline_marker_with_query() {
        let result = extract("[ACTION:navigate:/transactions?amount=500&category=Food%20%26+Drink]");
        let action = result.action.unwrap();
        assert_eq!(action.path.as_deref(), Some("/transactions"));

        let params = action.query_params.unwrap();
        assert_eq!(params["amount"], QueryValue::Number(500.0));
        assert_eq!(
            params["category"],
            QueryValue::Text("Food & Drink".to_string())
        );
        assert_eq!(result.cleaned_text, "");
    }

    #[test]
    fn test_inline_marker_without_query() {
        let result = extract("Opening it now. [ACTION:navigate:/savings]");
        let action = result.action.unwrap();
        assert_eq!(action.path.as_deref(), Some("/savings"));
        assert!(action.query_params.is_none());
        assert_eq!(result.cleaned_text, "Opening it now.");
    }

    #[test]
    fn test_inline_marker_only_navigate() {
        let text = "Scroll down [ACTION:scroll:goals]";
        let result = extract(text);
        assert!(result.action.is_none());
        assert_eq!(result.cleaned_text, text);
    }

    #[test]
    fn test_inline_marker_rejects_empty_path() {
        assert!(ActionStrategy::InlineMarker
            .find("[ACTION:navigate:?amount=5]")
            .is_none());
    }

    #[test]
    fn test_inline_object_action() {
        let result =
            extract(r#"Sure! {"action": {"type": "scroll", "elementId": "goals"}} Let me know."#);
        let action = result.action.unwrap();
        assert_eq!(action.kind, Some(ActionType::Scroll));
        assert_eq!(action.element_id.as_deref(), Some("goals"));
        assert_eq!(result.cleaned_text, "Sure!  Let me know.");
    }

    #[test]
    fn test_inline_object_with_braces_in_strings() {
        let text = r#"{"action": {"path": "/budgets", "label": "Budgets {new} \"x\""}} done"#;
        let result = extract(text);
        assert_eq!(
            result.action.unwrap().label.as_deref(),
            Some(r#"Budgets {new} "x""#)
        );
        assert_eq!(result.cleaned_text, "done");
    }

    #[test]
    fn test_inline_object_nested_inside_other_object() {
        let result = extract(r#"{"meta": 1, "inner": {"action": {"path": "/reports"}}}"#);
        assert_eq!(result.action.unwrap().path.as_deref(), Some("/reports"));
    }

    #[test]
    fn test_unbalanced_object_is_ignored() {
        let text = r#"Broken {"action": {"path": "/budgets"}"#;
        let result = extract(text);
        assert!(result.action.is_none());
        assert_eq!(result.cleaned_text, text);
    }

    // ---- Precedence ----

    #[test]
    fn test_fenced_block_beats_marker() {
        let text = format!("[ACTION:navigate:/reports]\n{}", BUDGET_BLOCK);
        let result = extract(&text);
        assert_eq!(result.action.unwrap().path.as_deref(), Some("/budgets"));
        // Only the winning fragment is removed.
        assert_eq!(result.cleaned_text, "[ACTION:navigate:/reports]");
    }

    #[test]
    fn test_marker_beats_inline_object() {
        let text = r#"{"action": {"path": "/budgets"}} [ACTION:navigate:/reports]"#;
        let result = extract(text);
        assert_eq!(result.action.unwrap().path.as_deref(), Some("/reports"));
    }

    #[test]
    fn test_non_object_action_in_fence_is_not_found() {
        let text = "```json\n{\"action\": \"navigate\"}\n```";
        let result = extract(text);
        assert!(result.action.is_none());
        assert_eq!(result.cleaned_text, text);
    }

    #[test]
    fn test_unknown_action_type_is_not_found() {
        let text = "```json\n{\"action\": {\"type\": \"delete\", \"path\": \"/x\"}}\n```";
        assert!(extract(text).action.is_none());
    }

    // ---- Visualizations ----

    #[test]
    fn test_fenced_visualization_key() {
        let text = "Here is your spending:\n\n```json\n{\"visualization\": {\"type\": \"doughnut\", \"data\": {\"labels\": [\"Food\", \"Rent\"], \"values\": [120, 800]}}}\n```\n\n\n\nAnything else?";
        let result = extract(text);

        let viz = result.visualization.unwrap();
        assert_eq!(viz.kind, ChartType::Doughnut);
        assert_eq!(viz.data.labels, vec!["Food", "Rent"]);
        assert_eq!(result.cleaned_text, "Here is your spending:\n\nAnything else?");
    }

    #[test]
    fn test_fenced_chart_object_any_tag() {
        let text = "```\n{\"type\": \"bar\", \"title\": \"Monthly\", \"data\": {\"labels\": [\"Jan\"], \"values\": [5]}}\n```";
        let result = extract(text);
        let viz = result.visualization.unwrap();
        assert_eq!(viz.kind, ChartType::Bar);
        assert_eq!(viz.title.as_deref(), Some("Monthly"));
        assert_eq!(result.cleaned_text, "");
    }

    #[test]
    fn test_visualization_key_beats_chart_object() {
        let text = "```\n{\"type\": \"bar\", \"data\": {\"labels\": [\"a\"], \"values\": [1]}}\n```\n```json\n{\"visualization\": {\"type\": \"pie\", \"data\": {\"labels\": [\"b\"], \"values\": [2]}}}\n```";
        let viz = extract(text).visualization.unwrap();
        assert_eq!(viz.kind, ChartType::Pie);
    }

    #[test]
    fn test_shape_validator_rejections() {
        let rejected = [
            r#"{"type": "scatter", "data": {"labels": ["a"], "values": [1]}}"#,
            r#"{"type": "pie", "data": {"labels": [], "values": [1]}}"#,
            r#"{"type": "pie", "data": {"labels": ["a"], "values": []}}"#,
            r#"{"type": "pie", "data": {"labels": ["a"]}}"#,
            r#"{"type": "pie"}"#,
            r#"{"type": "pie", "data": {"labels": ["a"], "values": ["x"]}}"#,
        ];
        for raw in rejected {
            let value: Value = serde_json::from_str(raw).unwrap();
            assert!(validate_shape(&value).is_none(), "accepted {}", raw);
        }
    }

    #[test]
    fn test_shape_validator_coerces_loose_fields() {
        let value: Value = serde_json::from_str(
            r#"{"type": "bar", "title": 7, "colors": "red", "data": {"labels": [2023, 2024], "values": [1200, "950.5"]}}"#,
        )
        .unwrap();
        let viz = validate_shape(&value).unwrap();
        assert_eq!(viz.data.labels, vec!["2023", "2024"]);
        assert_eq!(viz.data.values, vec![1200.0, 950.5]);
        assert!(viz.title.is_none());
        assert!(viz.colors.is_none());
    }

    #[test]
    fn test_numeric_labels_chart_is_extracted_and_removed() {
        let text = "Yearly totals:\n```json\n{\"visualization\": {\"type\": \"bar\", \"data\": {\"labels\": [2023, 2024], \"values\": [1200, 1500]}}}\n```";
        let result = extract(text);
        let viz = result.visualization.unwrap();
        assert_eq!(viz.data.labels, vec!["2023", "2024"]);
        assert_eq!(result.cleaned_text, "Yearly totals:");
    }

    #[test]
    fn test_fenced_action_with_boolean_query_param() {
        let text = "Recurring ones:\n```json\n{\"action\": {\"path\": \"/transactions\", \"queryParams\": {\"recurring\": true, \"limit\": 5}}}\n```";
        let result = extract(text);
        let params = result.action.unwrap().query_params.unwrap();
        assert_eq!(params["recurring"], QueryValue::Text("true".to_string()));
        assert_eq!(params["limit"], QueryValue::Number(5.0));
        assert_eq!(result.cleaned_text, "Recurring ones:");
    }

    #[test]
    fn test_unequal_series_lengths_are_accepted() {
        let value: Value = serde_json::from_str(
            r#"{"type": "line", "data": {"labels": ["a", "b", "c"], "values": [1]}}"#,
        )
        .unwrap();
        assert!(validate_shape(&value).is_some());
    }

    #[test]
    fn test_malformed_visualization_leaves_text_alone() {
        let text = "  Chart:\n```json\n{\"visualization\": {\"type\": \"pie\", \"data\": {\"labels\": [], \"values\": []}}}\n```  ";
        let result = extract(text);
        assert!(result.visualization.is_none());
        assert_eq!(result.cleaned_text, text.trim());
    }

    #[test]
    fn test_action_and_visualization_in_one_block() {
        let text = "Overview:\n```json\n{\"action\": {\"path\": \"/dashboard\"}, \"visualization\": {\"type\": \"pie\", \"data\": {\"labels\": [\"a\"], \"values\": [1]}}}\n```\nDone.";
        let result = extract(text);
        assert!(result.action.is_some());
        assert!(result.visualization.is_some());
        assert_eq!(result.cleaned_text, "Overview:\n\nDone.");
    }

    // ---- Cleanup ----

    #[test]
    fn test_no_match_returns_trimmed_input() {
        let result = extract("\n  You spent $120 on groceries.\n\n\n\nNice.  ");
        assert!(result.action.is_none());
        assert!(result.visualization.is_none());
        assert_eq!(result.cleaned_text, "You spent $120 on groceries.\n\n\n\nNice.");
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let inputs = ["a\n\n\n\nb", "\n\n\nx\n\n\n", "plain", "", "a\n\n b\n\n\n\n\nc  "];
        for input in inputs {
            let once = cleanup(input);
            assert_eq!(cleanup(&once), once);
        }
        assert_eq!(cleanup("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_remove_spans_merges_overlaps() {
        assert_eq!(remove_spans("abcdefgh", vec![4..6, 1..3, 2..5]), "agh");
    }

    #[test]
    fn test_balanced_object_end() {
        assert_eq!(balanced_object_end(r#"x{"a":{"b":1}}y"#, 1), Some(14));
        assert_eq!(balanced_object_end(r#"{"a":"}"}"#, 0), Some(9));
        assert_eq!(balanced_object_end(r#"{"a":1"#, 0), None);
        assert_eq!(balanced_object_end("abc", 0), None);
    }
}
