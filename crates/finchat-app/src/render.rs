//! Plain-text rendering of conversation messages for the terminal.

use chrono::Local;
use uuid::Uuid;

use finchat_core::types::{Action, Message, Visualization};

/// Messages after `last_seen`. Everything when `last_seen` is absent or no
/// longer in the history, as after a clear.
pub fn unseen(snapshot: &[Message], last_seen: Option<Uuid>) -> &[Message] {
    let start = last_seen
        .and_then(|id| snapshot.iter().position(|m| m.id == id))
        .map_or(0, |i| i + 1);
    &snapshot[start..]
}

pub fn format_message(message: &Message) -> String {
    let who = if message.is_user { "you" } else { "assistant" };
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");

    let mut out = format!("[{}] {}> {}", time, who, message.text);
    if let Some(action) = &message.action {
        out.push_str("\n    ");
        out.push_str(&format_action(action));
    }
    if let Some(viz) = &message.visualization {
        out.push_str("\n    ");
        out.push_str(&format_visualization(viz));
    }
    out
}

fn format_action(action: &Action) -> String {
    let mut target = action
        .path
        .clone()
        .or_else(|| action.element_id.as_ref().map(|id| format!("#{}", id)))
        .unwrap_or_default();

    if let Some(params) = &action.query_params {
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        target.push('?');
        target.push_str(&query.join("&"));
    }

    format!("({}) {} -> {} {}", action.icon, action.label, action.kind, target)
        .trim_end()
        .to_string()
}

fn format_visualization(viz: &Visualization) -> String {
    let points: Vec<String> = viz
        .data
        .labels
        .iter()
        .zip(&viz.data.values)
        .map(|(label, value)| format!("{}: {}", label, value))
        .collect();

    match &viz.title {
        Some(title) => format!("[{} chart] {}: {}", viz.kind, title, points.join(", ")),
        None => format!("[{} chart] {}", viz.kind, points.join(", ")),
    }
}
