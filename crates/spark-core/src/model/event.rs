//! `Event`: an immutable observation of agent behavior, appended to the
//! queue (C1) by ingest and consumed by the pipeline (C7). Never mutated
//! after creation, following the teacher's `EventRecord` in
//! `knowledge/store.rs` — a builder for optional fields, no setters.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserPrompt,
    PreTool,
    PostTool,
    PostToolFailure,
    SessionStart,
    SessionEnd,
    Stop,
    Learning,
    Error,
}

/// Coarse scheduling priority the pipeline (C7) sorts events by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

const MUTATING_TOOLS: &[&str] = &["Edit", "Write", "Bash", "NotebookEdit"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub session_id: String,
    pub timestamp: i64,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Builds an event, deriving `trace_id` from `(session, kind, ts, tool,
    /// payload-hint)` when not supplied by the caller.
    pub fn new(
        kind: EventKind,
        session_id: impl Into<String>,
        timestamp: i64,
        payload: serde_json::Value,
    ) -> Self {
        let session_id = session_id.into();
        let id = content_hash(&session_id, kind, timestamp, &payload);
        let trace_id = derive_trace_id(&session_id, kind, timestamp, None, &payload);
        Self {
            id,
            kind,
            session_id,
            timestamp,
            trace_id,
            tool_name: None,
            tool_input: None,
            payload,
            error: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: serde_json::Value) -> Self {
        let name = name.into();
        self.trace_id = derive_trace_id(
            &self.session_id,
            self.kind,
            self.timestamp,
            Some(&name),
            &self.payload,
        );
        self.tool_name = Some(name);
        self.tool_input = Some(input);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Pure classification used by the pipeline (C7) to process
    /// high-value events first under partial cycles.
    pub fn priority(&self) -> Priority {
        use EventKind::*;
        match self.kind {
            UserPrompt | PostToolFailure | SessionStart | SessionEnd | Stop | Error | Learning => {
                Priority::High
            }
            PostTool => {
                let mutating = self
                    .tool_name
                    .as_deref()
                    .map(|t| MUTATING_TOOLS.contains(&t))
                    .unwrap_or(false);
                if mutating {
                    Priority::Medium
                } else {
                    Priority::Low
                }
            }
            PreTool => Priority::Low,
        }
    }
}

fn content_hash(
    session_id: &str,
    kind: EventKind,
    timestamp: i64,
    payload: &serde_json::Value,
) -> String {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    format!("{kind:?}").hash(&mut hasher);
    timestamp.hash(&mut hasher);
    payload.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn derive_trace_id(
    session_id: &str,
    kind: EventKind,
    timestamp: i64,
    tool: Option<&str>,
    payload: &serde_json::Value,
) -> String {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    format!("{kind:?}").hash(&mut hasher);
    timestamp.hash(&mut hasher);
    tool.unwrap_or("").hash(&mut hasher);
    // payload-hint: first 64 bytes keeps large payloads from dominating the hash cost.
    let hint: String = payload.to_string().chars().take(64).collect();
    hint.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_is_high_priority() {
        let e = Event::new(EventKind::UserPrompt, "s1", 100, serde_json::json!({}));
        assert_eq!(e.priority(), Priority::High);
    }

    #[test]
    fn post_tool_mutating_is_medium() {
        let e = Event::new(EventKind::PostTool, "s1", 100, serde_json::json!({}))
            .with_tool("Edit", serde_json::json!({}));
        assert_eq!(e.priority(), Priority::Medium);
    }

    #[test]
    fn post_tool_read_only_is_low() {
        let e = Event::new(EventKind::PostTool, "s1", 100, serde_json::json!({}))
            .with_tool("Read", serde_json::json!({}));
        assert_eq!(e.priority(), Priority::Low);
    }

    #[test]
    fn trace_id_is_stable_for_identical_inputs() {
        let a = Event::new(EventKind::Learning, "s1", 42, serde_json::json!({"a": 1}));
        let b = Event::new(EventKind::Learning, "s1", 42, serde_json::json!({"a": 1}));
        assert_eq!(a.trace_id, b.trace_id);
    }
}
