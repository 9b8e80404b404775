//! Pipeline engine (C7): the repeating cycle that drains the event
//! queue, extracts deep learnings, and routes them through
//! validate-and-store. Grounded in `add-ons/pagi-daemon/src/main.rs`'s
//! tick loop shape (a fallible `tick` logged-not-propagated on error,
//! adaptive interval) generalized from "poll agent inboxes" to "drain
//! the queue in adaptive batches."

use spark_core::model::{ActionDomain, Category, Event, EventKind, Priority};
use spark_core::validate::ValidateAndStore;
use spark_core::EventQueue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueHealth {
    Healthy,
    Elevated,
    Critical,
    Emergency,
}

impl QueueHealth {
    pub fn classify(depth: u64) -> Self {
        if depth < 200 {
            QueueHealth::Healthy
        } else if depth < 500 {
            QueueHealth::Elevated
        } else if depth < 2000 {
            QueueHealth::Critical
        } else {
            QueueHealth::Emergency
        }
    }
}

/// `batch_size` scales with queue health and gets a bonus when the
/// previous cycle processed events quickly, clamped to `[50, 1000]`.
pub fn adaptive_batch_size(health: QueueHealth, base: usize, last_cycle_events_per_sec: f64) -> usize {
    let scaled = match health {
        QueueHealth::Healthy => base,
        QueueHealth::Elevated => base * 2,
        QueueHealth::Critical => base * 4,
        QueueHealth::Emergency => base * 8,
    };
    let bonus = if last_cycle_events_per_sec > 500.0 {
        (scaled as f64 * 1.5) as usize
    } else {
        scaled
    };
    bonus.clamp(50, 1000)
}

/// Seconds until the next cycle: faster under load, backing off up to
/// `2*base` (capped at 120s) when the last read returned nothing.
pub fn next_interval_secs(health: QueueHealth, base: u64, last_read_was_empty: bool) -> u64 {
    match health {
        QueueHealth::Emergency => 5,
        QueueHealth::Critical => 10,
        QueueHealth::Elevated => 15,
        QueueHealth::Healthy if last_read_was_empty => (2 * base).min(120),
        QueueHealth::Healthy => base,
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub queue_depth_before: u64,
    pub batch_size: usize,
    pub events_read: usize,
    pub priority_breakdown: PriorityBreakdown,
    pub derived_learnings: usize,
    pub consumed: bool,
    pub duration_ms: u64,
}

/// A learning derived from a batch of events, not yet validated/stored.
#[derive(Debug, Clone)]
pub struct DerivedLearning {
    pub category: Category,
    pub text: String,
    pub context: String,
}

/// Sorts `High -> Medium -> Low` so important events survive a partial
/// cycle, then tallies the breakdown for the cycle report.
fn sort_and_count(events: &mut Vec<Event>) -> PriorityBreakdown {
    spark_core::queue::sort_by_priority(events);
    let mut breakdown = PriorityBreakdown::default();
    for e in events.iter() {
        match e.priority() {
            Priority::High => breakdown.high += 1,
            Priority::Medium => breakdown.medium += 1,
            Priority::Low => breakdown.low += 1,
        }
    }
    breakdown
}

/// Per-tool success/failure counts plus the top-3 error messages and any
/// same-tool fail-then-succeed recovery within one session.
fn tool_effectiveness(events: &[Event]) -> Vec<DerivedLearning> {
    let mut failures: HashMap<String, Vec<String>> = HashMap::new();
    let mut recoveries: HashMap<(String, String), bool> = HashMap::new();
    let mut last_failure_per_session: HashMap<(String, String), bool> = HashMap::new();

    for event in events {
        let Some(tool) = &event.tool_name else { continue };
        match event.kind {
            EventKind::PostToolFailure => {
                let msg = event.error.clone().unwrap_or_default();
                failures.entry(tool.clone()).or_default().push(msg);
                last_failure_per_session.insert((event.session_id.clone(), tool.clone()), true);
            }
            EventKind::PostTool => {
                let key = (event.session_id.clone(), tool.clone());
                if last_failure_per_session.remove(&key).unwrap_or(false) {
                    recoveries.insert(key, true);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for (tool, msgs) in &failures {
        if msgs.len() < 2 {
            continue;
        }
        let top: Vec<&str> = msgs.iter().take(3).map(|s| s.as_str()).collect();
        out.push(DerivedLearning {
            category: Category::Reasoning,
            text: format!("{tool} fails repeatedly ({} occurrences); common errors: {}", msgs.len(), top.join("; ")),
            context: format!("tool_effectiveness:{tool}"),
        });
    }
    if !recoveries.is_empty() {
        out.push(DerivedLearning {
            category: Category::SelfAwareness,
            text: format!("recovered from {} tool failures by retrying within the same session", recoveries.len()),
            context: "tool_effectiveness:recovery".to_string(),
        });
    }
    out
}

/// Groups failures by `(tool, error prefix)`, emitting an aggregated
/// insight for any group with >= 2 occurrences. Never per-occurrence.
fn error_patterns(events: &[Event]) -> Vec<DerivedLearning> {
    let mut groups: HashMap<(String, String), usize> = HashMap::new();
    for event in events {
        if event.kind != EventKind::PostToolFailure {
            continue;
        }
        let tool = event.tool_name.clone().unwrap_or_else(|| "unknown".to_string());
        let err: String = event.error.clone().unwrap_or_default().chars().take(100).collect();
        *groups.entry((tool, err)).or_insert(0) += 1;
    }
    groups
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|((tool, err), count)| DerivedLearning {
            category: Category::Reasoning,
            text: format!("{tool} repeatedly fails with: {err} ({count} occurrences)"),
            context: format!("error_pattern:{tool}"),
        })
        .collect()
}

/// Per-session tool streams: flags 3+ consecutive failures and counts
/// edit-not-preceded-by-read (a risky-edit pattern). Emits aggregated
/// insights only, since per-occurrence noise is explicitly disallowed.
fn session_workflows(events: &[Event]) -> Vec<DerivedLearning> {
    let mut by_session: HashMap<String, Vec<&Event>> = HashMap::new();
    for event in events {
        by_session.entry(event.session_id.clone()).or_default().push(event);
    }

    let mut consecutive_failure_sessions = 0usize;
    let mut risky_edits = 0usize;

    for stream in by_session.values() {
        let mut run = 0usize;
        let mut read_files: std::collections::HashSet<String> = std::collections::HashSet::new();
        for event in stream.iter() {
            match event.kind {
                EventKind::PostToolFailure => {
                    run += 1;
                    if run == 3 {
                        consecutive_failure_sessions += 1;
                    }
                }
                EventKind::PostTool => {
                    run = 0;
                    if event.tool_name.as_deref() == Some("Read") {
                        if let Some(path) = event.tool_input.as_ref().and_then(|v| v.get("file_path")).and_then(|v| v.as_str()) {
                            read_files.insert(path.to_string());
                        }
                    }
                    if event.tool_name.as_deref() == Some("Edit") {
                        let path = event.tool_input.as_ref().and_then(|v| v.get("file_path")).and_then(|v| v.as_str());
                        if let Some(path) = path {
                            if !read_files.contains(path) {
                                risky_edits += 1;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut out = Vec::new();
    if consecutive_failure_sessions > 0 {
        out.push(DerivedLearning {
            category: Category::MetaLearning,
            text: format!("{consecutive_failure_sessions} session(s) hit 3+ consecutive tool failures"),
            context: "session_workflow:consecutive_failures".to_string(),
        });
    }
    if risky_edits > 0 {
        out.push(DerivedLearning {
            category: Category::MetaLearning,
            text: format!("{risky_edits} edit(s) made without first reading the target file"),
            context: "session_workflow:risky_edit".to_string(),
        });
    }
    out
}

/// Runs one pipeline cycle: snapshot depth, read an adaptively-sized
/// batch, sort by priority, extract deep learnings, route them through
/// validate-and-store, scan for hard-trigger memory captures, and
/// consume the batch only if extraction succeeded (extraction here is
/// infallible, so this always consumes — kept as a named step so a
/// future fallible collaborator plugs in here without changing the
/// cycle's shape).
pub fn run_cycle(
    queue: &EventQueue,
    vas: &ValidateAndStore,
    health_base_batch: usize,
    last_cycle_events_per_sec: f64,
    now: i64,
) -> Result<CycleReport, spark_core::QueueError> {
    let start = std::time::Instant::now();
    let queue_depth_before = queue.tail(100_000).map(|v| v.len() as u64).unwrap_or(0);
    let health = QueueHealth::classify(queue_depth_before);
    let batch_size = adaptive_batch_size(health, health_base_batch, last_cycle_events_per_sec);

    let mut events = queue.read(batch_size, 0)?;
    let events_read = events.len();
    let priority_breakdown = sort_and_count(&mut events);

    let mut derived = Vec::new();
    derived.extend(tool_effectiveness(&events));
    derived.extend(error_patterns(&events));
    derived.extend(session_workflows(&events));

    for learning in &derived {
        vas.validate_and_store(&learning.text, "pipeline", learning.category, &learning.context, ActionDomain::System, now);
    }
    let captured = crate::capture::capture_hard_triggers(&events, vas, now);

    let consumed = events_read > 0;
    if consumed {
        queue.consume(events_read)?;
    }

    Ok(CycleReport {
        queue_depth_before,
        batch_size,
        events_read,
        priority_breakdown,
        derived_learnings: derived.len() + captured,
        consumed,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_scales_with_health_and_clamps() {
        assert_eq!(adaptive_batch_size(QueueHealth::Healthy, 100, 0.0), 100);
        assert_eq!(adaptive_batch_size(QueueHealth::Emergency, 100, 0.0), 800);
        assert_eq!(adaptive_batch_size(QueueHealth::Emergency, 200, 1000.0), 1000);
        assert_eq!(adaptive_batch_size(QueueHealth::Healthy, 10, 0.0), 50);
    }

    #[test]
    fn interval_backs_off_when_empty_and_healthy() {
        assert_eq!(next_interval_secs(QueueHealth::Healthy, 15, true), 30);
        assert_eq!(next_interval_secs(QueueHealth::Healthy, 100, true), 120);
        assert_eq!(next_interval_secs(QueueHealth::Emergency, 15, false), 5);
    }

    #[test]
    fn error_patterns_require_two_occurrences() {
        let mut events = Vec::new();
        for _ in 0..2 {
            events.push(
                Event::new(EventKind::PostToolFailure, "s1", 0, serde_json::json!({}))
                    .with_tool("Bash", serde_json::json!({}))
                    .with_error("command not found"),
            );
        }
        let learnings = error_patterns(&events);
        assert_eq!(learnings.len(), 1);
    }

    #[test]
    fn single_failure_does_not_emit_error_pattern() {
        let events = vec![Event::new(EventKind::PostToolFailure, "s1", 0, serde_json::json!({}))
            .with_tool("Bash", serde_json::json!({}))
            .with_error("timeout")];
        assert!(error_patterns(&events).is_empty());
    }
}
