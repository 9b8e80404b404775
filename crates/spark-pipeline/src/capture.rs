//! Hard-trigger memory capture: turns an explicit "remember this"-style
//! user statement into a durable insight without waiting on the normal
//! tool/error/workflow extraction path. Grounded in
//! `original_source/lib/memory_capture.py`'s `HARD_TRIGGERS` table and
//! `infer_category` heuristic; the soft-trigger and semantic-signal
//! scoring (causal/quantitative/comparative/technical language) that
//! feeds the original's pending-suggestion queue isn't ported — only
//! the hard-trigger auto-save path is in scope here.

use spark_core::model::{ActionDomain, Category, Event, EventKind};
use spark_core::validate::ValidateAndStore;

/// Hard-trigger phrase -> importance weight, ported from
/// `memory_capture.py::HARD_TRIGGERS`.
const HARD_TRIGGERS: &[(&str, f64)] = &[
    ("remember this", 1.0),
    ("don't forget", 0.95),
    ("dont forget", 0.95),
    ("note this", 0.9),
    ("save this", 0.9),
    ("lock this in", 0.95),
    ("non-negotiable", 0.95),
    ("hard rule", 0.95),
    ("hard boundary", 0.95),
    ("from now on", 0.85),
    ("always", 0.65),
    ("never", 0.65),
];

/// Score at/above which a hard trigger auto-saves. Matches
/// `memory_capture.py`'s `AUTO_SAVE_THRESHOLD`.
pub const AUTO_SAVE_THRESHOLD: f64 = 0.7;

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Strongest matching hard-trigger phrase and its weight, if any.
fn strongest_trigger(text: &str) -> Option<(&'static str, f64)> {
    let normalized = normalize(text);
    HARD_TRIGGERS
        .iter()
        .filter(|(phrase, _)| normalized.contains(phrase))
        .copied()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

/// Strips the matched trigger phrase (and any separating colon) so the
/// stored insight reads as the directive itself rather than the
/// preamble, e.g. `"Remember this: always use bcrypt"` -> `"always use
/// bcrypt"`.
fn strip_trigger_prefix(text: &str, phrase: &str) -> String {
    let lower = text.to_lowercase();
    let Some(idx) = lower.find(phrase) else { return text.trim().to_string() };
    let rest = &text[idx + phrase.len()..];
    rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace()).trim().to_string()
}

/// Ported from `memory_capture.py::infer_category`.
fn infer_category(text: &str) -> Category {
    let t = normalize(text);
    if ["security", "boundary", "non-negotiable", "hard rule"].iter().any(|k| t.contains(k)) {
        Category::MetaLearning
    } else if ["prefer", "hate", "don't like", "dont like", "love"].iter().any(|k| t.contains(k)) {
        Category::UserUnderstanding
    } else if ["tone", "be direct", "no sugarcoating", "explain"].iter().any(|k| t.contains(k)) {
        Category::Communication
    } else if ["principle", "philosophy", "rule", "design constraint", "architecture", "compatibility", "adaptability"]
        .iter()
        .any(|k| t.contains(k))
    {
        Category::Wisdom
    } else {
        Category::MetaLearning
    }
}

/// Scans `UserPrompt` events for hard-trigger phrases and writes any
/// that clear `AUTO_SAVE_THRESHOLD` straight into the store via
/// `ValidateAndStore::capture_memory`. Returns the number captured or
/// reinforced.
pub fn capture_hard_triggers(events: &[Event], vas: &ValidateAndStore, now: i64) -> usize {
    let mut captured = 0;
    for event in events {
        if event.kind != EventKind::UserPrompt {
            continue;
        }
        let Some(text) = event.payload.get("text").and_then(|v| v.as_str()) else { continue };
        let Some((phrase, score)) = strongest_trigger(text) else { continue };
        if score < AUTO_SAVE_THRESHOLD {
            continue;
        }
        let body = strip_trigger_prefix(text, phrase);
        if body.is_empty() {
            continue;
        }
        let category = infer_category(&body);
        if vas.capture_memory(&body, category, "memory_capture", ActionDomain::General, now) {
            captured += 1;
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_core::model::Category;
    use spark_core::{CognitiveStore, SemanticIndex, Telemetry};

    #[test]
    fn strongest_trigger_prefers_higher_weight_match() {
        assert_eq!(strongest_trigger("Remember this: ship fast"), Some(("remember this", 1.0)));
        assert_eq!(strongest_trigger("just a normal sentence"), None);
    }

    #[test]
    fn strip_trigger_prefix_drops_phrase_and_colon() {
        assert_eq!(
            strip_trigger_prefix("Remember this: always use bcrypt for password hashing", "remember this"),
            "always use bcrypt for password hashing"
        );
    }

    #[test]
    fn infer_category_reads_keyword_buckets() {
        assert_eq!(infer_category("always use bcrypt for password hashing"), Category::MetaLearning);
        assert_eq!(infer_category("I prefer dark mode everywhere"), Category::UserUnderstanding);
        assert_eq!(infer_category("be direct, no sugarcoating"), Category::Communication);
    }

    #[test]
    fn hard_trigger_capture_scenario_stores_metalearning_insight() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let index = SemanticIndex::open_in_memory().unwrap();
        let telemetry = Telemetry::open(dir.path().join("telemetry.json"));
        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: dir.path().join("quarantine.jsonl"),
            contradictions_path: dir.path().join("contradictions.jsonl"),
            advisory: None,
            feature_gate_enabled: true,
        };

        let events = vec![Event::new(
            EventKind::UserPrompt,
            "s1",
            0,
            serde_json::json!({"text": "Remember this: always use bcrypt for password hashing"}),
        )];
        let captured = capture_hard_triggers(&events, &vas, 0);
        assert_eq!(captured, 1);
        assert_eq!(store.len(), 1);

        let key = spark_core::model::Insight::key_for(Category::MetaLearning, "always use bcrypt for password hashing");
        let insight = store.get(&key).unwrap();
        assert_eq!(insight.source, "memory_capture");
        assert!(insight.text.starts_with("always use bcrypt"));
        assert!(insight.confidence >= 0.7);

        let events_again = vec![Event::new(
            EventKind::UserPrompt,
            "s1",
            1,
            serde_json::json!({"text": "Remember this: always use bcrypt for password hashing"}),
        )];
        capture_hard_triggers(&events_again, &vas, 10);
        let insight = store.get(&key).unwrap();
        assert_eq!(insight.times_validated, 1);
        assert!((insight.confidence - 0.775).abs() < 1e-9);
    }
}
