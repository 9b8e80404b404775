//! Runs one full pipeline cycle (C7) against a real queue and write
//! path: repeated tool failures in the queue should surface as a stored
//! insight and the batch should be consumed off the queue afterward.

use spark_core::model::{Event, EventKind};
use spark_core::{CognitiveStore, EventQueue, QueueLimits, SemanticIndex, Telemetry, ValidateAndStore};

#[test]
fn repeated_tool_failures_become_a_stored_insight() {
    let dir = tempfile::tempdir().unwrap();
    let queue = EventQueue::open(dir.path().join("queue"), QueueLimits::default()).unwrap();
    for _ in 0..3 {
        let event = Event::new(EventKind::PostToolFailure, "s1", 0, serde_json::json!({}))
            .with_tool("Bash", serde_json::json!({}))
            .with_error("permission denied");
        queue.capture(&event).unwrap();
    }

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

    let report = spark_pipeline::run_cycle(&queue, &vas, 100, 0.0, 0).unwrap();
    assert_eq!(report.events_read, 3);
    assert!(report.derived_learnings > 0);
    assert!(store.len() > 0, "repeated failures should derive at least one insight");

    let remaining = queue.read(100, 0).unwrap();
    assert!(remaining.is_empty(), "consumed batch should not be re-read");
}
