//! Exercises the C6 write path end to end against real on-disk files:
//! a stored insight lands in the cognitive store, is queryable from the
//! semantic index, and a later contradicting statement decays it while
//! appending to the contradictions log.

use spark_core::model::{ActionDomain, Category};
use spark_core::{CognitiveStore, SemanticIndex, Telemetry, ValidateAndStore};

fn open_all(dir: &std::path::Path) -> (CognitiveStore, SemanticIndex, Telemetry) {
    let store = CognitiveStore::open(dir.join("store.json")).unwrap();
    let index = SemanticIndex::open_in_memory().unwrap();
    let telemetry = Telemetry::open(dir.join("telemetry.json"));
    (store, index, telemetry)
}

#[test]
fn stored_insight_is_retrievable_and_later_contradicted() {
    let dir = tempfile::tempdir().unwrap();
    let (store, index, telemetry) = open_all(dir.path());
    let vas = ValidateAndStore {
        store: &store,
        index: &index,
        telemetry: &telemetry,
        quarantine_path: dir.path().join("quarantine.jsonl"),
        contradictions_path: dir.path().join("contradictions.jsonl"),
        advisory: None,
        feature_gate_enabled: true,
    };

    let stored = vas.validate_and_store(
        "Always run cargo fmt before committing a change",
        "test",
        Category::Reasoning,
        "ctx",
        ActionDomain::System,
        0,
    );
    assert!(stored);
    assert_eq!(store.len(), 1);

    let key = store.keys().into_iter().next().unwrap();
    let before = store.effective_reliability(&key, 100).unwrap();

    let contradicted = vas.validate_and_store(
        "Never run cargo fmt before committing a change",
        "test",
        Category::Reasoning,
        "ctx",
        ActionDomain::System,
        100,
    );
    assert!(contradicted);

    let after = store.effective_reliability(&key, 200).unwrap();
    assert!(after < before, "contradicted insight should decay: {after} !< {before}");

    let recorded: Vec<spark_core::Contradiction> =
        spark_core::jsonl::read_recent(&dir.path().join("contradictions.jsonl"), 10);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].old_key, key);
}
