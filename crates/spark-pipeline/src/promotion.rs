//! Promotion (C10): selects insights durable enough to graduate from the
//! cognitive store into an external collaborator's long-lived memory
//! document, and demotes ones that have decayed below the bar.
//!
//! Grounded in `original_source/lib/config_authority.py`'s
//! `promotion.*` tuneables and the teacher's budget-capped selection
//! pattern in `crates/pagi-core/src/skills.rs`.

use spark_core::{CognitiveStore, Insight, StoreError, Tuneables};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// One insight approved for promotion, carrying the text an external
/// writer should append verbatim.
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub key: String,
    pub adapter: String,
    pub text: String,
    pub reliability: f64,
}

fn adapter_for(insight: &Insight) -> String {
    format!("{:?}", insight.action_domain).to_lowercase()
}

/// Scans the store for insights clearing every promotion threshold,
/// already promoted ones excluded, capped per adapter by
/// `promotion.per_adapter_budget` (highest reliability wins ties).
pub fn select_candidates(store: &CognitiveStore, tuneables: &Tuneables, now: i64) -> Vec<PromotionCandidate> {
    let reliability_min = tuneables.get_f64("promotion", "reliability_min");
    let validations_min = tuneables.get_i64("promotion", "validations_min");
    let confidence_min = tuneables.get_f64("promotion", "confidence_min");
    let min_age_secs = tuneables.get_i64("promotion", "min_age_secs");
    let per_adapter_budget = tuneables.get_i64("promotion", "per_adapter_budget").max(0) as usize;

    let mut by_adapter: HashMap<String, Vec<PromotionCandidate>> = HashMap::new();

    for key in store.keys() {
        let Some(insight) = store.get(&key) else { continue };
        if insight.promoted {
            continue;
        }
        let age = now - insight.created_at;
        if age < min_age_secs {
            continue;
        }
        if insight.times_validated < validations_min as u32 {
            continue;
        }
        if insight.confidence < confidence_min {
            continue;
        }
        let reliability = insight.effective_reliability(now);
        if reliability < reliability_min {
            continue;
        }

        let adapter = adapter_for(&insight);
        by_adapter.entry(adapter.clone()).or_default().push(PromotionCandidate {
            key: key.clone(),
            adapter,
            text: insight.text.clone(),
            reliability,
        });
    }

    let mut out = Vec::new();
    for candidates in by_adapter.values_mut() {
        candidates.sort_by(|a, b| b.reliability.partial_cmp(&a.reliability).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(per_adapter_budget);
        out.extend(candidates.drain(..));
    }
    out
}

/// Insights whose effective reliability has fallen below half the
/// promotion bar since being promoted — candidates for demotion from the
/// external document.
pub fn select_demotions(store: &CognitiveStore, tuneables: &Tuneables, now: i64) -> Vec<String> {
    let reliability_min = tuneables.get_f64("promotion", "reliability_min");
    let demotion_floor = reliability_min * 0.5;

    store
        .keys()
        .into_iter()
        .filter_map(|key| store.get(&key).map(|i| (key, i)))
        .filter(|(_, insight)| insight.promoted && insight.effective_reliability(now) < demotion_floor)
        .map(|(key, _)| key)
        .collect()
}

/// Renders promotion candidates as markdown bullet lines ready to append
/// to an external collaborator's durable memory document, grouped by
/// adapter with a heading per group.
pub fn render_markdown(candidates: &[PromotionCandidate]) -> String {
    let mut by_adapter: HashMap<&str, Vec<&PromotionCandidate>> = HashMap::new();
    for candidate in candidates {
        by_adapter.entry(candidate.adapter.as_str()).or_default().push(candidate);
    }

    let mut adapters: Vec<&str> = by_adapter.keys().copied().collect();
    adapters.sort();

    let mut out = String::new();
    for adapter in adapters {
        out.push_str(&format!("## {adapter}\n"));
        for candidate in &by_adapter[adapter] {
            out.push_str(&format!("- {}\n", candidate.text));
        }
        out.push('\n');
    }
    out
}

/// Runs one promotion pass: selects candidates, appends their rendered
/// markdown to the external collaborator's doc, and marks each promoted
/// in the store so it isn't re-selected. Returns how many were promoted.
pub fn execute_promotions(
    store: &CognitiveStore,
    tuneables: &Tuneables,
    doc_path: &Path,
    now: i64,
) -> Result<usize, StoreError> {
    let candidates = select_candidates(store, tuneables, now);
    if candidates.is_empty() {
        return Ok(0);
    }
    append_to_doc(doc_path, &render_markdown(&candidates))?;
    for candidate in &candidates {
        store.set_promoted(&candidate.key, Some(&candidate.adapter))?;
    }
    Ok(candidates.len())
}

/// Demotes every insight `select_demotions` flags: cleared from the
/// store's `promoted` bookkeeping so it can clear the bar again later.
/// Does not touch the external doc itself, since removing a line from a
/// human-curated document is not this collaborator's call to make.
pub fn execute_demotions(store: &CognitiveStore, tuneables: &Tuneables, now: i64) -> Result<usize, StoreError> {
    let demoted = select_demotions(store, tuneables, now);
    for key in &demoted {
        store.set_promoted(key, None)?;
    }
    Ok(demoted.len())
}

fn append_to_doc(path: &Path, body: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(body.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_core::{ActionDomain, Category, Insight};
    use tempfile::tempdir;

    #[test]
    fn select_candidates_respects_thresholds_and_budget() {
        let dir = tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();

        for i in 0..3 {
            let mut candidate = Insight::new(
                Category::Wisdom,
                format!("rule about linting number {i}"),
                "ctx",
                "test",
                ActionDomain::System,
                0,
            );
            candidate.confidence = 0.9;
            candidate.times_validated = 5;
            candidate.times_contradicted = 0;
            store.add_insight(candidate, "test").unwrap();
        }

        let tuneables = Tuneables::default();
        let now = 10_000_000;
        let candidates = select_candidates(&store, &tuneables, now);
        let budget = tuneables.get_i64("promotion", "per_adapter_budget").max(0) as usize;
        assert!(candidates.len() <= budget);
    }

    #[test]
    fn execute_promotions_marks_store_and_writes_doc() {
        let dir = tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let mut candidate = Insight::new(Category::Wisdom, "keep commits small and focused", "ctx", "test", ActionDomain::System, 0);
        candidate.confidence = 0.95;
        candidate.times_validated = 5;
        let key = candidate.key.clone();
        store.add_insight(candidate, "test").unwrap();

        let tuneables = Tuneables::default();
        let doc_path = dir.path().join("promoted.md");
        let now = 8_000;
        let count = execute_promotions(&store, &tuneables, &doc_path, now).unwrap();
        assert_eq!(count, 1);
        assert!(store.get(&key).unwrap().promoted);
        assert!(std::fs::read_to_string(&doc_path).unwrap().contains("keep commits small"));
    }

    #[test]
    fn execute_demotions_clears_promoted_flag() {
        let dir = tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let mut insight = Insight::new(Category::Wisdom, "promoted but now stale", "ctx", "test", ActionDomain::System, 0);
        insight.promoted = true;
        insight.confidence = 0.01;
        let key = insight.key.clone();
        store.add_insight(insight, "test").unwrap();
        store.set_promoted(&key, Some("system")).unwrap();

        let tuneables = Tuneables::default();
        let count = execute_demotions(&store, &tuneables, 0).unwrap();
        assert_eq!(count, 1);
        assert!(!store.get(&key).unwrap().promoted);
    }
}
