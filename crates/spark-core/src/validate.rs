//! Validate-and-Store (C6): the gate every derived learning passes
//! through on its way into the cognitive store. Grounded almost
//! verbatim in `original_source/lib/validate_and_store.py` — telemetry
//! counters flushed every N writes, quarantine-on-exception, a
//! feature-gate bypass for a direct-write rollback path. `capture_memory`
//! is the one deliberate exception: an explicit hard-trigger "remember
//! this" is a validated human directive, not a gate candidate, so it
//! skips straight to storage (`original_source/lib/memory_capture.py`).

use crate::contradiction;
use crate::gate::{self, AdvisoryQualityProvider};
use crate::index::{MemoryRecord, SemanticIndex};
use crate::model::{ActionDomain, Category, ContradictionType, Insight, RoastVerdict};
use crate::store::CognitiveStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TELEMETRY_FLUSH_EVERY: u64 = 20;
const CONTRADICTION_MIN_SIMILARITY: f64 = 0.3;
const NEAR_DUPLICATE_JACCARD: f64 = 0.8;
const NEAR_DUPLICATE_COSINE: f64 = 0.92;

/// Starting confidence for a freshly hard-trigger-captured memory.
/// Matches `memory_capture.py`'s `AUTO_SAVE_THRESHOLD` — a captured
/// memory starts exactly at the bar it cleared, then climbs via the
/// ordinary `boost_confidence` curve as it's reinforced.
const MEMORY_CAPTURE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ValidationCounters {
    pub attempts: u64,
    pub stored: u64,
    pub rejected_primitive: u64,
    pub rejected_duplicate: u64,
    pub quarantined: u64,
}

/// Accumulates write-path telemetry in memory and flushes it to disk
/// every `TELEMETRY_FLUSH_EVERY` attempts, matching the Python
/// original's "flush every N writes" counter file.
pub struct Telemetry {
    path: PathBuf,
    counters: std::sync::Mutex<ValidationCounters>,
    since_flush: AtomicU64,
}

impl Telemetry {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let counters = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { path, counters: std::sync::Mutex::new(counters), since_flush: AtomicU64::new(0) }
    }

    fn record(&self, f: impl FnOnce(&mut ValidationCounters)) {
        {
            let mut counters = self.counters.lock().unwrap();
            f(&mut counters);
        }
        if self.since_flush.fetch_add(1, Ordering::SeqCst) + 1 >= TELEMETRY_FLUSH_EVERY {
            self.since_flush.store(0, Ordering::SeqCst);
            let _ = self.flush();
        }
    }

    pub fn flush(&self) -> std::io::Result<()> {
        let counters = self.counters.lock().unwrap().clone();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&counters)?)
    }

    pub fn snapshot(&self) -> ValidationCounters {
        self.counters.lock().unwrap().clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QuarantineRecord {
    text: String,
    reason: String,
    source: String,
    stage: String,
    timestamp: i64,
}

pub struct ValidateAndStore<'a> {
    pub store: &'a CognitiveStore,
    pub index: &'a SemanticIndex,
    pub telemetry: &'a Telemetry,
    pub quarantine_path: PathBuf,
    pub contradictions_path: PathBuf,
    pub advisory: Option<&'a dyn AdvisoryQualityProvider>,
    /// When `false`, the gate/quarantine path is bypassed entirely and
    /// the candidate is written straight through C3 — the rollback
    /// switch the original keeps for emergencies.
    pub feature_gate_enabled: bool,
}

impl<'a> ValidateAndStore<'a> {
    /// The sanctioned write path. Returns `true` if the insight ended up
    /// stored (directly or after refinement), `false` if rejected or
    /// quarantined.
    pub fn validate_and_store(
        &self,
        text: &str,
        source: &str,
        category: Category,
        context: &str,
        action_domain: ActionDomain,
        now: i64,
    ) -> bool {
        self.telemetry.record(|c| c.attempts += 1);

        if !self.feature_gate_enabled {
            return self.store_direct(text, source, category, context, action_domain, now);
        }

        let verdict = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let store = self.store;
            let index = self.index;
            gate::roast(text, source, self.advisory, |candidate| {
                near_duplicate_exists(store, index, candidate)
            })
        }));

        let verdict = match verdict {
            Ok(v) => v,
            Err(_) => {
                self.quarantine(text, "gate panicked", source, "roast", now);
                self.telemetry.record(|c| c.quarantined += 1);
                return false;
            }
        };

        match &verdict {
            RoastVerdict::Primitive => {
                self.telemetry.record(|c| c.rejected_primitive += 1);
                return false;
            }
            RoastVerdict::Duplicate => {
                self.telemetry.record(|c| c.rejected_duplicate += 1);
                return false;
            }
            RoastVerdict::NeedsWork { .. } | RoastVerdict::Quality { .. } => {}
        }

        let final_text = verdict.refined_text().unwrap_or(text);
        self.store_direct(final_text, source, category, context, action_domain, now)
    }

    fn store_direct(
        &self,
        text: &str,
        source: &str,
        category: Category,
        context: &str,
        action_domain: ActionDomain,
        now: i64,
    ) -> bool {
        if !self.check_and_record_contradiction(text, now) {
            // `discard_new`: the old insight is kept, the new candidate is dropped.
            return false;
        }

        let insight = Insight::new(category, text, context, source, action_domain, now);
        let key = insight.key.clone();
        let content = insight.text.clone();
        match self.store.add_insight(insight, source) {
            Ok(Some(_exposure)) => {
                self.telemetry.record(|c| c.stored += 1);
                let record = MemoryRecord {
                    id: key,
                    content,
                    scope: "global".to_string(),
                    project_key: "default".to_string(),
                    category: format!("{category:?}"),
                    created_at: now,
                    source: source.to_string(),
                    meta: serde_json::json!({}),
                };
                if let Err(e) = self.index.index(&record) {
                    tracing::warn!(target: "spark::validate", error = %e, "failed to index stored insight");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.quarantine(text, &format!("storage failure: {e}"), source, "add_insight", now);
                false
            }
        }
    }

    /// Writes an explicit hard-trigger memory capture ("remember this: …")
    /// straight into the store, bypassing C5's roast/duplicate gate
    /// entirely — an explicit instruction to remember something is
    /// already a validated human directive, not a noise-rejection
    /// candidate. Re-capturing the exact same insight reinforces it via
    /// `apply_outcome(.., true, ..)` (incrementing `times_validated` and
    /// boosting confidence) rather than being treated as a duplicate.
    /// Returns `true` if the insight was stored or reinforced.
    pub fn capture_memory(
        &self,
        text: &str,
        category: Category,
        context: &str,
        action_domain: ActionDomain,
        now: i64,
    ) -> bool {
        self.telemetry.record(|c| c.attempts += 1);

        let existing_key = Insight::key_for(category, text);
        if self.store.get(&existing_key).is_some() {
            let stored = self.store.apply_outcome(&existing_key, true, Some(text)).is_ok();
            if stored {
                self.telemetry.record(|c| c.stored += 1);
            }
            return stored;
        }

        let mut insight = Insight::new(category, text, context, "memory_capture", action_domain, now);
        insight.confidence = MEMORY_CAPTURE_CONFIDENCE;
        let key = insight.key.clone();
        let content = insight.text.clone();
        match self.store.add_insight(insight, "memory_capture") {
            Ok(Some(_exposure)) => {
                self.telemetry.record(|c| c.stored += 1);
                let record = MemoryRecord {
                    id: key,
                    content,
                    scope: "global".to_string(),
                    project_key: "default".to_string(),
                    category: format!("{category:?}"),
                    created_at: now,
                    source: "memory_capture".to_string(),
                    meta: serde_json::json!({}),
                };
                if let Err(e) = self.index.index(&record) {
                    tracing::warn!(target: "spark::validate", error = %e, "failed to index captured memory");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.quarantine(text, &format!("storage failure: {e}"), "memory_capture", "capture_memory", now);
                false
            }
        }
    }

    fn quarantine(&self, text: &str, reason: &str, source: &str, stage: &str, timestamp: i64) {
        let record = QuarantineRecord {
            text: text.to_string(),
            reason: reason.to_string(),
            source: source.to_string(),
            stage: stage.to_string(),
            timestamp,
        };
        crate::jsonl::append_bounded(&self.quarantine_path, &record, 5_000);
    }

    /// Checks `text` against existing insights for a lexical contradiction
    /// before it's stored, persists any hit to the ring-bounded
    /// contradictions log, and dispatches one of the four resolution
    /// actions based on `classify()`'s output and the old insight's
    /// current standing:
    ///
    /// - `Direct` against an already highly-reliable old insight (`≥0.8`)
    ///   is treated as `discard_new` — a single contradicting statement
    ///   shouldn't unseat a well-validated insight.
    /// - `Direct`/`Temporal` otherwise resolve as `update`: the old
    ///   insight's validations are decremented via
    ///   `contradiction::apply_resolution` and it's decayed as a bad
    ///   outcome.
    /// - `Contextual` resolves as `context`: both insights are kept, the
    ///   old one decayed with a context-tagged evidence line rather than
    ///   a generic one.
    /// - `Uncertain` resolves as `keep_both`: logged for audit, neither
    ///   insight's counters are touched.
    ///
    /// Returns `false` only for `discard_new`, telling `store_direct` to
    /// drop the new candidate instead of storing it.
    fn check_and_record_contradiction(&self, text: &str, now: i64) -> bool {
        let keys = self.store.keys();
        let candidates: Vec<Insight> = keys.iter().filter_map(|k| self.store.get(k)).collect();
        let Some(mut found) = contradiction::check_contradiction(text, candidates.iter(), CONTRADICTION_MIN_SIMILARITY, now) else {
            return true;
        };

        let old_reliability = self.store.get(&found.old_key).map(|i| i.effective_reliability(now)).unwrap_or(0.0);
        let resolution = if found.contradiction_type == ContradictionType::Direct && old_reliability >= 0.8 {
            "discard_new"
        } else if matches!(found.contradiction_type, ContradictionType::Direct | ContradictionType::Temporal) {
            "update"
        } else if found.contradiction_type == ContradictionType::Contextual {
            "context"
        } else {
            "keep_both"
        };
        found.resolution_type = Some(resolution.to_string());

        tracing::info!(target: "spark::contradiction", old_key = %found.old_key, resolution, "contradiction detected");
        crate::jsonl::append_bounded(&self.contradictions_path, &found, 2_000);

        match resolution {
            "update" => {
                let _ = self.store.apply_resolution(&found.old_key, "update");
                let _ = self.store.apply_outcome(&found.old_key, false, Some(text));
            }
            "context" => {
                let tagged = format!("context-tagged contradiction: {text}");
                let _ = self.store.apply_outcome(&found.old_key, false, Some(&tagged));
            }
            "discard_new" => return false,
            _ => {} // keep_both: audit-logged only, no stored mutation.
        }
        true
    }
}

/// Consults both C3 (whitespace-Jaccard over the store's own text) and
/// C4 (embedding cosine similarity via the semantic index) for a
/// near-duplicate of `candidate`, per the "C3 and C4" duplicate-detector
/// requirement. C4's check is a no-op when no embedder is configured.
fn near_duplicate_exists(store: &CognitiveStore, index: &SemanticIndex, candidate: &str) -> bool {
    if index.has_near_duplicate(candidate, NEAR_DUPLICATE_COSINE).unwrap_or(false) {
        return true;
    }

    let candidate_tokens: std::collections::HashSet<&str> = candidate.split_whitespace().collect();
    for key in store.keys() {
        let Some(existing) = store.get(&key) else { continue };
        let existing_tokens: std::collections::HashSet<&str> = existing.text.split_whitespace().collect();
        if candidate_tokens.is_empty() || existing_tokens.is_empty() {
            continue;
        }
        let inter = candidate_tokens.intersection(&existing_tokens).count() as f64;
        let union = candidate_tokens.union(&existing_tokens).count() as f64;
        if inter / union >= NEAR_DUPLICATE_JACCARD {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(dir: &Path) -> (CognitiveStore, SemanticIndex, Telemetry, PathBuf, PathBuf) {
        let store = CognitiveStore::open(dir.join("store.json")).unwrap();
        let index = SemanticIndex::open_in_memory().unwrap();
        let telemetry = Telemetry::open(dir.join("telemetry.json"));
        let quarantine = dir.join("quarantine.jsonl");
        let contradictions = dir.join("contradictions.jsonl");
        (store, index, telemetry, quarantine, contradictions)
    }

    #[test]
    fn rejects_noise_without_storing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: true,
        };
        let stored = vas.validate_and_store("too short", "test", Category::Reasoning, "ctx", ActionDomain::General, 0);
        assert!(!stored);
        assert_eq!(store.len(), 0);
        assert_eq!(telemetry.snapshot().rejected_primitive, 1);
    }

    #[test]
    fn stores_clean_candidate_and_indexes_it() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: true,
        };
        let stored = vas.validate_and_store(
            "Always run the linter before committing any change",
            "test",
            Category::Reasoning,
            "ctx",
            ActionDomain::General,
            0,
        );
        assert!(stored);
        assert_eq!(store.len(), 1);
        assert_eq!(telemetry.snapshot().stored, 1);
    }

    #[test]
    fn direct_contradiction_against_unvalidated_insight_updates_it() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let existing = Insight::new(
            Category::UserUnderstanding,
            "User prefers verbose commit messages with full context",
            "ctx",
            "test",
            ActionDomain::General,
            0,
        );
        let old_key = existing.key.clone();
        store.add_insight(existing, "test").unwrap();

        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: true,
        };
        let stored = vas.validate_and_store(
            "User avoids verbose commit messages with full context",
            "test",
            Category::UserUnderstanding,
            "ctx",
            ActionDomain::General,
            0,
        );
        assert!(stored);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&old_key).unwrap().times_validated, 0);
    }

    #[test]
    fn direct_contradiction_against_reliable_insight_discards_the_new_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let mut existing = Insight::new(
            Category::UserUnderstanding,
            "User prefers verbose commit messages with full context",
            "ctx",
            "test",
            ActionDomain::General,
            0,
        );
        existing.times_validated = 4;
        let old_key = existing.key.clone();
        store.add_insight(existing, "test").unwrap();
        assert!(store.get(&old_key).unwrap().effective_reliability(0) >= 0.8);

        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: true,
        };
        let stored = vas.validate_and_store(
            "User avoids verbose commit messages with full context",
            "test",
            Category::UserUnderstanding,
            "ctx",
            ActionDomain::General,
            0,
        );
        assert!(!stored);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn capture_memory_stores_at_threshold_confidence_then_reinforces_on_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: true,
        };

        let text = "always use bcrypt for password hashing";
        let captured = vas.capture_memory(text, Category::MetaLearning, "memory_capture", ActionDomain::General, 0);
        assert!(captured);
        assert_eq!(store.len(), 1);
        let key = Insight::key_for(Category::MetaLearning, text);
        let insight = store.get(&key).unwrap();
        assert_eq!(insight.source, "memory_capture");
        assert!((insight.confidence - 0.7).abs() < 1e-9);
        assert_eq!(insight.times_validated, 0);

        let reinforced = vas.capture_memory(text, Category::MetaLearning, "memory_capture", ActionDomain::General, 10);
        assert!(reinforced);
        assert_eq!(store.len(), 1);
        let insight = store.get(&key).unwrap();
        assert_eq!(insight.times_validated, 1);
        assert!((insight.confidence - 0.775).abs() < 1e-9);
    }

    #[test]
    fn feature_gate_off_bypasses_gate_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let (store, index, telemetry, quarantine, contradictions) = harness(dir.path());
        let vas = ValidateAndStore {
            store: &store,
            index: &index,
            telemetry: &telemetry,
            quarantine_path: quarantine,
            contradictions_path: contradictions,
            advisory: None,
            feature_gate_enabled: false,
        };
        // The gate/quarantine path is skipped, but C3's own defense-in-depth
        // noise filter still applies — only the roast/duplicate judges are bypassed.
        let stored = vas.validate_and_store(
            "Always run the linter before committing any change",
            "test",
            Category::Reasoning,
            "ctx",
            ActionDomain::General,
            0,
        );
        assert!(stored);
        assert_eq!(telemetry.snapshot().stored, 1);
    }
}
