//! Cognitive store (C3): a keyed map of `Insight`s persisted as a single
//! JSON document, guarded by `FileLock`, written via temp-file-then-rename.
//!
//! Grounded in `original_source/lib/cognitive_learner.py` for the
//! semantics (`add_insight`, `apply_outcome`, `get_insights_for_context`,
//! `resolve_conflicts`, `prune_stale`) and in the teacher's record style
//! (`knowledge/store.rs::KbRecord` builder methods, atomic replace via
//! `tempfile`) for the persistence shape.

use crate::error::StoreError;
use crate::gate;
use crate::lock::FileLock;
use crate::model::{Exposure, Insight};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "in",
    "on", "for", "and", "or", "but", "with", "this", "that", "it", "as", "at",
];

pub struct CognitiveStore {
    path: PathBuf,
    lock_path: PathBuf,
    insights: RwLock<HashMap<String, Insight>>,
    batching: RwLock<bool>,
}

impl CognitiveStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock_path = path.with_extension("json.lock");
        let insights = load_disk(&path)?;
        Ok(Self {
            path,
            lock_path,
            insights: RwLock::new(insights),
            batching: RwLock::new(false),
        })
    }

    /// Accumulates writes without fsyncing on every call; `end_batch`
    /// performs exactly one flush. Use around bulk pipeline writes to
    /// minimize fsync cost, per spec.md §4.3.
    pub fn begin_batch(&self) {
        *self.batching.write().unwrap() = true;
    }

    pub fn end_batch(&self) -> Result<(), StoreError> {
        *self.batching.write().unwrap() = false;
        self.flush()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        let lock = FileLock::acquire(&self.lock_path, Duration::from_millis(500), Duration::from_secs(60));
        if !lock.is_acquired() {
            return Err(StoreError::Corrupt("flush: lock unavailable".into()));
        }
        // Merge with whatever is currently on disk before overwriting, so a
        // concurrent writer's update is not silently lost.
        let on_disk = load_disk(&self.path)?;
        {
            let mut mem = self.insights.write().unwrap();
            for (key, disk_insight) in on_disk {
                mem.entry(key).or_insert(disk_insight);
            }
        }
        let snapshot = self.insights.read().unwrap().clone();
        write_atomic(&self.path, &snapshot)
    }

    fn maybe_flush(&self) -> Result<(), StoreError> {
        if *self.batching.read().unwrap() {
            Ok(())
        } else {
            self.flush()
        }
    }

    /// Rejects noise candidates; merges into an existing insight by key
    /// or inserts a new one. Also emits an `Exposure` so the prediction
    /// loop (C8) can derive a prediction from it.
    pub fn add_insight(&self, mut candidate: Insight, exposure_source: &str) -> Result<Option<Exposure>, StoreError> {
        if gate::is_noise(&candidate.text, &candidate.source).is_some() {
            return Ok(None);
        }

        let mut insights = self.insights.write().unwrap();
        match insights.get_mut(&candidate.key) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(candidate.confidence);
                existing.times_validated += candidate.times_validated;
                existing.times_contradicted += candidate.times_contradicted;
                for e in candidate.evidence.drain(..) {
                    existing.push_evidence(e);
                }
                for c in candidate.counter_examples.drain(..) {
                    existing.push_counter_example(c);
                }
                if candidate.emotion_state.is_some() {
                    existing.emotion_state = candidate.emotion_state;
                }
            }
            None => {
                let key = candidate.key.clone();
                insights.insert(key, candidate.clone());
            }
        }
        drop(insights);
        self.maybe_flush()?;

        Ok(Some(Exposure {
            insight_key: candidate.key,
            timestamp: candidate.created_at,
            session_id: String::new(),
            trace_id: String::new(),
            source: exposure_source.to_string(),
        }))
    }

    /// Applies a C9 contradiction resolution action to the named
    /// insight in place (currently only `update` touches stored
    /// counters, decrementing `times_validated`). No-op if the key is
    /// gone.
    pub fn apply_resolution(&self, key: &str, resolution: &str) -> Result<(), StoreError> {
        {
            let mut insights = self.insights.write().unwrap();
            let Some(insight) = insights.get_mut(key) else { return Ok(()) };
            crate::contradiction::apply_resolution(insight, resolution);
        }
        self.maybe_flush()
    }

    /// Marks an insight promoted into `adapter`'s external doc, or
    /// demoted (`adapter: None`) once its reliability has fallen back
    /// below the bar. No-op if the key is gone.
    pub fn set_promoted(&self, key: &str, adapter: Option<&str>) -> Result<(), StoreError> {
        {
            let mut insights = self.insights.write().unwrap();
            let Some(insight) = insights.get_mut(key) else { return Ok(()) };
            insight.promoted = adapter.is_some();
            insight.promoted_to = adapter.map(|a| a.to_string());
        }
        self.maybe_flush()
    }

    /// Updates validation counters and boosts/decays confidence.
    pub fn apply_outcome(&self, key: &str, good: bool, evidence: Option<&str>) -> Result<(), StoreError> {
        {
            let mut insights = self.insights.write().unwrap();
            let Some(insight) = insights.get_mut(key) else { return Ok(()) };
            if good {
                insight.times_validated += 1;
                insight.boost_confidence();
            } else {
                insight.times_contradicted += 1;
                insight.decay_confidence();
            }
            if let Some(ev) = evidence {
                insight.push_evidence(ev);
            }
        }
        self.maybe_flush()
    }

    /// Ranked lexical match over `context + text`, requiring at least 2
    /// meaningful word overlaps unless the insight's reliability is high
    /// enough to surface on a weaker match.
    pub fn get_insights_for_context(&self, query: &str, limit: usize, now: i64) -> Vec<Insight> {
        let query_tokens = meaningful_tokens(query);
        let insights = self.insights.read().unwrap();
        let mut scored: Vec<(f64, Insight)> = insights
            .values()
            .filter_map(|i| {
                let haystack = format!("{} {}", i.context, i.text);
                let tokens = meaningful_tokens(&haystack);
                let overlap = query_tokens.intersection(&tokens).count();
                let reliability = i.effective_reliability(now);
                if overlap >= 2 || reliability >= 0.8 {
                    Some((overlap as f64 + reliability, i.clone()))
                } else {
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, i)| i).collect()
    }

    /// `reliability · 2^(-age_days/half_life(category))`; delegates to
    /// the field computation on `Insight` itself.
    pub fn effective_reliability(&self, key: &str, now: i64) -> Option<f64> {
        self.insights.read().unwrap().get(key).map(|i| i.effective_reliability(now))
    }

    /// Removes insights older than `max_age_secs` whose effective
    /// reliability has decayed below `min_effective`. Returns the count
    /// removed.
    pub fn prune_stale(&self, max_age_secs: i64, min_effective: f64, now: i64) -> Result<usize, StoreError> {
        let mut insights = self.insights.write().unwrap();
        let before = insights.len();
        insights.retain(|_, i| {
            let age = now - i.created_at;
            age < max_age_secs || i.effective_reliability(now) >= min_effective
        });
        let removed = before - insights.len();
        drop(insights);
        if removed > 0 {
            self.maybe_flush()?;
        }
        Ok(removed)
    }

    /// Groups insights by a normalized topic key (first 6 meaningful
    /// tokens) and keeps the best-scoring insight per group, using
    /// effective reliability + recency + validation count.
    pub fn resolve_conflicts(&self, now: i64) -> Result<usize, StoreError> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        {
            let insights = self.insights.read().unwrap();
            for (key, insight) in insights.iter() {
                let topic = topic_key(&insight.text);
                groups.entry(topic).or_default().push(key.clone());
            }
        }

        let mut removed = 0usize;
        let mut insights = self.insights.write().unwrap();
        for (_, keys) in groups {
            if keys.len() < 2 {
                continue;
            }
            let mut best_key = keys[0].clone();
            let mut best_score = f64::MIN;
            for key in &keys {
                if let Some(i) = insights.get(key) {
                    let score = i.effective_reliability(now)
                        + recency_score(i.created_at, now)
                        + i.times_validated as f64 * 0.01;
                    if score > best_score {
                        best_score = score;
                        best_key = key.clone();
                    }
                }
            }
            for key in keys {
                if key != best_key {
                    insights.remove(&key);
                    removed += 1;
                }
            }
        }
        drop(insights);
        if removed > 0 {
            self.maybe_flush()?;
        }
        Ok(removed)
    }

    pub fn get(&self, key: &str) -> Option<Insight> {
        self.insights.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.insights.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.insights.read().unwrap().keys().cloned().collect()
    }
}

fn recency_score(created_at: i64, now: i64) -> f64 {
    let age_days = ((now - created_at).max(0) as f64) / 86_400.0;
    1.0 / (1.0 + age_days)
}

fn meaningful_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn topic_key(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .take(6)
        .collect::<Vec<_>>()
        .join("_")
}

fn load_disk(path: &Path) -> Result<HashMap<String, Insight>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => Ok(serde_json::from_str(&s)?),
        Ok(_) => Ok(HashMap::new()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn write_atomic(path: &Path, data: &HashMap<String, Insight>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionDomain, Category};

    fn insight(text: &str) -> Insight {
        Insight::new(Category::Reasoning, text, "testing context", "adapter", ActionDomain::General, 0)
    }

    #[test]
    fn add_insight_rejects_noise() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let result = store.add_insight(insight("too short"), "test").unwrap();
        assert!(result.is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn add_insight_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let i = insight("Always run the linter before committing any change");
        let key = i.key.clone();
        store.add_insight(i, "test").unwrap();
        assert!(store.get(&key).is_some());
    }

    #[test]
    fn apply_outcome_boosts_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let i = insight("Always run the linter before committing any change");
        let key = i.key.clone();
        store.add_insight(i, "test").unwrap();
        store.apply_outcome(&key, true, Some("confirmed")).unwrap();
        let after = store.get(&key).unwrap();
        assert!(after.confidence > 0.5);
        assert_eq!(after.times_validated, 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let i = insight("Always run the linter before committing any change");
        let key = i.key.clone();
        {
            let store = CognitiveStore::open(&path).unwrap();
            store.add_insight(i, "test").unwrap();
        }
        let reopened = CognitiveStore::open(&path).unwrap();
        assert!(reopened.get(&key).is_some());
    }
}
