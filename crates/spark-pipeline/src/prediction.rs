//! Prediction & outcome loop (C8): builds predictions from exposures,
//! extracts outcomes from new queue events, matches the two, and feeds
//! validated/contradicted counters back into the store (C3).
//!
//! Grounded in `original_source/lib/prediction_loop.py`.

use spark_core::model::{Event, EventKind, Exposure, Outcome, Polarity, Prediction, PredictionType};
use spark_core::{Category, CognitiveStore};
use std::collections::HashSet;

const POSITIVE_VOCAB: &[&str] = &["ship it", "perfect", "looks good", "great work", "nailed it", "works great"];
const NEGATIVE_VOCAB: &[&str] = &["wrong", "fix", "broken", "doesn't work", "failed", "that's not right"];
const NEGATION_MARKERS: &[&str] = &["never", "avoid", "don't", "not ", "stop "];

/// Derives `expected_polarity` and `type` from an exposure's insight
/// text/category, applying the per-source budget the caller enforces.
pub fn build_prediction(exposure: &Exposure, insight_text: &str, category: Category, now: i64, ttl_secs: i64) -> Prediction {
    let lower = insight_text.to_lowercase();
    let expected_polarity = if NEGATION_MARKERS.iter().any(|n| lower.contains(n)) {
        Polarity::Neg
    } else {
        Polarity::Pos
    };

    let kind = if ["struggle", "fails", "error"].iter().any(|k| lower.contains(k)) {
        PredictionType::FailurePattern
    } else if ["sequence", "pattern"].iter().any(|k| lower.contains(k)) {
        PredictionType::Workflow
    } else if matches!(category, Category::Communication | Category::UserUnderstanding) {
        PredictionType::Preference
    } else if category == Category::Wisdom {
        PredictionType::Principle
    } else {
        PredictionType::General
    };

    Prediction {
        prediction_id: format!("{}-{}", exposure.insight_key, now),
        insight_key: exposure.insight_key.clone(),
        text: insight_text.to_string(),
        expected_polarity,
        kind,
        created_at: now,
        expires_at: now + ttl_secs,
        source: exposure.source.clone(),
        namespace: "prod".to_string(),
        outcome_id: None,
    }
}

/// Scans events for observable outcomes: `UserPrompt` polarity from fixed
/// vocabularies, `PostToolFailure` as an automatic negative outcome.
pub fn extract_outcomes(events: &[Event], now: i64) -> Vec<Outcome> {
    let mut out = Vec::new();
    for event in events {
        match event.kind {
            EventKind::UserPrompt => {
                let text = event.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                let lower = text.to_lowercase();
                let polarity = if POSITIVE_VOCAB.iter().any(|p| lower.contains(p)) {
                    Polarity::Pos
                } else if NEGATIVE_VOCAB.iter().any(|n| lower.contains(n)) {
                    Polarity::Neg
                } else {
                    continue;
                };
                out.push(Outcome {
                    outcome_id: format!("{}-{}", event.id, now),
                    event_type: "user_prompt".to_string(),
                    tool: None,
                    text: text.to_string(),
                    polarity,
                    created_at: now,
                    trace_id: Some(event.trace_id.clone()),
                    domain: None,
                    linked_insights: Vec::new(),
                });
            }
            EventKind::PostToolFailure => {
                let msg = event.error.clone().unwrap_or_default();
                out.push(Outcome {
                    outcome_id: format!("{}-{}", event.id, now),
                    event_type: "post_tool_failure".to_string(),
                    tool: event.tool_name.clone(),
                    text: format!("tool error: {msg}"),
                    polarity: Polarity::Neg,
                    created_at: now,
                    trace_id: Some(event.trace_id.clone()),
                    domain: None,
                    linked_insights: Vec::new(),
                });
            }
            _ => {}
        }
    }
    out
}

fn jaccard(a: &str, b: &str) -> f64 {
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

/// Result of matching one prediction against the outcome pool.
pub struct MatchResult {
    pub prediction_id: String,
    pub outcome_id: String,
    pub validated: bool,
}

/// For each unmatched prediction, finds the best-matching outcome within
/// its type-adaptive window (via Jaccard token overlap, since embeddings
/// are an optional capability) and decides validated/contradicted.
/// Outcomes carrying `linked_insights` hard-link regardless of
/// similarity or window.
pub fn match_predictions(predictions: &[Prediction], outcomes: &[Outcome], similarity_threshold: f64) -> Vec<MatchResult> {
    let mut results = Vec::new();
    for prediction in predictions {
        if prediction.is_matched() {
            continue;
        }
        let window = prediction.kind.match_window_secs();

        if let Some(hard) = outcomes.iter().find(|o| o.linked_insights.contains(&prediction.insight_key)) {
            results.push(MatchResult {
                prediction_id: prediction.prediction_id.clone(),
                outcome_id: hard.outcome_id.clone(),
                validated: polarity_matches(prediction, hard),
            });
            continue;
        }

        let mut best: Option<(&Outcome, f64)> = None;
        for outcome in outcomes {
            if (outcome.created_at - prediction.created_at).abs() > window {
                continue;
            }
            let sim = jaccard(&prediction.text, &outcome.text);
            if sim < similarity_threshold {
                continue;
            }
            if best.map(|(_, s)| sim > s).unwrap_or(true) {
                best = Some((outcome, sim));
            }
        }

        if let Some((outcome, _)) = best {
            results.push(MatchResult {
                prediction_id: prediction.prediction_id.clone(),
                outcome_id: outcome.outcome_id.clone(),
                validated: polarity_matches(prediction, outcome),
            });
        }
    }
    results
}

fn polarity_matches(prediction: &Prediction, outcome: &Outcome) -> bool {
    if prediction.kind == PredictionType::FailurePattern {
        return true; // failure patterns always validate on any outcome, per spec.
    }
    prediction.expected_polarity == outcome.polarity
}

/// Applies match results to the store, boosting/decaying each matched
/// insight. Returns the keys of insights that went from high-reliability
/// to contradicted in this batch — the "surprise" set a caller can route
/// to an aha-tracker collaborator.
pub fn apply_matches(store: &CognitiveStore, predictions: &[Prediction], results: &[MatchResult], now: i64) -> Vec<String> {
    let mut surprises = Vec::new();
    for result in results {
        let Some(prediction) = predictions.iter().find(|p| p.prediction_id == result.prediction_id) else { continue };
        let was_high_reliability = store
            .get(&prediction.insight_key)
            .map(|i| i.effective_reliability(now) >= 0.7 && i.times_validated >= 2)
            .unwrap_or(false);

        let _ = store.apply_outcome(&prediction.insight_key, result.validated, None);

        if was_high_reliability && !result.validated {
            surprises.push(prediction.insight_key.clone());
        }
    }
    surprises
}

/// Auto-link pass: connects outcomes with no hard link to the nearest
/// recent exposure when similarity clears `auto_link_min_sim`, run on a
/// separate interval from the main match phase. Similarity compares the
/// outcome's text against the *exposed insight's* text (resolved via
/// `store`), not the bare `insight_key` slug — the key alone shares no
/// vocabulary with free-form outcome text and would never clear a
/// Jaccard threshold.
pub fn auto_link(store: &CognitiveStore, exposures: &[Exposure], outcomes: &[Outcome], min_sim: f64) -> Vec<(String, String)> {
    let mut links = Vec::new();
    for outcome in outcomes {
        if !outcome.linked_insights.is_empty() {
            continue;
        }
        let best = exposures
            .iter()
            .filter(|e| (e.timestamp - outcome.created_at).abs() < 3600)
            .filter_map(|e| store.get(&e.insight_key).map(|insight| (e, jaccard(&insight.text, &outcome.text))))
            .filter(|(_, sim)| *sim >= min_sim)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((exposure, _)) = best {
            links.push((exposure.insight_key.clone(), outcome.outcome_id.clone()));
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(key: &str) -> Exposure {
        Exposure { insight_key: key.to_string(), timestamp: 0, session_id: "s1".into(), trace_id: "t1".into(), source: "test".into() }
    }

    #[test]
    fn negated_text_predicts_negative_polarity() {
        let p = build_prediction(&exposure("k1"), "Never use force push on shared branches", Category::Reasoning, 0, 60);
        assert_eq!(p.expected_polarity, Polarity::Neg);
    }

    #[test]
    fn failure_keyword_selects_failure_pattern_type() {
        let p = build_prediction(&exposure("k1"), "Agent struggles with circular imports", Category::Reasoning, 0, 60);
        assert_eq!(p.kind, PredictionType::FailurePattern);
    }

    #[test]
    fn failure_pattern_validates_regardless_of_polarity() {
        let prediction = build_prediction(&exposure("k1"), "Agent fails on missing env vars", Category::Reasoning, 0, 3600);
        let outcome = Outcome {
            outcome_id: "o1".into(),
            event_type: "user_prompt".into(),
            tool: None,
            text: "ship it".into(),
            polarity: Polarity::Pos,
            created_at: 0,
            trace_id: None,
            domain: None,
            linked_insights: Vec::new(),
        };
        assert!(polarity_matches(&prediction, &outcome));
    }

    #[test]
    fn extract_outcomes_flags_tool_failure_as_negative() {
        let events = vec![Event::new(EventKind::PostToolFailure, "s1", 0, serde_json::json!({}))
            .with_tool("Bash", serde_json::json!({}))
            .with_error("exit 1")];
        let outcomes = extract_outcomes(&events, 0);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].polarity, Polarity::Neg);
    }

    #[test]
    fn auto_link_compares_exposed_insight_text_not_the_key_slug() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let insight = spark_core::model::Insight::new(
            Category::Reasoning,
            "Always run the linter before committing any change",
            "ctx",
            "test",
            spark_core::model::ActionDomain::General,
            0,
        );
        let key = insight.key.clone();
        store.add_insight(insight, "test").unwrap();

        let exp = Exposure { insight_key: key.clone(), timestamp: 0, session_id: "s1".into(), trace_id: "t1".into(), source: "test".into() };
        let outcome = Outcome {
            outcome_id: "o1".into(),
            event_type: "user_prompt".into(),
            tool: None,
            text: "Always run the linter before committing".into(),
            polarity: Polarity::Pos,
            created_at: 60,
            trace_id: None,
            domain: None,
            linked_insights: Vec::new(),
        };

        let links = auto_link(&store, &[exp], &[outcome], 0.3);
        assert_eq!(links, vec![(key, "o1".to_string())]);
    }

    #[test]
    fn auto_link_skips_exposures_whose_insight_text_is_unrelated() {
        let dir = tempfile::tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let insight = spark_core::model::Insight::new(
            Category::Reasoning,
            "User prefers dark mode in the editor",
            "ctx",
            "test",
            spark_core::model::ActionDomain::General,
            0,
        );
        let key = insight.key.clone();
        store.add_insight(insight, "test").unwrap();

        let exp = Exposure { insight_key: key, timestamp: 0, session_id: "s1".into(), trace_id: "t1".into(), source: "test".into() };
        let outcome = Outcome {
            outcome_id: "o1".into(),
            event_type: "user_prompt".into(),
            tool: None,
            text: "the deployment pipeline finished successfully".into(),
            polarity: Polarity::Pos,
            created_at: 60,
            trace_id: None,
            domain: None,
            linked_insights: Vec::new(),
        };

        assert!(auto_link(&store, &[exp], &[outcome], 0.3).is_empty());
    }
}
