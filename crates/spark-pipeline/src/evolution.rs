//! Meta-learning (C11): reports on how well the system is learning and
//! nudges `evolution.promotion_threshold` when the trend says so.
//!
//! Grounded in `original_source/lib/config_authority.py`'s
//! `evolution.*` tuneables and the teacher's rolling-window report shape
//! in `crates/pagi-core/src/orchestrator/health_report.rs` (`HealthReport`
//! over a fixed `REPORT_DAYS` window) generalized into a quality report
//! plus a strategist that writes its decisions back with a reason string.

use spark_core::{CognitiveStore, Tuneables};

/// Chip-trigger activity for the session a report covers, fed by the
/// external pattern-detection aggregator (spec'd only by its
/// `process_event`/`trigger_learning` contracts, out of scope here).
/// `events_total` is how many dispatched events it saw this session,
/// `events_matched` how many tripped a registered chip.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChipActivity {
    pub events_matched: u64,
    pub events_total: u64,
}

impl ChipActivity {
    fn coverage(&self) -> f64 {
        if self.events_total == 0 {
            0.0
        } else {
            self.events_matched as f64 / self.events_total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearningReport {
    pub total_insights: usize,
    pub high_value_ratio: f64,
    pub promotion_ratio: f64,
    pub outcome_linkage_ratio: f64,
    pub chip_coverage: f64,
    pub quality_score: f64,
}

/// Summarizes one session's health: how many of its insights are
/// durable (reliability >= 0.6), how many graduated to promotion, how
/// many have ever been touched by an outcome, and how much of the
/// session's chip-trigger traffic was actually matched. `insight_keys`
/// scopes the report to one session's insights, mirroring the
/// `LearningReport` dataclass's per-session aggregation.
pub fn build_report(store: &CognitiveStore, insight_keys: &[String], chips: ChipActivity, now: i64) -> LearningReport {
    let total = insight_keys.len();
    let chip_coverage = chips.coverage();
    if total == 0 {
        return LearningReport {
            total_insights: 0,
            high_value_ratio: 0.0,
            promotion_ratio: 0.0,
            outcome_linkage_ratio: 0.0,
            chip_coverage,
            quality_score: chip_coverage * 0.25,
        };
    }

    let mut high_value = 0usize;
    let mut promoted = 0usize;
    let mut outcome_linked = 0usize;

    for key in insight_keys {
        let Some(insight) = store.get(key) else { continue };
        if insight.effective_reliability(now) >= 0.6 {
            high_value += 1;
        }
        if insight.promoted {
            promoted += 1;
        }
        if insight.times_validated > 0 || insight.times_contradicted > 0 {
            outcome_linked += 1;
        }
    }

    let high_value_ratio = high_value as f64 / total as f64;
    let promotion_ratio = promoted as f64 / total as f64;
    let outcome_linkage_ratio = outcome_linked as f64 / total as f64;
    // Weights match `original_source/lib/metalearning/evaluator.py`'s
    // `LearningReport.quality_score` property.
    let quality_score = (high_value_ratio * 0.35)
        + (outcome_linkage_ratio * 0.25)
        + (chip_coverage * 0.25)
        + (promotion_ratio * 0.15);

    LearningReport {
        total_insights: total,
        high_value_ratio,
        promotion_ratio,
        outcome_linkage_ratio,
        chip_coverage,
        quality_score,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone)]
pub struct TrendAnalysis {
    pub trend: Trend,
    pub slope: f64,
    pub recommendation: String,
}

/// Fits a simple least-squares slope over successive quality scores and
/// classifies the trend, with a human-readable recommendation.
pub fn analyze_trend(history: &[f64]) -> TrendAnalysis {
    if history.len() < 2 {
        return TrendAnalysis {
            trend: Trend::Stable,
            slope: 0.0,
            recommendation: "not enough history to assess a trend yet".to_string(),
        };
    }

    let n = history.len() as f64;
    let xs: Vec<f64> = (0..history.len()).map(|i| i as f64).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = history.iter().sum::<f64>() / n;

    let numerator: f64 = xs.iter().zip(history).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let denominator: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let slope = if denominator.abs() < f64::EPSILON { 0.0 } else { numerator / denominator };

    let (trend, recommendation) = if slope > 0.01 {
        (Trend::Improving, "quality trending up; current thresholds are working".to_string())
    } else if slope < -0.01 {
        (Trend::Declining, "quality trending down; consider tightening the gate or lowering the promotion threshold".to_string())
    } else {
        (Trend::Stable, "quality holding steady".to_string())
    };

    TrendAnalysis { trend, slope, recommendation }
}

#[derive(Debug, Clone)]
pub struct ThresholdAdjustment {
    pub previous: f64,
    pub new: f64,
    pub reason: String,
}

/// Nudges `evolution.promotion_threshold` by `evolution.adjustment_step`
/// within `[0.4, 0.7]`: down a step when quality is declining (more
/// insights get a chance to prove themselves), up a step when quality is
/// strongly improving (raise the bar). Returns `None` when the trend is
/// stable and no adjustment is warranted.
pub fn adjust_promotion_threshold(tuneables: &Tuneables, trend: &TrendAnalysis) -> Option<ThresholdAdjustment> {
    let current = tuneables.get_f64("evolution", "promotion_threshold");
    let step = tuneables.get_f64("evolution", "adjustment_step");

    let delta = match trend.trend {
        Trend::Declining => -step,
        Trend::Improving if trend.slope > 0.05 => step,
        _ => return None,
    };

    let new = (current + delta).clamp(0.4, 0.7);
    if (new - current).abs() < f64::EPSILON {
        return None;
    }

    Some(ThresholdAdjustment {
        previous: current,
        new,
        reason: format!("{:?} trend (slope {:.3}): {}", trend.trend, trend.slope, trend.recommendation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_core::{ActionDomain, Category, Insight};
    use tempfile::tempdir;

    #[test]
    fn report_on_empty_store_is_zeroed() {
        let dir = tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let report = build_report(&store, &[], ChipActivity::default(), 0);
        assert_eq!(report.total_insights, 0);
        assert_eq!(report.quality_score, 0.0);
    }

    #[test]
    fn report_counts_high_value_insights() {
        let dir = tempdir().unwrap();
        let store = CognitiveStore::open(dir.path().join("store.json")).unwrap();
        let mut insight = Insight::new(Category::Wisdom, "keep commits small", "ctx", "test", ActionDomain::System, 0);
        insight.confidence = 0.9;
        insight.times_validated = 5;
        let key = insight.key.clone();
        store.add_insight(insight, "test").unwrap();

        let chips = ChipActivity { events_matched: 3, events_total: 4 };
        let report = build_report(&store, &[key], chips, 0);
        assert_eq!(report.total_insights, 1);
        assert!(report.high_value_ratio > 0.0);
        assert!((report.chip_coverage - 0.75).abs() < 1e-9);
    }

    #[test]
    fn declining_trend_lowers_threshold() {
        let tuneables = Tuneables::default();
        let trend = analyze_trend(&[0.8, 0.6, 0.4, 0.2]);
        assert_eq!(trend.trend, Trend::Declining);
        let adjustment = adjust_promotion_threshold(&tuneables, &trend).expect("should adjust");
        assert!(adjustment.new < adjustment.previous);
    }

    #[test]
    fn stable_trend_does_not_adjust() {
        let tuneables = Tuneables::default();
        let trend = analyze_trend(&[0.5, 0.5, 0.5, 0.5]);
        assert_eq!(trend.trend, Trend::Stable);
        assert!(adjust_promotion_threshold(&tuneables, &trend).is_none());
    }
}
