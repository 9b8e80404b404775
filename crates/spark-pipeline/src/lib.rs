//! spark-pipeline: the repeating cycle that drains the event queue,
//! the prediction/outcome loop, promotion selection, meta-learning, and
//! rolling processing metrics. Sits on top of `spark-core`'s storage and
//! gating primitives.

pub mod capture;
pub mod engine;
pub mod evolution;
pub mod metrics;
pub mod prediction;
pub mod promotion;

pub use capture::{capture_hard_triggers, AUTO_SAVE_THRESHOLD};
pub use engine::{run_cycle, CycleReport, DerivedLearning, PriorityBreakdown, QueueHealth};
pub use evolution::{adjust_promotion_threshold, analyze_trend, build_report, ChipActivity, LearningReport, ThresholdAdjustment, Trend, TrendAnalysis};
pub use metrics::{mean_throughput, record_cycle, MetricsEntry};
pub use prediction::{apply_matches, auto_link, build_prediction, extract_outcomes, match_predictions, MatchResult};
pub use promotion::{execute_demotions, execute_promotions, render_markdown, select_candidates, select_demotions, PromotionCandidate};
