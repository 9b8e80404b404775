//! Spark background worker: drains the event queue on one tick, runs the
//! prediction/outcome loop on another, and polls the tuneables registry
//! for hot reload. Grounded in `add-ons/pagi-daemon/src/main.rs`'s
//! `#[tokio::main]` + `tokio::select!` shape, generalized from "poll
//! agent inboxes" to "run the cognitive pipeline."

use serde::Serialize;
use spark_core::{CognitiveStore, EventQueue, QueueLimits, SemanticIndex, Telemetry, TuneablesRegistry, ValidateAndStore};
use spark_pipeline as pipeline;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TICK_RATE_SECS: u64 = 15;
const PREDICTION_TICK_RATE_SECS: u64 = 30;
const PROMOTION_TICK_RATE_SECS: u64 = 3600;
const RELOAD_POLL_SECS: u64 = 10;
const PREDICTION_TTL_SECS: i64 = 7 * 24 * 3600;
const PREDICTION_SIMILARITY_THRESHOLD: f64 = 0.3;

struct SparkHome {
    root: PathBuf,
}

impl SparkHome {
    fn resolve() -> Self {
        let root = std::env::var("SPARK_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".spark")
            });
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[derive(Serialize)]
struct Heartbeat {
    ts: i64,
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn write_heartbeat(path: &Path) {
    let body = serde_json::to_string(&Heartbeat { ts: now_secs() }).unwrap_or_default();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, body);
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[spark-daemon] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let home = SparkHome::resolve();
    std::fs::create_dir_all(&home.root).expect("create SPARK_HOME");

    let (baseline_path, runtime_path) = spark_core::config::default_paths();
    let tuneables = Arc::new(TuneablesRegistry::open(baseline_path, runtime_path));

    let queue = Arc::new(
        EventQueue::open(home.path("queue"), QueueLimits::default()).expect("open event queue"),
    );
    let store = Arc::new(CognitiveStore::open(home.path("cognitive_insights.json")).expect("open cognitive store"));
    let index = Arc::new(SemanticIndex::open(home.path("semantic_index.sqlite3")).expect("open semantic index"));
    let telemetry = Arc::new(Telemetry::open(home.path("validate_telemetry.json")));
    let quarantine_path = home.path("quarantine/quarantine.jsonl");
    let contradictions_path = home.path("contradictions.jsonl");
    let exposures_path = home.path("exposures.jsonl");
    let predictions_path = home.path("predictions.jsonl");
    let outcomes_path = home.path("outcomes.jsonl");
    let metrics_path = home.path("pipeline_metrics.json");
    let heartbeat_path = home.path("bridge_worker_heartbeat.json");
    let promoted_doc_path = home.path("promoted_insights.md");

    let feature_gate_enabled = std::env::var("SPARK_VALIDATE_AND_STORE")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true);

    tracing::info!(
        target: "spark::daemon",
        home = %home.root.display(),
        feature_gate_enabled,
        "spark daemon started"
    );

    let mut pipeline_interval = tokio::time::interval(Duration::from_secs(DEFAULT_TICK_RATE_SECS));
    let mut prediction_interval = tokio::time::interval(Duration::from_secs(PREDICTION_TICK_RATE_SECS));
    let mut promotion_interval = tokio::time::interval(Duration::from_secs(PROMOTION_TICK_RATE_SECS));
    let mut reload_interval = tokio::time::interval(Duration::from_secs(RELOAD_POLL_SECS));
    let mut last_cycle_events_per_sec = 0.0_f64;

    loop {
        tokio::select! {
            _ = pipeline_interval.tick() => {
                let queue = Arc::clone(&queue);
                let store = Arc::clone(&store);
                let index = Arc::clone(&index);
                let telemetry = Arc::clone(&telemetry);
                let tuneables = Arc::clone(&tuneables);
                let quarantine_path = quarantine_path.clone();
                let contradictions_path = contradictions_path.clone();
                let metrics_path = metrics_path.clone();
                let heartbeat_path = heartbeat_path.clone();

                let result = tokio::task::spawn_blocking(move || {
                    let snapshot = tuneables.snapshot();
                    let base_batch = snapshot.get_i64("values", "queue_batch_size").max(1) as usize;
                    let vas = ValidateAndStore {
                        store: &store,
                        index: &index,
                        telemetry: &telemetry,
                        quarantine_path: quarantine_path.clone(),
                        contradictions_path: contradictions_path.clone(),
                        advisory: None,
                        feature_gate_enabled,
                    };
                    let now = now_secs();
                    let report = pipeline::run_cycle(&queue, &vas, base_batch, last_cycle_events_per_sec, now)?;
                    pipeline::record_cycle(&metrics_path, &report, now);
                    write_heartbeat(&heartbeat_path);
                    Ok::<_, spark_core::QueueError>(report)
                })
                .await;

                match result {
                    Ok(Ok(report)) => {
                        last_cycle_events_per_sec = throughput(&report);
                        tracing::info!(
                            target: "spark::pipeline",
                            events_read = report.events_read,
                            derived_learnings = report.derived_learnings,
                            duration_ms = report.duration_ms,
                            "pipeline cycle complete"
                        );
                    }
                    Ok(Err(e)) => tracing::warn!(target: "spark::pipeline", error = %e, "pipeline cycle failed"),
                    Err(e) => tracing::warn!(target: "spark::pipeline", error = %e, "pipeline cycle task panicked"),
                }
            }
            _ = prediction_interval.tick() => {
                let queue = Arc::clone(&queue);
                let store = Arc::clone(&store);
                let exposures_path = exposures_path.clone();
                let predictions_path = predictions_path.clone();
                let outcomes_path = outcomes_path.clone();

                let result = tokio::task::spawn_blocking(move || {
                    run_prediction_tick(&queue, &store, &exposures_path, &predictions_path, &outcomes_path, now_secs())
                })
                .await;

                if let Err(e) = result {
                    tracing::warn!(target: "spark::prediction", error = %e, "prediction tick task panicked");
                }
            }
            _ = promotion_interval.tick() => {
                let store = Arc::clone(&store);
                let tuneables = Arc::clone(&tuneables);
                let promoted_doc_path = promoted_doc_path.clone();

                let result = tokio::task::spawn_blocking(move || {
                    let snapshot = tuneables.snapshot();
                    let now = now_secs();
                    let promoted = pipeline::execute_promotions(&store, &snapshot, &promoted_doc_path, now)?;
                    let demoted = pipeline::execute_demotions(&store, &snapshot, now)?;
                    Ok::<_, spark_core::StoreError>((promoted, demoted))
                })
                .await;

                match result {
                    Ok(Ok((promoted, demoted))) => {
                        if promoted > 0 || demoted > 0 {
                            tracing::info!(target: "spark::promotion", promoted, demoted, "promotion tick complete");
                        }
                    }
                    Ok(Err(e)) => tracing::warn!(target: "spark::promotion", error = %e, "promotion tick failed"),
                    Err(e) => tracing::warn!(target: "spark::promotion", error = %e, "promotion tick task panicked"),
                }
            }
            _ = reload_interval.tick() => {
                let tuneables = Arc::clone(&tuneables);
                tokio::task::spawn_blocking(move || tuneables.poll_for_changes()).await.ok();
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "spark::daemon", "ctrl-c received; shutting down");
                break;
            }
        }
    }
}

fn throughput(report: &pipeline::CycleReport) -> f64 {
    if report.duration_ms == 0 {
        return 0.0;
    }
    report.events_read as f64 / (report.duration_ms as f64 / 1000.0)
}

/// Builds predictions for exposures not yet covered, extracts outcomes
/// from the queue's recent tail, matches the two, and feeds validated/
/// contradicted counters back into the store. Runs on its own tick so a
/// slow pipeline cycle never blocks prediction matching.
fn run_prediction_tick(
    queue: &EventQueue,
    store: &CognitiveStore,
    exposures_path: &Path,
    predictions_path: &Path,
    outcomes_path: &Path,
    now: i64,
) {
    let exposures: Vec<spark_core::model::Exposure> = spark_core::jsonl::read_recent(exposures_path, 500);
    let mut predictions: Vec<spark_core::Prediction> = spark_core::jsonl::read_recent(predictions_path, 500);

    let already_predicted: std::collections::HashSet<&str> =
        predictions.iter().map(|p| p.insight_key.as_str()).collect();

    for exposure in &exposures {
        if already_predicted.contains(exposure.insight_key.as_str()) {
            continue;
        }
        let Some(insight) = store.get(&exposure.insight_key) else { continue };
        let prediction = pipeline::build_prediction(exposure, &insight.text, insight.category, now, PREDICTION_TTL_SECS);
        spark_core::jsonl::append_bounded(predictions_path, &prediction, 2000);
        predictions.push(prediction);
    }

    let events = match queue.tail(2000) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(target: "spark::prediction", error = %e, "failed reading queue tail");
            return;
        }
    };
    let outcomes = pipeline::extract_outcomes(&events, now);
    for outcome in &outcomes {
        spark_core::jsonl::append_bounded(outcomes_path, outcome, 2000);
    }

    let results = pipeline::match_predictions(&predictions, &outcomes, PREDICTION_SIMILARITY_THRESHOLD);
    let surprises = pipeline::apply_matches(store, &predictions, &results, now);
    for key in &surprises {
        tracing::info!(target: "spark::prediction", insight_key = %key, "high-reliability insight contradicted");
    }

    let links = pipeline::auto_link(store, &exposures, &outcomes, 0.5);
    tracing::debug!(target: "spark::prediction", matched = results.len(), auto_linked = links.len(), "prediction tick complete");
}
