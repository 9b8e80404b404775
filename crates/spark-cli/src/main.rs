//! `spark` operator CLI: a thin binary over the same on-disk files the
//! daemon owns. Grounded in `dashflow-cli/src/main.rs`'s `clap::Parser` +
//! `Subcommand` shape (scaled down to five commands) and
//! `prospectorengine-prospector-btc`'s CLI binaries, both teacher's
//! neighbors in the pack that depend on `clap` with the `derive` feature.

use clap::{Parser, Subcommand};
use spark_core::{CognitiveStore, EventQueue, QueueLimits, SemanticIndex, Telemetry, TuneablesRegistry};
use spark_pipeline::{self as pipeline, QueueHealth};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "spark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Spark cognitive observatory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-layer health table (Source/Queue/Bridge/Processing/Output/Mind)
    Status,
    /// Run one pipeline cycle on demand
    Sync,
    /// List recent exposures for human review
    AdvisorySelfReview,
    /// Preview promotion candidates without writing anywhere
    PromoteDryRun,
    /// Rebuild the semantic index from the cognitive store
    SemanticReindex,
}

fn spark_home() -> PathBuf {
    std::env::var("SPARK_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".spark")
        })
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckStatus {
    Ok,
    Warn,
    FailCritical,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::FailCritical => "FAIL (critical)",
        }
    }
}

struct LayerCheck {
    layer: &'static str,
    status: CheckStatus,
    detail: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let home = spark_home();

    match cli.command {
        Commands::Status => cmd_status(&home),
        Commands::Sync => cmd_sync(&home),
        Commands::AdvisorySelfReview => cmd_advisory_self_review(&home),
        Commands::PromoteDryRun => cmd_promote_dry_run(&home),
        Commands::SemanticReindex => cmd_semantic_reindex(&home),
    }
}

fn cmd_status(home: &std::path::Path) -> ExitCode {
    let mut checks = Vec::new();

    checks.push(if home.exists() {
        LayerCheck { layer: "Source", status: CheckStatus::Ok, detail: format!("{} present", home.display()) }
    } else {
        LayerCheck { layer: "Source", status: CheckStatus::Warn, detail: "SPARK_HOME not yet created".to_string() }
    });

    let queue_check = match EventQueue::open(home.join("queue"), QueueLimits::default()) {
        Ok(queue) => match queue.tail(100_000) {
            Ok(events) => {
                let depth = events.len() as u64;
                let health = QueueHealth::classify(depth);
                let status = match health {
                    QueueHealth::Healthy | QueueHealth::Elevated => CheckStatus::Ok,
                    QueueHealth::Critical => CheckStatus::Warn,
                    QueueHealth::Emergency => CheckStatus::FailCritical,
                };
                LayerCheck { layer: "Queue", status, detail: format!("depth={depth} health={health:?}") }
            }
            Err(e) => LayerCheck { layer: "Queue", status: CheckStatus::FailCritical, detail: format!("read failed: {e}") },
        },
        Err(e) => LayerCheck { layer: "Queue", status: CheckStatus::FailCritical, detail: format!("open failed: {e}") },
    };
    checks.push(queue_check);

    let heartbeat_path = home.join("bridge_worker_heartbeat.json");
    let bridge_check = match std::fs::read_to_string(&heartbeat_path).ok().and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok()) {
        Some(v) => {
            let ts = v.get("ts").and_then(|t| t.as_i64()).unwrap_or(0);
            let age = now_secs() - ts;
            if age > 120 {
                LayerCheck { layer: "Bridge", status: CheckStatus::FailCritical, detail: format!("heartbeat stale ({age}s old)") }
            } else {
                LayerCheck { layer: "Bridge", status: CheckStatus::Ok, detail: format!("heartbeat {age}s old") }
            }
        }
        None => LayerCheck { layer: "Bridge", status: CheckStatus::Warn, detail: "no heartbeat file yet".to_string() },
    };
    checks.push(bridge_check);

    let metrics_path = home.join("pipeline_metrics.json");
    let processing_check = {
        let entries = pipeline::metrics::recent(&metrics_path, 10);
        if entries.is_empty() {
            LayerCheck { layer: "Processing", status: CheckStatus::Warn, detail: "no pipeline cycles recorded yet".to_string() }
        } else {
            let throughput = pipeline::mean_throughput(&entries);
            LayerCheck { layer: "Processing", status: CheckStatus::Ok, detail: format!("{} cycles, {:.1} events/s avg", entries.len(), throughput) }
        }
    };
    checks.push(processing_check);

    let telemetry = Telemetry::open(home.join("validate_telemetry.json"));
    let counters = telemetry.snapshot();
    let output_check = if counters.attempts == 0 {
        LayerCheck { layer: "Output", status: CheckStatus::Warn, detail: "no validation attempts recorded yet".to_string() }
    } else {
        let reject_ratio = (counters.rejected_primitive + counters.rejected_duplicate + counters.quarantined) as f64 / counters.attempts as f64;
        let status = if reject_ratio > 0.95 { CheckStatus::Warn } else { CheckStatus::Ok };
        LayerCheck {
            layer: "Output",
            status,
            detail: format!("{} stored / {} attempts ({:.0}% rejected)", counters.stored, counters.attempts, reject_ratio * 100.0),
        }
    };
    checks.push(output_check);

    let mind_check = match CognitiveStore::open(home.join("cognitive_insights.json")) {
        Ok(store) => {
            let len = store.len();
            let status = if len == 0 { CheckStatus::Warn } else { CheckStatus::Ok };
            LayerCheck { layer: "Mind", status, detail: format!("{len} insights stored") }
        }
        Err(e) => LayerCheck { layer: "Mind", status: CheckStatus::FailCritical, detail: format!("store unreadable: {e}") },
    };
    checks.push(mind_check);

    println!("{:<12} {:<16} DETAIL", "LAYER", "STATUS");
    let mut any_critical = false;
    for check in &checks {
        if check.status == CheckStatus::FailCritical {
            any_critical = true;
        }
        println!("{:<12} {:<16} {}", check.layer, check.status.label(), check.detail);
    }

    if any_critical {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn cmd_sync(home: &std::path::Path) -> ExitCode {
    let queue = match EventQueue::open(home.join("queue"), QueueLimits::default()) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("failed to open queue: {e}");
            return ExitCode::from(1);
        }
    };
    let store = match CognitiveStore::open(home.join("cognitive_insights.json")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::from(1);
        }
    };
    let index = match SemanticIndex::open(home.join("semantic_index.sqlite3")) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("failed to open semantic index: {e}");
            return ExitCode::from(1);
        }
    };
    let telemetry = Telemetry::open(home.join("validate_telemetry.json"));
    let (baseline_path, runtime_path) = spark_core::config::default_paths();
    let tuneables = TuneablesRegistry::open(baseline_path, runtime_path).snapshot();
    let base_batch = tuneables.get_i64("values", "queue_batch_size").max(1) as usize;

    let vas = spark_core::ValidateAndStore {
        store: &store,
        index: &index,
        telemetry: &telemetry,
        quarantine_path: home.join("quarantine/quarantine.jsonl"),
        contradictions_path: home.join("contradictions.jsonl"),
        advisory: None,
        feature_gate_enabled: true,
    };

    match pipeline::run_cycle(&queue, &vas, base_batch, 0.0, now_secs()) {
        Ok(report) => {
            println!(
                "synced: {} events read, {} derived learnings, {}ms",
                report.events_read, report.derived_learnings, report.duration_ms
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sync failed: {e}");
            ExitCode::from(1)
        }
    }
}

fn cmd_advisory_self_review(home: &std::path::Path) -> ExitCode {
    let exposures: Vec<spark_core::model::Exposure> = spark_core::jsonl::read_recent(&home.join("exposures.jsonl"), 20);
    let store = match CognitiveStore::open(home.join("cognitive_insights.json")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::from(1);
        }
    };

    if exposures.is_empty() {
        println!("no recent exposures to review");
        return ExitCode::SUCCESS;
    }

    let now = now_secs();
    println!("{:<40} {:>12} {:>10}", "INSIGHT", "RELIABILITY", "VALIDATED");
    for exposure in &exposures {
        let Some(insight) = store.get(&exposure.insight_key) else { continue };
        let reliability = insight.effective_reliability(now);
        let snippet: String = insight.text.chars().take(38).collect();
        println!("{:<40} {:>12.2} {:>10}", snippet, reliability, insight.times_validated);
    }
    ExitCode::SUCCESS
}

fn cmd_promote_dry_run(home: &std::path::Path) -> ExitCode {
    let store = match CognitiveStore::open(home.join("cognitive_insights.json")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::from(1);
        }
    };
    let (baseline_path, runtime_path) = spark_core::config::default_paths();
    let tuneables = TuneablesRegistry::open(baseline_path, runtime_path).snapshot();

    let candidates = pipeline::select_candidates(&store, &tuneables, now_secs());
    if candidates.is_empty() {
        println!("no insights currently clear the promotion bar");
        return ExitCode::SUCCESS;
    }

    print!("{}", pipeline::render_markdown(&candidates));
    println!("(dry run: {} candidate(s), nothing written)", candidates.len());
    ExitCode::SUCCESS
}

fn cmd_semantic_reindex(home: &std::path::Path) -> ExitCode {
    let store = match CognitiveStore::open(home.join("cognitive_insights.json")) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::from(1);
        }
    };
    let index = match SemanticIndex::open(home.join("semantic_index.sqlite3")) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("failed to open semantic index: {e}");
            return ExitCode::from(1);
        }
    };

    let mut indexed = 0usize;
    for key in store.keys() {
        let Some(insight) = store.get(&key) else { continue };
        let record = spark_core::MemoryRecord {
            id: insight.key.clone(),
            content: insight.text.clone(),
            scope: "global".to_string(),
            project_key: "default".to_string(),
            category: format!("{:?}", insight.category),
            created_at: insight.created_at,
            source: insight.source.clone(),
            meta: serde_json::json!({ "reliability": insight.effective_reliability(now_secs()) }),
        };
        if let Err(e) = index.index(&record) {
            eprintln!("failed to index {key}: {e}");
            continue;
        }
        indexed += 1;
    }

    println!("reindexed {indexed} insight(s)");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["spark", "status"]).expect("parse status");
        assert!(matches!(cli.command, Commands::Status));

        let cli = Cli::try_parse_from(["spark", "promote-dry-run"]).expect("parse promote-dry-run");
        assert!(matches!(cli.command, Commands::PromoteDryRun));
    }

    #[test]
    fn clap_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["spark", "not-a-command"]).is_err());
    }
}
