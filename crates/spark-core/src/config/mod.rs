//! Tuneables registry (C2): five-source layered resolution — schema
//! default, the versioned baseline file, the runtime override file, and
//! an explicit per-key env override — with a polling hot-reload watcher.
//!
//! Grounded in `original_source/lib/config_authority.py::resolve_section`
//! for the precedence order and `crates/pagi-core/src/config.rs`'s
//! `env_bool`/`env_opt_string` helper style for the env layer, and in
//! `crates/pagi-core/src/hot_reload.rs`'s polling-thread shape for the
//! watcher (generalized from "recompile a skill" to "re-read tuneables
//! and diff sections").

mod schema;

pub use schema::{TuneableSpec, TuneableValue, SCHEMA};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

/// A resolved tuneables tree: `section -> key -> value`. Reads fall back
/// to the schema default for any key the loaded files didn't specify.
#[derive(Debug, Clone, Default)]
pub struct Tuneables {
    sections: HashMap<String, HashMap<String, TuneableValue>>,
}

impl Tuneables {
    fn get(&self, section: &str, key: &str) -> TuneableValue {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .copied()
            .unwrap_or_else(|| {
                schema::SCHEMA
                    .get(section)
                    .and_then(|s| s.get(key))
                    .map(|spec| spec.default)
                    .unwrap_or(TuneableValue::Float(0.0))
            })
    }

    pub fn get_f64(&self, section: &str, key: &str) -> f64 {
        self.get(section, key).as_f64()
    }

    pub fn get_i64(&self, section: &str, key: &str) -> i64 {
        self.get(section, key).as_i64()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> bool {
        self.get(section, key).as_bool()
    }
}

/// Reads an env var and maps it onto `section.key` if present, applying
/// the spec's clamp. Mirrors `env_bool`/`env_opt_string` in
/// `crates/pagi-core/src/config.rs` but keyed by tuneables path rather
/// than struct field.
pub struct EnvOverride {
    pub env_name: &'static str,
    pub section: &'static str,
    pub key: &'static str,
}

fn default_env_overrides() -> Vec<EnvOverride> {
    vec![
        EnvOverride { env_name: "SPARK_GATE_THRESHOLD", section: "values", key: "gate_threshold" },
        EnvOverride { env_name: "SPARK_CONFIDENCE_THRESHOLD", section: "values", key: "confidence_threshold" },
        EnvOverride { env_name: "SPARK_SEMANTIC_ENABLED", section: "semantic", key: "enabled" },
        EnvOverride { env_name: "SPARK_MMR_LAMBDA", section: "semantic", key: "mmr_lambda" },
        EnvOverride { env_name: "SPARK_PROMOTION_RELIABILITY_MIN", section: "promotion", key: "reliability_min" },
    ]
}

/// Coordinates loading, hot-reload, and callback dispatch for the
/// tuneables tree. One instance per process; `spark-daemon` owns it and
/// `spark-cli` opens a throwaway instance for read-only inspection.
pub struct TuneablesRegistry {
    baseline_path: PathBuf,
    runtime_path: PathBuf,
    env_overrides: Vec<EnvOverride>,
    current: RwLock<Tuneables>,
    last_runtime_mtime: RwLock<Option<SystemTime>>,
    callbacks: RwLock<Vec<Box<dyn Fn(&str, &Tuneables) + Send + Sync>>>,
}

impl TuneablesRegistry {
    pub fn open(baseline_path: impl Into<PathBuf>, runtime_path: impl Into<PathBuf>) -> Self {
        let registry = Self {
            baseline_path: baseline_path.into(),
            runtime_path: runtime_path.into(),
            env_overrides: default_env_overrides(),
            current: RwLock::new(Tuneables::default()),
            last_runtime_mtime: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
        };
        registry.reload();
        registry
    }

    pub fn snapshot(&self) -> Tuneables {
        self.current.read().unwrap().clone()
    }

    /// Registers a callback invoked with the section name and the new
    /// tree whenever that section's resolved values change. Callback
    /// errors (panics are not caught; callers must not panic) never
    /// abort dispatch to the remaining callbacks.
    pub fn on_change(&self, callback: impl Fn(&str, &Tuneables) + Send + Sync + 'static) {
        self.callbacks.write().unwrap().push(Box::new(callback));
    }

    /// Re-reads baseline and runtime files, recomputes every key via the
    /// four-source precedence, and dispatches changed sections to
    /// registered callbacks. Called unconditionally at construction and
    /// from `poll_for_changes` when the runtime file's mtime moved.
    pub fn reload(&self) {
        let baseline = read_json(&self.baseline_path);
        let runtime = read_json(&self.runtime_path);
        let next = self.resolve(&baseline, &runtime);

        let previous = self.current.read().unwrap().clone();
        let changed_sections = diff_sections(&previous, &next);

        *self.current.write().unwrap() = next.clone();

        for section in changed_sections {
            for callback in self.callbacks.read().unwrap().iter() {
                callback(&section, &next);
            }
        }
    }

    fn resolve(&self, baseline: &serde_json::Value, runtime: &serde_json::Value) -> Tuneables {
        let mut sections = HashMap::new();
        for (section_name, spec_map) in schema::SCHEMA.iter() {
            let mut resolved = HashMap::new();
            for (key, spec) in spec_map.iter() {
                let mut value = spec.default;
                if let Some(raw) = baseline.get(section_name).and_then(|s| s.get(key)) {
                    if let Some(coerced) = spec.coerce(raw) {
                        value = coerced;
                    }
                }
                if let Some(raw) = runtime.get(section_name).and_then(|s| s.get(key)) {
                    if let Some(coerced) = spec.coerce(raw) {
                        value = coerced;
                    }
                }
                resolved.insert((*key).to_string(), value);
            }
            sections.insert((*section_name).to_string(), resolved);
        }

        for over in &self.env_overrides {
            if let Ok(raw) = std::env::var(over.env_name) {
                if let Some(spec) = schema::SCHEMA.get(over.section).and_then(|s| s.get(over.key)) {
                    if let Some(coerced) = spec.coerce(&serde_json::Value::String(raw)) {
                        sections
                            .entry(over.section.to_string())
                            .or_default()
                            .insert(over.key.to_string(), coerced);
                    }
                }
            }
        }

        Tuneables { sections }
    }

    /// Polls the runtime file's mtime and reloads if it moved since the
    /// last check. Intended to be called from a daemon background tick.
    pub fn poll_for_changes(&self) {
        let mtime = std::fs::metadata(&self.runtime_path).and_then(|m| m.modified()).ok();
        let mut last = self.last_runtime_mtime.write().unwrap();
        if mtime != *last {
            *last = mtime;
            drop(last);
            self.reload();
        }
    }

    /// Strips keys from the runtime file whose value matches the
    /// resolved baseline (schema default merged with baseline file), so
    /// a later code-changed default automatically propagates instead of
    /// staying pinned by a stale runtime override.
    pub fn reconcile(&self) -> std::io::Result<()> {
        let baseline = read_json(&self.baseline_path);
        let mut runtime = read_json(&self.runtime_path);
        let Some(runtime_obj) = runtime.as_object_mut() else { return Ok(()) };

        for (section_name, spec_map) in schema::SCHEMA.iter() {
            let Some(section_runtime) = runtime_obj.get_mut(*section_name).and_then(|v| v.as_object_mut()) else {
                continue;
            };
            let mut to_remove = Vec::new();
            for (key, spec) in spec_map.iter() {
                let baseline_value = baseline
                    .get(section_name)
                    .and_then(|s| s.get(key))
                    .and_then(|raw| spec.coerce(raw))
                    .unwrap_or(spec.default);
                if let Some(runtime_raw) = section_runtime.get(*key) {
                    if spec.coerce(runtime_raw) == Some(baseline_value) {
                        to_remove.push(key.to_string());
                    }
                }
            }
            for key in to_remove {
                section_runtime.remove(&key);
            }
        }

        if let Some(parent) = self.runtime_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.runtime_path, serde_json::to_string_pretty(&runtime)?)
    }
}

fn diff_sections(previous: &Tuneables, next: &Tuneables) -> HashSet<String> {
    let mut changed = HashSet::new();
    let all_sections: HashSet<&String> = previous
        .sections
        .keys()
        .chain(next.sections.keys())
        .collect();
    for section in all_sections {
        if previous.sections.get(section) != next.sections.get(section) {
            changed.insert(section.clone());
        }
    }
    changed
}

fn read_json(path: &Path) -> serde_json::Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_default_used_when_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TuneablesRegistry::open(dir.path().join("baseline.json"), dir.path().join("runtime.json"));
        let t = registry.snapshot();
        assert!((t.get_f64("values", "gate_threshold") - 0.45).abs() < 1e-9);
    }

    #[test]
    fn runtime_file_overrides_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.json");
        let runtime = dir.path().join("runtime.json");
        std::fs::write(&baseline, r#"{"values": {"gate_threshold": 0.3}}"#).unwrap();
        std::fs::write(&runtime, r#"{"values": {"gate_threshold": 0.9}}"#).unwrap();
        let registry = TuneablesRegistry::open(baseline, runtime);
        let t = registry.snapshot();
        assert!((t.get_f64("values", "gate_threshold") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_value_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.json");
        let runtime = dir.path().join("runtime.json");
        std::fs::write(&baseline, r#"{"values": {"gate_threshold": 5.0}}"#).unwrap();
        let registry = TuneablesRegistry::open(baseline, runtime);
        let t = registry.snapshot();
        assert!((t.get_f64("values", "gate_threshold") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reload_dispatches_only_changed_sections() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("baseline.json");
        let runtime = dir.path().join("runtime.json");
        let registry = TuneablesRegistry::open(&baseline, &runtime);

        let seen = std::sync::Arc::new(RwLock::new(Vec::new()));
        let seen_clone = seen.clone();
        registry.on_change(move |section, _| seen_clone.write().unwrap().push(section.to_string()));

        std::fs::write(&runtime, r#"{"semantic": {"mmr_lambda": 0.9}}"#).unwrap();
        registry.reload();

        let seen = seen.read().unwrap();
        assert!(seen.contains(&"semantic".to_string()));
        assert!(!seen.contains(&"promotion".to_string()));
    }
}

/// Default baseline/runtime file locations: the versioned baseline ships
/// at `config/tuneables.json`, the runtime override lives under
/// `$SPARK_HOME` (default `~/.spark`).
pub fn default_paths() -> (PathBuf, PathBuf) {
    let home = std::env::var("SPARK_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_home().join(".spark"));
    (PathBuf::from("config/tuneables.json"), home.join("tuneables.json"))
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}
