//! Compile-time tuneables schema: `section -> key -> {type, default, min,
//! max, enum}`. Single source of truth, grounded in
//! `original_source/lib/tuneables_schema.py::SCHEMA`. A subset of the
//! original's sections is carried here — the ones Spark's components
//! actually consume (`values`, `semantic`, `promotion`, `evolution`).

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuneableValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl TuneableValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            TuneableValue::Int(i) => *i as f64,
            TuneableValue::Float(f) => *f,
            TuneableValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            TuneableValue::Int(i) => *i,
            TuneableValue::Float(f) => *f as i64,
            TuneableValue::Bool(b) => *b as i64,
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            TuneableValue::Bool(b) => *b,
            TuneableValue::Int(i) => *i != 0,
            TuneableValue::Float(f) => *f != 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TuneableSpec {
    pub default: TuneableValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl TuneableSpec {
    const fn new(default: TuneableValue, min: Option<f64>, max: Option<f64>) -> Self {
        Self { default, min, max }
    }

    /// Coerces and clamps a raw JSON value against this spec. Returns
    /// `None` (and the caller logs a warning) if the type is irreconcilable.
    pub fn coerce(&self, raw: &serde_json::Value) -> Option<TuneableValue> {
        let value = match self.default {
            TuneableValue::Int(_) => TuneableValue::Int(raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64))?),
            TuneableValue::Float(_) => TuneableValue::Float(raw.as_f64()?),
            TuneableValue::Bool(_) => TuneableValue::Bool(raw.as_bool()?),
        };
        Some(self.clamp(value))
    }

    pub fn clamp(&self, value: TuneableValue) -> TuneableValue {
        match value {
            TuneableValue::Int(i) => {
                let mut v = i;
                if let Some(min) = self.min {
                    v = v.max(min as i64);
                }
                if let Some(max) = self.max {
                    v = v.min(max as i64);
                }
                TuneableValue::Int(v)
            }
            TuneableValue::Float(f) => {
                let mut v = f;
                if let Some(min) = self.min {
                    v = v.max(min);
                }
                if let Some(max) = self.max {
                    v = v.min(max);
                }
                TuneableValue::Float(v)
            }
            TuneableValue::Bool(b) => TuneableValue::Bool(b),
        }
    }
}

pub type Section = HashMap<&'static str, TuneableSpec>;

pub static SCHEMA: Lazy<HashMap<&'static str, Section>> = Lazy::new(|| {
    use TuneableValue::*;
    let mut schema = HashMap::new();

    let mut values = HashMap::new();
    values.insert("min_occurrences", TuneableSpec::new(Int(1), Some(1.0), Some(100.0)));
    values.insert("confidence_threshold", TuneableSpec::new(Float(0.6), Some(0.0), Some(1.0)));
    values.insert("gate_threshold", TuneableSpec::new(Float(0.45), Some(0.0), Some(1.0)));
    values.insert("queue_batch_size", TuneableSpec::new(Int(100), Some(50.0), Some(1000.0)));
    schema.insert("values", values);

    let mut semantic = HashMap::new();
    semantic.insert("enabled", TuneableSpec::new(Bool(true), None, None));
    semantic.insert("min_similarity", TuneableSpec::new(Float(0.5), Some(0.0), Some(1.0)));
    semantic.insert("min_fusion_score", TuneableSpec::new(Float(0.5), Some(0.0), Some(1.0)));
    semantic.insert("weight_recency", TuneableSpec::new(Float(0.1), Some(0.0), Some(1.0)));
    semantic.insert("weight_outcome", TuneableSpec::new(Float(0.45), Some(0.0), Some(1.0)));
    semantic.insert("mmr_lambda", TuneableSpec::new(Float(0.5), Some(0.0), Some(1.0)));
    semantic.insert("dedupe_similarity", TuneableSpec::new(Float(0.88), Some(0.0), Some(1.0)));
    semantic.insert("lexical_weight", TuneableSpec::new(Float(0.6), Some(0.0), Some(1.0)));
    semantic.insert("cosine_weight", TuneableSpec::new(Float(0.4), Some(0.0), Some(1.0)));
    semantic.insert("graph_seed_weight", TuneableSpec::new(Float(0.15), Some(0.0), Some(1.0)));
    schema.insert("semantic", semantic);

    let mut promotion = HashMap::new();
    promotion.insert("reliability_min", TuneableSpec::new(Float(0.7), Some(0.0), Some(1.0)));
    promotion.insert("validations_min", TuneableSpec::new(Int(3), Some(1.0), Some(100.0)));
    promotion.insert("confidence_min", TuneableSpec::new(Float(0.9), Some(0.0), Some(1.0)));
    promotion.insert("min_age_secs", TuneableSpec::new(Int(7200), Some(0.0), Some(86_400.0)));
    promotion.insert("per_adapter_budget", TuneableSpec::new(Int(20), Some(1.0), Some(500.0)));
    schema.insert("promotion", promotion);

    let mut evolution = HashMap::new();
    evolution.insert("promotion_threshold", TuneableSpec::new(Float(0.55), Some(0.4), Some(0.7)));
    evolution.insert("adjustment_step", TuneableSpec::new(Float(0.05), Some(0.0), Some(0.2)));
    schema.insert("evolution", evolution);

    schema
});

pub fn section_defaults(section: &str) -> HashMap<&'static str, TuneableValue> {
    SCHEMA
        .get(section)
        .map(|s| s.iter().map(|(k, spec)| (*k, spec.default)).collect())
        .unwrap_or_default()
}
