//! Error kinds for the Spark core spine.
//!
//! Every component has its own `thiserror` enum with one variant per
//! failure mode it can actually produce, matching the rest of the crate's
//! error style (see `qdrant_sidecar::QdrantError` in the teacher's lineage).
//! None of these propagate past their component boundary as a panic.

use thiserror::Error;

/// Failures from the event queue (C1).
///
/// `Locked` is not necessarily terminal: `capture()` falls back to the
/// overflow sidecar and only returns this when both locks are unavailable.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is locked: {0}")]
    Locked(String),
    #[error("queue file is corrupt: {0}")]
    Corrupt(String),
    #[error("queue unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
}

/// Failures from the cognitive store (C3).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store file is corrupt: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failures from the quality gate (C5). `Roast` is the `RoastException`
/// kind from the spec's error-handling design: a returned value, not a
/// thrown exception, so `Validate-and-Store` (C6) can match on it.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("roast failed: {0}")]
    Roast(String),
}

/// Failures from the semantic index (C4).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding backend unavailable")]
    EmbeddingUnavailable,
}

/// Non-fatal configuration problems (C2). Accumulated on a
/// `ValidationResult`, never aborts a load; clamped values are preferred
/// over rejected ones.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("config validation warning: {0}")]
pub struct ConfigValidationWarning(pub String);
