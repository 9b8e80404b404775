//! spark-core: event queue, tuneables registry, cognitive store, semantic
//! index, quality gate, validate-and-store write path, and the
//! contradiction/decay manager. Everything `spark-pipeline` and
//! `spark-daemon` build cycles on top of.

pub mod config;
pub mod contradiction;
pub mod error;
pub mod gate;
pub mod index;
pub mod jsonl;
pub mod lock;
pub mod model;
pub mod queue;
pub mod store;
pub mod validate;

pub use config::{Tuneables, TuneablesRegistry};
pub use contradiction::check_contradiction;
pub use error::{ConfigValidationWarning, GateError, IndexError, QueueError, StoreError};
pub use gate::{roast, AdvisoryQuality, AdvisoryQualityProvider};
pub use index::{EmbeddingProvider, MemoryRecord, RetrievalOptions, ScoredMemory, SemanticIndex};
pub use lock::FileLock;
pub use model::{
    ActionDomain, Category, Contradiction, ContradictionType, Event, EventKind, Exposure, Insight,
    Outcome, Polarity, Prediction, PredictionType, Priority, RoastVerdict, Suggestion,
    SuggestionStatus,
};
pub use queue::{EventQueue, QueueLimits};
pub use store::CognitiveStore;
pub use validate::{Telemetry, ValidateAndStore, ValidationCounters};
