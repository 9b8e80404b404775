//! Shared data model for the Spark spine: the types C1-C11 pass between
//! each other. Mirrors the teacher's `knowledge::store` module layout —
//! one file per record family, tagged enums with `snake_case` wire
//! representations, small inherent `impl` blocks rather than free functions.

mod contradiction;
mod event;
mod exposure;
mod insight;

pub use contradiction::{Contradiction, ContradictionType};
pub use event::{Event, EventKind, Priority};
pub use exposure::{
    Exposure, Outcome, Polarity, Prediction, PredictionType, RoastVerdict, Suggestion,
    SuggestionStatus,
};
pub use insight::{ActionDomain, Category, Insight};
