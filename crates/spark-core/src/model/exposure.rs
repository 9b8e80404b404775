//! Exposure/Prediction/Outcome records (C8) plus the gate's `RoastVerdict`
//! (C5) and the promotion candidate shape (C10). Grouped in one file the
//! way the teacher groups small, related record types together rather
//! than giving each its own module.

use serde::{Deserialize, Serialize};

/// Recorded whenever an insight is surfaced to a consumer. Ring-bounded
/// JSONL, never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exposure {
    pub insight_key: String,
    pub timestamp: i64,
    pub session_id: String,
    pub trace_id: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Pos,
    Neg,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    FailurePattern,
    Workflow,
    Preference,
    Principle,
    General,
}

impl PredictionType {
    /// Per-type match window, in seconds: principles get a week, failure
    /// patterns must be confirmed within half an hour.
    pub fn match_window_secs(self) -> i64 {
        match self {
            PredictionType::Principle => 7 * 24 * 3600,
            PredictionType::FailurePattern => 30 * 60,
            PredictionType::Workflow => 2 * 3600,
            PredictionType::Preference => 24 * 3600,
            PredictionType::General => 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub insight_key: String,
    pub text: String,
    pub expected_polarity: Polarity,
    #[serde(rename = "type")]
    pub kind: PredictionType,
    pub created_at: i64,
    pub expires_at: i64,
    pub source: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_id: Option<String>,
}

impl Prediction {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_matched(&self) -> bool {
        self.outcome_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub text: String,
    pub polarity: Polarity,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_insights: Vec<String>,
}

/// Verdict produced by the quality gate (C5). `NeedsWork`/`Quality` carry
/// the refined text when the gate was able to repair the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RoastVerdict {
    Primitive,
    Duplicate,
    NeedsWork {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refined: Option<String>,
    },
    Quality {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refined: Option<String>,
    },
}

impl RoastVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RoastVerdict::Primitive | RoastVerdict::Duplicate)
    }

    /// The text to store: the refined variant if present, else `None`
    /// meaning "use the original candidate text unchanged".
    pub fn refined_text(&self) -> Option<&str> {
        match self {
            RoastVerdict::NeedsWork { refined } | RoastVerdict::Quality { refined } => {
                refined.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
    AutoSaved,
}

/// A candidate durable memory awaiting promotion review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub insight_key: String,
    pub status: SuggestionStatus,
    pub score: f64,
    pub breakdown: serde_json::Value,
}
