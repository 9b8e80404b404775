//! `ContradictionType` and `Contradiction`: the record produced by the
//! contradiction & decay manager (C9). Grounded in
//! `original_source/lib/contradiction_detector.py`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionType {
    Direct,
    Temporal,
    Contextual,
    Uncertain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub old_key: String,
    pub new_text: String,
    pub contradiction_type: ContradictionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_type: Option<String>,
    pub created_at: i64,
}
