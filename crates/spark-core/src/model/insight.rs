//! `Insight`: a durable cognitive record owned exclusively by the store
//! (C3). Reliability and decay formulas are grounded verbatim in
//! `original_source/lib/cognitive_learner.py`'s `CognitiveInsight`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const EVIDENCE_RING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SelfAwareness,
    UserUnderstanding,
    Reasoning,
    Context,
    Wisdom,
    MetaLearning,
    Communication,
    Creativity,
}

impl Category {
    /// Decay half-life in days, grounded in `_half_life_days`.
    pub fn half_life_days(self) -> f64 {
        match self {
            Category::UserUnderstanding => 90.0,
            Category::Communication => 60.0,
            Category::Wisdom => 180.0,
            Category::MetaLearning => 120.0,
            Category::SelfAwareness => 60.0,
            Category::Reasoning => 60.0,
            Category::Context => 45.0,
            Category::Creativity => 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDomain {
    Code,
    DepthTraining,
    UserContext,
    System,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub key: String,
    pub category: Category,
    pub text: String,
    pub context: String,
    pub confidence: f64,
    pub evidence: VecDeque<String>,
    pub counter_examples: VecDeque<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<i64>,
    pub times_validated: u64,
    pub times_contradicted: u64,
    pub promoted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
    pub source: String,
    pub action_domain: ActionDomain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory_quality: Option<serde_json::Value>,
    pub advisory_readiness: f64,
}

impl Insight {
    /// Builds the storage key `"{category}:{slug[:50]}"`, normalizing the
    /// slug the same way across every caller so lookups are consistent.
    pub fn key_for(category: Category, text: &str) -> String {
        let slug: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .split('_')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        let slug: String = slug.chars().take(50).collect();
        format!("{category:?}:{slug}", category = category)
    }

    pub fn new(
        category: Category,
        text: impl Into<String>,
        context: impl Into<String>,
        source: impl Into<String>,
        action_domain: ActionDomain,
        created_at: i64,
    ) -> Self {
        let text = truncate_chars(text.into(), 2000);
        let key = Self::key_for(category, &text);
        Self {
            key,
            category,
            text,
            context: context.into(),
            confidence: 0.5,
            evidence: VecDeque::new(),
            counter_examples: VecDeque::new(),
            created_at,
            last_validated_at: None,
            times_validated: 0,
            times_contradicted: 0,
            promoted: false,
            promoted_to: None,
            source: source.into(),
            action_domain,
            emotion_state: None,
            advisory_quality: None,
            advisory_readiness: 0.0,
        }
    }

    pub fn push_evidence(&mut self, line: impl Into<String>) {
        push_ring(&mut self.evidence, line.into());
    }

    pub fn push_counter_example(&mut self, line: impl Into<String>) {
        push_ring(&mut self.counter_examples, line.into());
    }

    /// `c ← c + (1-c)·0.25` — good-outcome boost.
    pub fn boost_confidence(&mut self) {
        self.confidence += (1.0 - self.confidence) * 0.25;
    }

    /// `c ← max(0.1, 0.85·c)` — bad-outcome decay.
    pub fn decay_confidence(&mut self) {
        self.confidence = (0.85 * self.confidence).max(0.1);
    }

    /// Discounts reliability for telemetry/test-like insights so
    /// auto-counted validation events don't look equivalent to
    /// outcome-backed, human-useful validation. Grounded verbatim in
    /// `_validation_quality_weight`.
    fn validation_quality_weight(&self) -> f64 {
        let text = self.text.trim().to_lowercase();
        let mut weight = 1.0_f64;

        if text.starts_with("test:") {
            weight *= 0.05;
        }
        if text.len() > 400 {
            weight *= 0.2;
        }
        if self.category == Category::SelfAwareness
            && text.contains("i struggle with")
            && is_low_signal_struggle(&text)
        {
            weight *= 0.15;
        }

        let ev: Vec<&str> = self
            .evidence
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();
        if !ev.is_empty() {
            let auto_count = ev.iter().filter(|e| is_auto_evidence_line(e)).count();
            let auto_ratio = auto_count as f64 / ev.len() as f64;
            if auto_ratio >= 0.5 {
                weight *= 0.25;
            }
        }

        weight.clamp(0.05, 1.0)
    }

    /// Weighted `validated/(validated+contradicted)`, falling back to a
    /// confidence-derived estimate before any validation has happened.
    pub fn reliability(&self) -> f64 {
        let weight = self.validation_quality_weight();
        let weighted_validated = self.times_validated as f64 * weight;
        let total = weighted_validated + self.times_contradicted as f64;
        if total == 0.0 {
            (self.confidence * weight).clamp(0.05, 0.99)
        } else {
            weighted_validated / total
        }
    }

    /// `reliability · 2^(-age_days/half_life(category))`, clamped to [0,1].
    pub fn effective_reliability(&self, now: i64) -> f64 {
        let age_days = ((now - self.created_at).max(0) as f64) / 86_400.0;
        let half_life = self.category.half_life_days().max(1.0);
        let decay = 0.5_f64.powf(age_days / half_life);
        (self.reliability() * decay).clamp(0.0, 1.0)
    }
}

fn push_ring(ring: &mut VecDeque<String>, value: String) {
    if ring.len() >= EVIDENCE_RING {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}

const NOISY_STRUGGLE_TOKENS: &[&str] = &[
    "_error",
    "mcp__",
    "command_not_found",
    "permission_denied",
    "file_not_found",
    "timeout",
    "syntax_error",
    "fails with",
];

fn is_low_signal_struggle(text: &str) -> bool {
    NOISY_STRUGGLE_TOKENS.iter().any(|t| text.contains(t))
}

fn is_auto_evidence_line(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    t.starts_with("auto-linked from ")
        || t.starts_with("tool=")
        || t.contains(" success=true")
        || t.contains(" success=false")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(category: Category) -> Insight {
        Insight::new(category, "prefer concise commit messages", "ctx", "adapter", ActionDomain::General, 0)
    }

    #[test]
    fn reliability_before_any_validation_uses_confidence() {
        let i = sample(Category::Reasoning);
        assert!((i.reliability() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reliability_after_validations_uses_weighted_ratio() {
        let mut i = sample(Category::Reasoning);
        i.times_validated = 4;
        i.times_contradicted = 1;
        assert!((i.reliability() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_prefixed_text_is_heavily_discounted() {
        let mut i = sample(Category::Reasoning);
        i.text = "test: scripted validation".to_string();
        i.times_validated = 10;
        assert!(i.reliability() < 0.2);
    }

    #[test]
    fn effective_reliability_decays_with_age() {
        let mut i = sample(Category::Context); // 45-day half-life
        i.times_validated = 10;
        let fresh = i.effective_reliability(0);
        i.created_at = 0;
        let old = i.effective_reliability(45 * 86_400);
        assert!((old - fresh / 2.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_boost_and_decay_match_formula() {
        let mut i = sample(Category::Wisdom);
        i.confidence = 0.5;
        i.boost_confidence();
        assert!((i.confidence - 0.625).abs() < 1e-9);
        i.confidence = 0.5;
        i.decay_confidence();
        assert!((i.confidence - 0.425).abs() < 1e-9);
    }

    #[test]
    fn key_for_truncates_and_normalizes() {
        let key = Insight::key_for(Category::Reasoning, "Prefer Concise Commit Messages!!");
        assert!(key.starts_with("Reasoning:"));
        assert!(key.len() <= "Reasoning:".len() + 50);
    }
}
