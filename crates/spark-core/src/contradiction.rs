//! Contradiction & decay manager (C9): `check_contradiction` flags new
//! candidate text that lexically opposes an existing, topically-similar
//! insight. Grounded in
//! `original_source/lib/contradiction_detector.py`.

use crate::model::{Contradiction, ContradictionType, Insight};

const PAIRED_OPPOSITIONS: &[(&str, &str)] = &[
    ("prefer", "avoid"),
    ("like", "hate"),
    ("always", "never"),
    ("should", "should not"),
    ("enable", "disable"),
];

/// Finds the most topically-similar existing insight whose text lexically
/// opposes `new_text`, if any, and classifies the contradiction.
pub fn check_contradiction<'a>(
    new_text: &str,
    candidates: impl Iterator<Item = &'a Insight>,
    min_similarity: f64,
    now: i64,
) -> Option<Contradiction> {
    let new_tokens = topic_tokens(new_text);
    let new_lower = new_text.to_lowercase();

    let mut best: Option<(&Insight, f64)> = None;
    for candidate in candidates {
        let sim = jaccard(&new_tokens, &topic_tokens(&candidate.text));
        if sim < min_similarity {
            continue;
        }
        if best.map(|(_, s)| sim > s).unwrap_or(true) {
            best = Some((candidate, sim));
        }
    }

    let (matched, _) = best?;
    let old_lower = matched.text.to_lowercase();
    if !is_lexical_opposition(&new_lower, &old_lower) {
        return None;
    }

    Some(Contradiction {
        old_key: matched.key.clone(),
        new_text: new_text.to_string(),
        contradiction_type: classify(&new_lower, &old_lower),
        resolution_type: None,
        created_at: now,
    })
}

fn is_lexical_opposition(a: &str, b: &str) -> bool {
    for (x, y) in PAIRED_OPPOSITIONS {
        if (a.contains(x) && b.contains(y)) || (a.contains(y) && b.contains(x)) {
            return true;
        }
    }
    is_asymmetric_negation(a, b)
}

/// Detects e.g. "use X" vs "don't use X" / "never use X" pairs that
/// share most tokens but differ in polarity.
fn is_asymmetric_negation(a: &str, b: &str) -> bool {
    const NEGATORS: &[&str] = &["not", "don't", "never", "avoid", "no longer"];
    let a_negated = NEGATORS.iter().any(|n| a.contains(n));
    let b_negated = NEGATORS.iter().any(|n| b.contains(n));
    if a_negated == b_negated {
        return false;
    }
    jaccard(&topic_tokens(a), &topic_tokens(b)) >= 0.5
}

fn classify(new_lower: &str, old_lower: &str) -> ContradictionType {
    let combined = format!("{new_lower} {old_lower}");
    if ["now", "currently", "recently", "changed", "updated"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return ContradictionType::Temporal;
    }
    if ["when", "if", "during", "for", "in case of", "sometimes"]
        .iter()
        .any(|w| combined.contains(w))
    {
        return ContradictionType::Contextual;
    }
    if is_mutually_exclusive(new_lower, old_lower) {
        return ContradictionType::Direct;
    }
    ContradictionType::Uncertain
}

fn is_mutually_exclusive(a: &str, b: &str) -> bool {
    PAIRED_OPPOSITIONS
        .iter()
        .any(|(x, y)| (a.contains(x) && b.contains(y)) || (a.contains(y) && b.contains(x)))
}

fn topic_tokens(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

/// Applies a resolution action to the old insight's validation counters.
/// `update` decrements the old insight's validations; the other actions
/// (`context`, `keep_both`, `discard_new`) don't touch stored counters
/// and are recorded purely for audit via the `Contradiction` record.
pub fn apply_resolution(old: &mut Insight, resolution: &str) {
    if resolution == "update" && old.times_validated > 0 {
        old.times_validated -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionDomain, Category};

    fn insight(text: &str) -> Insight {
        Insight::new(Category::UserUnderstanding, text, "ctx", "src", ActionDomain::General, 0)
    }

    #[test]
    fn detects_direct_opposition_via_paired_vocabulary() {
        let existing = insight("User prefers verbose commit messages with full context");
        let candidates = vec![existing];
        let result = check_contradiction(
            "User avoids verbose commit messages with full context",
            candidates.iter(),
            0.3,
            100,
        );
        assert!(result.is_some());
    }

    #[test]
    fn no_contradiction_when_topically_unrelated() {
        let existing = insight("User prefers dark mode in the editor");
        let candidates = vec![existing];
        let result = check_contradiction("Always validate inputs at system boundaries", candidates.iter(), 0.3, 100);
        assert!(result.is_none());
    }

    #[test]
    fn classifies_temporal_contradiction() {
        let existing = insight("User prefers terse pull request descriptions");
        let candidates = vec![existing];
        let result = check_contradiction(
            "User now avoids terse pull request descriptions entirely",
            candidates.iter(),
            0.2,
            100,
        )
        .unwrap();
        assert_eq!(result.contradiction_type, ContradictionType::Temporal);
    }
}
