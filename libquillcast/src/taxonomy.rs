//! Category and topic matching
//!
//! The platform's category list is operator-managed free text, so the
//! desired category rarely matches a node exactly. Matching is a cascade
//! of progressively looser comparisons; when nothing matches, the caller
//! is told to create the category rather than silently mis-filing the
//! post. Topic selection maps a classifier's free-text answer back onto
//! the fixed topic list the same way.

use tracing::debug;

/// What the publisher should do with the category control.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryAction {
    /// Select this existing category, by its exact visible label.
    Select(String),
    /// No node matched: create the category, then select it.
    CreateThenSelect(String),
}

/// Resolve a desired category against the platform's visible category list.
///
/// Cascade, loosest last: exact, prefix-stripped exact, substring either
/// way, separator-normalized, configured fallback bucket, first
/// non-placeholder node. Only a fully empty list yields CreateThenSelect.
pub fn resolve_category(
    desired: &str,
    available: &[String],
    fallback: Option<&str>,
) -> CategoryAction {
    let desired = desired.trim();

    if let Some(found) = available.iter().find(|c| c.trim() == desired) {
        return CategoryAction::Select(found.clone());
    }

    // Platforms prefix nested nodes with their parent path
    let stripped = strip_prefix_path(desired);
    if let Some(found) = available
        .iter()
        .find(|c| strip_prefix_path(c.trim()) == stripped)
    {
        debug!(desired, matched = %found, "category matched after prefix strip");
        return CategoryAction::Select(found.clone());
    }

    let desired_lower = desired.to_lowercase();
    if let Some(found) = available.iter().find(|c| {
        let c = c.trim().to_lowercase();
        c.contains(&desired_lower) || desired_lower.contains(&c)
    }) {
        debug!(desired, matched = %found, "category matched by substring");
        return CategoryAction::Select(found.clone());
    }

    let desired_norm = normalize_separators(&desired_lower);
    if let Some(found) = available
        .iter()
        .find(|c| normalize_separators(&c.trim().to_lowercase()) == desired_norm)
    {
        debug!(desired, matched = %found, "category matched after separator normalization");
        return CategoryAction::Select(found.clone());
    }

    if let Some(fallback) = fallback {
        if let Some(found) = available.iter().find(|c| c.trim() == fallback.trim()) {
            debug!(desired, fallback, "category fell back to configured bucket");
            return CategoryAction::Select(found.clone());
        }
    }

    if let Some(found) = available.iter().find(|c| !is_placeholder(c)) {
        debug!(desired, matched = %found, "category fell back to first real node");
        return CategoryAction::Select(found.clone());
    }

    CategoryAction::CreateThenSelect(desired.to_string())
}

/// Map a classifier's free-text answer back onto the fixed topic list.
///
/// Exact match first, then case-insensitive containment, then a
/// keyword-frequency vote over the answer text, finally the first topic.
pub fn select_topic<'a>(answer: &str, topics: &'a [String]) -> Option<&'a String> {
    if topics.is_empty() {
        return None;
    }

    let answer = answer.trim();
    if let Some(topic) = topics.iter().find(|t| t.trim() == answer) {
        return Some(topic);
    }

    let answer_lower = answer.to_lowercase();
    if let Some(topic) = topics.iter().find(|t| {
        let t = t.trim().to_lowercase();
        answer_lower.contains(&t) || t.contains(&answer_lower)
    }) {
        return Some(topic);
    }

    // Frequency vote: which topic's words occur most often in the answer
    let best = topics
        .iter()
        .map(|topic| {
            let score: usize = topic
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| w.len() >= 2)
                .map(|w| answer_lower.matches(w).count())
                .sum();
            (topic, score)
        })
        .max_by_key(|(_, score)| *score);

    match best {
        Some((topic, score)) if score > 0 => {
            debug!(answer, topic = %topic, score, "topic chosen by keyword vote");
            Some(topic)
        }
        _ => topics.first(),
    }
}

fn strip_prefix_path(category: &str) -> String {
    category
        .rsplit(['/', '>'])
        .next()
        .unwrap_or(category)
        .trim()
        .to_string()
}

fn normalize_separators(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_placeholder(category: &str) -> bool {
    let c = category.trim();
    c.is_empty() || c == "-" || c.eq_ignore_ascii_case("uncategorized") || c.eq_ignore_ascii_case("none")
}
