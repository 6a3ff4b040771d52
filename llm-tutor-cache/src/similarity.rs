//! Deterministic textual similarity between queries.
//!
//! Both sides are normalized (lowercased, punctuation stripped, split on
//! whitespace) and scored as the mean of token-set Jaccard and
//! longest-common-subsequence F1. Scores are in `[0, 1]`.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "what", "which", "when", "where", "who", "why",
    "how", "with", "that", "this", "from", "does", "into", "about", "there", "their", "have",
    "has", "can", "you", "your", "should", "would", "could",
];

/// Lowercase, drop punctuation, split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

pub fn normalize(text: &str) -> String {
    tokenize(text).join(" ")
}

/// Distinct content words in order of first appearance.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|word| word.chars().count() > 2 && !STOPWORDS.contains(&word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

pub fn lcs_length(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for left in a {
        for (j, right) in b.iter().enumerate() {
            current[j + 1] = if left == right {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

pub fn lcs_f1(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let lcs = lcs_length(a, b);
    if lcs == 0 {
        return 0.0;
    }
    let precision = lcs as f64 / a.len() as f64;
    let recall = lcs as f64 / b.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Similarity of two already tokenized texts.
pub fn token_similarity(a: &[String], b: &[String]) -> f64 {
    (jaccard(a, b) + lcs_f1(a, b)) / 2.0
}

pub fn text_similarity(a: &str, b: &str) -> f64 {
    token_similarity(&tokenize(a), &tokenize(b))
}

/// Boost for matching learner level and case type, capped at 1.
pub fn context_weight(level_matches: bool, case_type_matches: bool) -> f64 {
    let boost = if level_matches { 0.1 } else { 0.0 } + if case_type_matches { 0.05 } else { 0.0 };
    (1.0_f64 + boost).min(1.0)
}

/// Maps a 0..=100 quality score onto `[0.8, 1.0]`.
pub fn quality_weight(quality_score: f64) -> f64 {
    0.8 + 0.2 * (quality_score.clamp(0.0, 100.0) / 100.0)
}
