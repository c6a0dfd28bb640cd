// Jaccard similarity over word sets, used to rank related pages.

use std::collections::HashSet;

/// A candidate's position in the input slice and its similarity score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScore {
    pub index: usize,
    pub score: f64,
}

/// Lowercased alphanumeric words of `text`. Single characters are dropped.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Rank `candidates` by similarity to `main`, best first, keeping at most
/// `limit` candidates with a non-zero score. Ties keep input order.
pub fn rank_similar(main: &str, candidates: &[&str], limit: usize) -> Vec<SimilarityScore> {
    let main_words = word_set(main);
    if main_words.is_empty() {
        return Vec::new();
    }

    let mut scores: Vec<SimilarityScore> = candidates
        .iter()
        .enumerate()
        .map(|(index, text)| SimilarityScore { index, score: jaccard(&main_words, &word_set(text)) })
        .filter(|scored| scored.score > 0.0)
        .collect();

    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    scores.truncate(limit);
    scores
}
