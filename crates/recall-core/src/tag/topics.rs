//! Frequency-based topic terms.

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "aren",
    "because", "been", "before", "being", "below", "between", "both", "but", "can", "could",
    "did", "does", "doing", "don", "down", "during", "each", "few", "for", "from", "further",
    "get", "got", "had", "has", "have", "having", "her", "here", "hers", "him", "his", "how",
    "into", "its", "just", "let", "lets", "like", "may", "might", "more", "most", "much",
    "must", "our", "ours", "out", "over", "own", "same", "she", "should", "some", "such", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "through",
    "too", "under", "until", "very", "was", "were", "what", "when", "where", "which", "while",
    "who", "whom", "why", "will", "with", "would", "yes", "you", "your", "yours", "yet", "not",
    "now", "only", "off", "once", "one", "other", "per", "still", "want", "way", "well", "went",
    "http", "https", "www",
];

/// Top `k` terms by frequency.
///
/// Terms are lowercase alphanumeric runs of at least three characters that
/// are neither stopwords nor pure numbers. Ties keep first-seen order.
pub fn top_terms(text: &str, k: usize) -> Vec<String> {
    if k == 0 {
        return Vec::new();
    }

    // term -> (count, first position)
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()));

    for (position, word) in words.enumerate() {
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(term, (count, first))| (term, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(k).map(|(term, _, _)| term).collect()
}
