//! Lexicon-based sentiment bucket.

use crate::models::Sentiment;

const POSITIVE_WORDS: &[&str] = &[
    "great", "love", "excited", "happy", "amazing", "solved", "success", "successful",
    "excellent", "wonderful", "fantastic", "glad", "pleased", "proud", "brilliant", "perfect",
    "works", "fixed", "achieved", "helpful", "thanks", "thank", "awesome", "enjoy", "enjoyed",
    "good", "nice", "congrats", "congratulations", "win", "smooth", "impressive", "appreciate",
];

const NEGATIVE_WORDS: &[&str] = &[
    "frustrated", "confused", "error", "failed", "worried", "stuck", "broken", "terrible",
    "awful", "wrong", "bad", "hate", "annoying", "difficult", "struggle", "issue", "bug",
    "crash", "problem", "cannot", "unable", "fail", "loss", "lost", "missing", "outage",
    "blocked", "delayed", "angry", "upset", "disappointed", "regression", "urgent", "concern",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "without"];

/// Classify `text` as positive, negative or neutral.
///
/// Counts lexicon hits; a negation within the two preceding words flips a
/// hit to the opposite polarity ("not a problem" counts as positive).
/// Equal counts, including zero, are neutral.
pub fn sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut positive = 0usize;
    let mut negative = 0usize;
    for (i, word) in words.iter().enumerate() {
        let negated = words[i.saturating_sub(2)..i]
            .iter()
            .any(|w| NEGATIONS.contains(w));
        let polarity = if POSITIVE_WORDS.contains(word) {
            Some(true)
        } else if NEGATIVE_WORDS.contains(word) {
            Some(false)
        } else {
            None
        };
        match polarity.map(|p| p != negated) {
            Some(true) => positive += 1,
            Some(false) => negative += 1,
            None => {}
        }
    }

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}
