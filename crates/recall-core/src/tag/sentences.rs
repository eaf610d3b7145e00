//! Sentence splitting and cue-based sentence classification.

static_regex!(sentence_break_re, r"[.!?]+[\s]+");
static_regex!(
    decision_re,
    r"(?i)\bdecided\b|\bdecision\b|\bagreed\b|\bwe agree\b|\bwill do\b|\bgoing with\b|\bgo with\b|\bsettled on\b|\bapproved\b|\bsigned off\b"
);
static_regex!(
    action_re,
    r"(?i)\b(?:need|needs) to\b|\bshould\b|\bmust\b|\b(?:have|has) to\b|\bto-?do\b|\baction items?\b|\bfollow[- ]up\b|\bplease\b|\bremember to\b|\bdon'?t forget\b|\[ \]"
);

/// Split text into trimmed sentences, keeping terminal punctuation.
///
/// Line breaks always end a sentence; within a line, `.`, `!` or `?`
/// followed by whitespace does. Duplicates keep their first occurrence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        for m in sentence_break_re().find_iter(line) {
            let end = m.start() + m.as_str().trim_end().len();
            push_unique(&mut out, &line[start..end]);
            start = m.end();
        }
        push_unique(&mut out, &line[start..]);
    }
    out
}

fn push_unique(out: &mut Vec<String>, raw: &str) {
    let sentence = raw.trim();
    if !sentence.is_empty() && !out.iter().any(|s| s == sentence) {
        out.push(sentence.to_string());
    }
}

/// Sentences that record a decision.
pub fn decisions(sentences: &[String]) -> Vec<String> {
    sentences
        .iter()
        .filter(|s| decision_re().is_match(s))
        .cloned()
        .collect()
}

/// Sentences that assign or imply follow-up work.
pub fn action_items(sentences: &[String]) -> Vec<String> {
    sentences
        .iter()
        .filter(|s| action_re().is_match(s))
        .cloned()
        .collect()
}

/// True when the byte offset `pos` begins a sentence: nothing but
/// horizontal whitespace separates it from the start of the text, a line
/// break, or terminal punctuation.
pub(crate) fn is_sentence_start(text: &str, pos: usize) -> bool {
    for c in text[..pos].chars().rev() {
        match c {
            ' ' | '\t' | '"' | '\'' | '(' | '*' | '-' => continue,
            '\n' | '\r' | '.' | '!' | '?' => return true,
            _ => return false,
        }
    }
    true
}
