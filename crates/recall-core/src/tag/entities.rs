//! People and project extraction.

use std::collections::{BTreeSet, HashMap};

use super::sentences::is_sentence_start;

static_regex!(
    handle_re,
    r"(?:^|[^\w.@])@([A-Za-z][\w.\-]{0,38}[A-Za-z0-9])"
);
static_regex!(
    speaker_re,
    r"(?m)^[ \t]*(?:\[[^\]\n]{1,24}\][ \t]*)?([A-Z][a-z]+(?:[ \t][A-Z][a-z]+){0,2}):[ \t]"
);
static_regex!(
    cue_before_re,
    r"\b(?i:with|from|cc|by|ask|asked|notify|ping|tell|told|thank|thanks|meet|met|call|called|email|emailed|per):?[ \t]+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*)"
);
static_regex!(
    cue_after_re,
    r"\b([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*)[ \t]+(?:said|says|wrote|writes|mentioned|asked|replied|suggested|noted|thinks|thought|confirmed|proposed)\b"
);
static_regex!(
    project_cue_re,
    r"\b(?i:project|repo|repository|initiative|codename)[ \t]*[:#]?[ \t]+([A-Za-z0-9][\w.\-/]*[A-Za-z0-9]|[A-Za-z0-9])"
);
static_regex!(
    hosting_url_re,
    r"(?i)\b(?:https?://)?(?:www\.)?(?:github\.com|gitlab\.com|bitbucket\.org)/([\w.\-]+)/([\w.\-]+)"
);
static_regex!(proper_noun_re, r"\b[A-Z][a-zA-Z0-9]+\b");

/// Capitalized words that start sentences or refer to groups, never a person.
const NOT_NAMES: &[&str] = &[
    "The", "A", "An", "We", "I", "You", "They", "He", "She", "It", "This", "That", "These",
    "Those", "Our", "My", "Your", "Their", "His", "Her", "Its", "Everyone", "Someone", "Nobody",
    "Team", "All", "Hi", "Hey", "Hello", "Thanks", "Dear", "Re", "Fwd", "Fw", "Yes", "No", "Ok",
    "Okay", "So", "And", "But", "Or", "If", "Then", "Also", "Project", "Repo", "Today", "Tomorrow",
    "Yesterday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December", "From", "To", "Cc", "Subject", "Date", "Sent", "Note",
];

/// Shouted markers that look like proper nouns but are not.
const MARKERS: &[&str] = &["TODO", "FIXME", "FYI", "ASAP", "NB", "OK", "EOD", "EOW", "ETA", "PS"];

/// People mentioned near relational cues.
///
/// Picks up names following cue words ("with", "from", "cc", "notify"),
/// names followed by reporting verbs ("Alice said"), chat speaker labels
/// ("Alice:" at line start) and `@handles`.
pub fn people(text: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();

    for cap in handle_re().captures_iter(text) {
        found.insert(format!("@{}", &cap[1]));
    }

    for re in [speaker_re(), cue_before_re(), cue_after_re()] {
        for cap in re.captures_iter(text) {
            if let Some(name) = clean_name(&cap[1]) {
                found.insert(name);
            }
        }
    }

    found
}

/// Projects referenced in the text.
///
/// Three signals: the token after a cue word ("project Apollo",
/// "repo recall-core"), code-hosting URLs (`github.com/owner/repo` becomes
/// `owner/repo`), and proper nouns used at least twice, at least once
/// mid-sentence, that are not already known as people.
pub fn projects(text: &str, people: &BTreeSet<String>) -> BTreeSet<String> {
    let mut found = BTreeSet::new();

    for cap in project_cue_re().captures_iter(text) {
        let token = &cap[1];
        if looks_like_identifier(token) && !NOT_NAMES.contains(&token) {
            found.insert(token.to_string());
        }
    }

    for cap in hosting_url_re().captures_iter(text) {
        let repo = cap[2].trim_end_matches(".git").trim_end_matches('.');
        if !repo.is_empty() {
            found.insert(format!("{}/{}", &cap[1], repo));
        }
    }

    let person_words: BTreeSet<&str> = people
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect();

    let mut counts: HashMap<&str, (usize, bool)> = HashMap::new();
    for m in proper_noun_re().find_iter(text) {
        let word = m.as_str();
        if NOT_NAMES.contains(&word) || MARKERS.contains(&word) || person_words.contains(word) {
            continue;
        }
        let entry = counts.entry(word).or_insert((0, false));
        entry.0 += 1;
        entry.1 |= !is_sentence_start(text, m.start());
    }
    for (word, (count, mid_sentence)) in counts {
        if count >= 2 && mid_sentence {
            found.insert(word.to_string());
        }
    }

    found
}

/// Strip leading non-name capitals ("The", "We") and reject sequences
/// made only of them.
fn clean_name(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split_whitespace()
        .skip_while(|w| NOT_NAMES.contains(w))
        .collect();
    if words.is_empty() || words.iter().any(|w| NOT_NAMES.contains(w)) {
        return None;
    }
    Some(words.join(" "))
}

/// A project token is capitalized, or carries identifier punctuation or
/// digits (`recall-core`, `v2`, `acme/api`).
fn looks_like_identifier(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        || token
            .chars()
            .any(|c| c.is_ascii_digit() || matches!(c, '-' | '_' | '/' | '.'))
}
