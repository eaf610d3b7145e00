//! Heuristic tagging of chunk text.
//!
//! [`tag`] runs a fixed battery of small, pure extractors over a chunk and
//! collects their output into [`Tags`]. No network or model calls are
//! made: the same input always produces the same tags, and every extractor
//! tolerates text with no matches by returning an empty collection.
//!
//! | Field | Extractor |
//! |-------|-----------|
//! | `people` | [`entities::people`] |
//! | `projects` | [`entities::projects`] |
//! | `decisions` | [`sentences::decisions`] |
//! | `action_items` | [`sentences::action_items`] |
//! | `topics` | [`topics::top_terms`] |
//! | `dates_mentioned` | [`dates::dates_mentioned`] |
//! | `sentiment` | [`sentiment::sentiment`] |
//!
//! # Example
//!
//! ```rust
//! use recall_core::tag::tag;
//!
//! let tags = tag("Alice said we decided to ship Friday. TODO: notify Bob.", None);
//! assert!(tags.people.contains("Alice"));
//! assert_eq!(tags.decisions.len(), 1);
//! assert_eq!(tags.action_items.len(), 1);
//! ```

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static regex::Regex {
            static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            RE.get_or_init(|| regex::Regex::new($pattern).expect("static pattern is valid"))
        }
    };
}

pub mod dates;
pub mod entities;
pub mod sentences;
pub mod sentiment;
pub mod topics;

use chrono::{DateTime, Utc};

use crate::models::{Chunk, Tags};

/// Number of topics kept when no config is given.
pub const DEFAULT_TOP_TOPICS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagConfig {
    pub top_topics: usize,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            top_topics: DEFAULT_TOP_TOPICS,
        }
    }
}

/// Tag `text` with the default configuration.
///
/// `occurred_at` anchors relative dates ("tomorrow", "next Friday"); when
/// it is `None` those terms are ignored.
pub fn tag(text: &str, occurred_at: Option<DateTime<Utc>>) -> Tags {
    tag_with(text, occurred_at, &TagConfig::default())
}

pub fn tag_with(text: &str, occurred_at: Option<DateTime<Utc>>, config: &TagConfig) -> Tags {
    let people = entities::people(text);
    let projects = entities::projects(text, &people);
    let sentences = sentences::split_sentences(text);

    Tags {
        projects,
        decisions: sentences::decisions(&sentences),
        action_items: sentences::action_items(&sentences),
        topics: topics::top_terms(text, config.top_topics),
        dates_mentioned: dates::dates_mentioned(text, occurred_at.map(|t| t.date_naive())),
        sentiment: sentiment::sentiment(text),
        people,
    }
}

/// Tag every chunk in place, anchoring relative dates on each chunk's
/// `occurred_at`.
pub fn tag_chunks(chunks: &mut [Chunk], config: &TagConfig) {
    for chunk in chunks {
        chunk.tags = tag_with(&chunk.text, Some(chunk.occurred_at), config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sentiment;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_ship_friday_scenario() {
        let tags = tag("Alice said we decided to ship Friday. TODO: notify Bob.", None);
        assert!(tags.people.contains("Alice"), "people: {:?}", tags.people);
        assert_eq!(tags.decisions, vec!["Alice said we decided to ship Friday."]);
        assert_eq!(tags.action_items, vec!["TODO: notify Bob."]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Met with Dana Whitfield about project Borealis.\n\
                    We agreed to move the launch to March 3, 2025. Borealis needs to find a new owner.\n\
                    Carlos: I should update github.com/acme/borealis-api before tomorrow.";
        let at = Utc.with_ymd_and_hms(2025, 2, 20, 9, 0, 0).unwrap();
        let a = tag(text, Some(at));
        for _ in 0..5 {
            assert_eq!(a, tag(text, Some(at)));
        }
    }

    #[test]
    fn test_full_battery() {
        let text = "Met with Dana Whitfield about project Borealis.\n\
                    We agreed to move the launch to March 3, 2025. Borealis needs to find a new owner.\n\
                    Carlos: I should update github.com/acme/borealis-api before tomorrow.";
        let at = Utc.with_ymd_and_hms(2025, 2, 20, 9, 0, 0).unwrap();
        let tags = tag(text, Some(at));

        assert!(tags.people.contains("Dana Whitfield"));
        assert!(tags.people.contains("Carlos"));
        assert!(tags.projects.contains("Borealis"));
        assert!(tags.projects.contains("acme/borealis-api"));
        assert_eq!(tags.decisions.len(), 1);
        assert_eq!(tags.action_items.len(), 2);
        assert_eq!(tags.topics[0], "borealis");
        assert_eq!(
            tags.dates_mentioned,
            vec![
                NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
                NaiveDate::from_ymd_opt(2025, 2, 21).unwrap(),
            ]
        );
        assert_eq!(tags.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_empty_text_has_empty_tags() {
        assert_eq!(tag("", None), Tags::default());
        assert_eq!(tag("   \n\n  ", None), Tags::default());
    }

    #[test]
    fn test_tag_chunks_uses_chunk_time() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let mut chunks = vec![Chunk {
            chunk_id: "c1".to_string(),
            source_id: "mail".to_string(),
            parent_external_id: "m1".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            text: "Let's review it tomorrow.".to_string(),
            char_range: 0..25,
            hash: String::new(),
            tags: Tags::default(),
            occurred_at: at,
        }];
        tag_chunks(&mut chunks, &TagConfig::default());
        assert_eq!(
            chunks[0].tags.dates_mentioned,
            vec![NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()]
        );
    }
}
