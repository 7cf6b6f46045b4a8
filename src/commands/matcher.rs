//! Utterance → command resolution
//!
//! Exact match first, then the longest trigger that prefixes the utterance
//! followed by a space (the rest becomes the argument). Nothing fuzzier:
//! anything else is unmatched. Matching runs on normalized words, but the
//! argument is cut from the utterance as spoken so case, signs and
//! punctuation survive.

use std::sync::Arc;

use super::{CommandSpec, CommandTable};

/// A command selected for one utterance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    /// The matched command
    pub command: Arc<CommandSpec>,
    /// The normalized trigger phrase that matched
    pub trigger: String,
    /// Trailing text after a prefix match (e.g. "75" in "brightness 75"),
    /// as it appeared in the utterance
    pub argument: Option<String>,
}

/// Result of matching an utterance
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// A command was selected
    Matched(ResolvedAction),
    /// Nothing matched; carries the normalized utterance
    Unmatched(String),
}

impl MatchOutcome {
    /// The resolved action, if any
    #[must_use]
    pub const fn resolved(&self) -> Option<&ResolvedAction> {
        match self {
            Self::Matched(action) => Some(action),
            Self::Unmatched(_) => None,
        }
    }
}

impl CommandTable {
    /// Resolve an utterance (the text after the wake word)
    #[must_use]
    pub fn resolve(&self, utterance: &str) -> MatchOutcome {
        let text = normalize(utterance);

        if let Some(command) = self.by_trigger(&text) {
            tracing::debug!(command = %command.name, trigger = %text, "exact match");
            return MatchOutcome::Matched(ResolvedAction {
                command: Arc::clone(command),
                trigger: text,
                argument: None,
            });
        }

        let best = self
            .triggers()
            .filter(|(trigger, _)| {
                text.strip_prefix(trigger)
                    .is_some_and(|rest| rest.starts_with(' '))
            })
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)));

        if let Some((trigger, command)) = best {
            let words = trigger.split(' ').count();
            let argument = after_words(utterance, words).trim().to_string();
            tracing::debug!(command = %command.name, trigger, argument = %argument, "prefix match");
            return MatchOutcome::Matched(ResolvedAction {
                command: Arc::clone(command),
                trigger: trigger.to_string(),
                argument: Some(argument),
            });
        }

        tracing::debug!(utterance = %text, "no command matched");
        MatchOutcome::Unmatched(text)
    }
}

/// The part of `text` after its first `count` words, using the word
/// boundaries [`normalize`] sees
fn after_words(text: &str, count: usize) -> &str {
    let is_separator = |c: char| c.is_whitespace() || c == '-' || c == '_';
    let is_word = |segment: &str| segment.chars().any(|c| c.is_alphanumeric() || c == '\'');

    let mut seen = 0;
    let mut start = None;
    for (index, c) in text.char_indices() {
        match (start, is_separator(c)) {
            (None, false) => start = Some(index),
            (Some(from), true) => {
                start = None;
                if is_word(&text[from..index]) {
                    seen += 1;
                    if seen == count {
                        return &text[index..];
                    }
                }
            }
            _ => {}
        }
    }
    ""
}

/// Normalize a phrase for matching
///
/// Lowercases, turns `_` and `-` into spaces, strips punctuation from the
/// edges of each word and collapses runs of whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
