//! Wake word detection
//!
//! Scans transcript text for a configured wake phrase. Phrases match on
//! whole words only ("pi" does not fire inside "pipe"); the earliest match in
//! the transcript wins, and at one position the longest phrase wins, so
//! "hey pi" beats "pi" for "hey pi show time".

use crate::{Error, Result};

/// A wake phrase found in a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// The configured phrase that matched (normalized)
    pub phrase: String,
    /// Text after the phrase, trimmed; may be empty
    pub remainder: String,
}

/// A word of a transcript with its byte span
#[derive(Debug)]
struct Token {
    text: String,
    end: usize,
}

/// Detects wake phrases in transcript text
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    /// Normalized phrases, as displayed
    wake_words: Vec<String>,
    /// Per phrase, its word sequence
    phrases: Vec<Vec<String>>,
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// # Arguments
    ///
    /// * `wake_words` - Phrases to detect (e.g., "pi", "hey pi")
    ///
    /// # Errors
    ///
    /// Returns error if no usable wake phrase is given
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let mut normalized = Vec::new();
        let mut phrases = Vec::new();

        for word in wake_words {
            let tokens: Vec<String> = tokenize(&word).into_iter().map(|t| t.text).collect();
            if tokens.is_empty() {
                continue;
            }
            let phrase = tokens.join(" ");
            if !normalized.contains(&phrase) {
                normalized.push(phrase);
                phrases.push(tokens);
            }
        }

        if phrases.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Ok(Self {
            wake_words: normalized,
            phrases,
        })
    }

    /// Find the first wake phrase in a transcript
    ///
    /// Returns `None` when no configured phrase occurs as whole words.
    #[must_use]
    pub fn detect(&self, transcript: &str) -> Option<WakeMatch> {
        let tokens = tokenize(transcript);

        for start in 0..tokens.len() {
            let best = self
                .phrases
                .iter()
                .enumerate()
                .filter(|(_, phrase)| {
                    phrase.len() <= tokens.len() - start
                        && phrase
                            .iter()
                            .zip(&tokens[start..])
                            .all(|(want, got)| *want == got.text)
                })
                .max_by_key(|(_, phrase)| phrase.len());

            if let Some((index, phrase)) = best {
                let end = tokens[start + phrase.len() - 1].end;
                let remainder = transcript[end..]
                    .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                    .trim_end()
                    .to_string();

                tracing::info!(
                    wake_word = %self.wake_words[index],
                    transcript,
                    "wake word detected"
                );
                return Some(WakeMatch {
                    phrase: self.wake_words[index].clone(),
                    remainder,
                });
            }
        }

        None
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

/// Split text into lowercase words of letters, digits and apostrophes
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '\'' {
            current
                .get_or_insert_with(|| (i, String::new()))
                .1
                .extend(c.to_lowercase());
        } else if let Some((_, word)) = current.take() {
            tokens.push(Token { text: word, end: i });
        }
    }

    if let Some((_, word)) = current {
        tokens.push(Token {
            text: word,
            end: text.len(),
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(words: &[&str]) -> WakeWordDetector {
        WakeWordDetector::new(words.iter().map(ToString::to_string).collect()).unwrap()
    }

    #[test]
    fn test_wake_word_detection() {
        let detector = detector(&["hey pi"]);

        assert!(detector.detect("hello world").is_none());
        assert_eq!(
            detector.detect("Hey Pi, what's up?"),
            Some(WakeMatch {
                phrase: "hey pi".to_string(),
                remainder: "what's up?".to_string(),
            })
        );
    }

    #[test]
    fn longest_phrase_at_position_wins() {
        let detector = detector(&["pi", "hey pi"]);
        let found = detector.detect("hey pi show the time please").unwrap();
        assert_eq!(found.phrase, "hey pi");
        assert_eq!(found.remainder, "show the time please");
    }

    #[test]
    fn earliest_position_wins() {
        let detector = detector(&["computer", "pi"]);
        let found = detector.detect("pi tell the computer a joke").unwrap();
        assert_eq!(found.phrase, "pi");
        assert_eq!(found.remainder, "tell the computer a joke");
    }

    #[test]
    fn whole_words_only() {
        let detector = detector(&["pi"]);
        assert!(detector.detect("the pipe is leaking").is_none());
        assert!(detector.detect("raspberry pie").is_none());
        assert_eq!(detector.detect("okay pi.").unwrap().remainder, "");
    }

    #[test]
    fn rejects_empty_wake_words() {
        assert!(WakeWordDetector::new(vec![]).is_err());
        assert!(WakeWordDetector::new(vec!["  ".to_string(), "!!".to_string()]).is_err());
    }

    #[test]
    fn tokenize_tracks_word_ends() {
        let tokens = tokenize("Hey, Pi!");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hey", "pi"]);
        assert_eq!(tokens[1].end, 7);
    }
}
