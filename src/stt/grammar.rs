//! Closed-list grammar: constraint compilation and transcript matching.
//!
//! Whisper transcribes free text, so list constraints are enforced after the
//! fact by matching the transcript against the compiled phrases. The match
//! quality becomes the result confidence.

use std::collections::HashSet;

use super::service::{Confidence, ListConstraint, RecognitionResult, SpeechError};

/// Maximum edit distance for a near miss.
const NEAR_MISS_DISTANCE: usize = 1;

/// Shortest phrase considered for near-miss matching.
const NEAR_MISS_MIN_LEN: usize = 4;

#[derive(Debug, Clone)]
struct Phrase {
    text: String,       // Case-folded phrase
    words: Vec<String>, // Phrase split on whitespace
}

/// Phrases of every compiled constraint.
#[derive(Debug, Clone)]
pub struct Grammar {
    phrases: Vec<Phrase>,
    tags: Vec<String>,
}

impl Grammar {
    /// Compile constraints into a grammar.
    ///
    /// # Errors
    /// Returns `SpeechError::ConstraintCompilation` if:
    /// - No constraint was added
    /// - A constraint has no phrases
    /// - A phrase is blank or contains characters other than letters,
    ///   spaces, hyphens and apostrophes
    pub fn compile(constraints: &[ListConstraint]) -> Result<Self, SpeechError> {
        if constraints.is_empty() {
            return Err(SpeechError::ConstraintCompilation("no constraints were added".to_string()));
        }

        let mut seen = HashSet::new();
        let mut phrases = Vec::new();
        let mut tags = Vec::with_capacity(constraints.len());

        for constraint in constraints {
            if constraint.phrases().is_empty() {
                return Err(SpeechError::ConstraintCompilation(format!("constraint '{}' has no phrases", constraint.tag())));
            }

            for phrase in constraint.phrases() {
                let text = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
                if text.is_empty() {
                    return Err(SpeechError::ConstraintCompilation(format!("constraint '{}' contains a blank phrase", constraint.tag())));
                }
                if let Some(bad) = text.chars().find(|c| !is_phrase_char(*c)) {
                    return Err(SpeechError::ConstraintCompilation(format!(
                        "phrase '{}' in constraint '{}' contains '{}'",
                        phrase,
                        constraint.tag(),
                        bad
                    )));
                }
                if seen.insert(text.clone()) {
                    let words = text.split(' ').map(str::to_string).collect();
                    phrases.push(Phrase { text, words });
                }
            }

            tags.push(constraint.tag().to_string());
        }

        Ok(Self { phrases, tags })
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Match a transcript against the grammar.
    ///
    /// - Exact phrase: high confidence
    /// - Phrase inside a longer utterance (longest wins): medium confidence
    /// - One word a single edit away from a phrase: low confidence
    /// - Anything else: rejected, text is the transcript
    pub fn classify(&self, transcript: &str) -> RecognitionResult {
        let words = tokenize(transcript);
        let joined = words.join(" ");

        if let Some(phrase) = self.phrases.iter().find(|p| p.text == joined) {
            return result(&phrase.text, Confidence::High, transcript);
        }

        let contained = self
            .phrases
            .iter()
            .filter(|p| contains_sequence(&words, &p.words))
            .max_by_key(|p| (p.words.len(), p.text.len()));
        if let Some(phrase) = contained {
            return result(&phrase.text, Confidence::Medium, transcript);
        }

        let near = self.phrases.iter().find(|p| {
            p.words.len() == 1
                && p.text.chars().count() >= NEAR_MISS_MIN_LEN
                && words.iter().any(|w| bounded_levenshtein(w, &p.text, NEAR_MISS_DISTANCE) <= NEAR_MISS_DISTANCE)
        });
        if let Some(phrase) = near {
            return result(&phrase.text, Confidence::Low, transcript);
        }

        result(transcript.trim(), Confidence::Rejected, transcript)
    }
}

fn result(text: &str, confidence: Confidence, transcript: &str) -> RecognitionResult {
    RecognitionResult { text: text.to_string(), confidence, transcript: transcript.trim().to_string() }
}

fn is_phrase_char(c: char) -> bool {
    c.is_alphabetic() || c == ' ' || c == '-' || c == '\''
}

/// Lowercase words of a transcript; punctuation other than `'` and `-` separates words.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .map(|w| w.trim_matches(|c| c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

fn bounded_levenshtein(a: &str, b: &str, max_distance: usize) -> usize {
    if a == b {
        return 0;
    }
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }
    if a_len.abs_diff(b_len) > max_distance {
        return max_distance + 1;
    }

    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, a_ch) in a.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = prev[j] + usize::from(a_ch != *b_ch);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            let distance = substitution.min(insertion).min(deletion);
            curr[j + 1] = distance;
            row_min = row_min.min(distance);
        }
        if row_min > max_distance {
            return max_distance + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}
