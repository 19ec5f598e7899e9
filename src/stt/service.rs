//! Speech service contract: recognizer trait, events and error types.

use std::fmt;

use thiserror::Error;

use super::events::{Handler, HandlerToken};

/// Fallback tag when the process locale says nothing useful.
const DEFAULT_LANGUAGE: &str = "en-US";

/// Quality of a recognized utterance as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Rejected,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Results below medium confidence are never shown to the user.
    pub fn is_accepted(self) -> bool {
        matches!(self, Confidence::Medium | Confidence::High)
    }
}

/// One recognized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,           // Matched phrase, or the transcript when rejected
    pub confidence: Confidence, // Match quality
    pub transcript: String,     // What the engine actually heard
}

/// Why a continuous session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    TimeoutExceeded,
    MicrophoneUnavailable,
    UserCanceled,
    Unknown,
}

/// Overall state of a recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognizerState {
    #[default]
    Idle,
    Capturing,
    SpeechDetected,
    Processing,
    Stopping,
}

impl fmt::Display for RecognizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerState::Idle => write!(f, "idle"),
            RecognizerState::Capturing => write!(f, "capturing"),
            RecognizerState::SpeechDetected => write!(f, "speech detected"),
            RecognizerState::Processing => write!(f, "processing"),
            RecognizerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Restricts recognition to a closed list of phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConstraint {
    phrases: Vec<String>,
    tag: String,
}

impl ListConstraint {
    pub fn new<I, S>(phrases: I, tag: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { phrases: phrases.into_iter().map(Into::into).collect(), tag: tag.into() }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// A BCP-47 language tag such as `en-US`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language(String);

impl Language {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Language of the current user, taken from the POSIX locale variables.
    pub fn system() -> Self {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find_map(|value| Self::from_locale(&value))
            .unwrap_or_else(|| Self::new(DEFAULT_LANGUAGE))
    }

    /// Convert a POSIX locale (`en_US.UTF-8`, `de_DE@euro`) into a tag.
    ///
    /// Returns `None` for the `C`/`POSIX` locales and empty values.
    pub fn from_locale(locale: &str) -> Option<Self> {
        let base = locale.split(['.', '@']).next().unwrap_or_default().trim();
        if base.is_empty() || base.eq_ignore_ascii_case("c") || base.eq_ignore_ascii_case("posix") {
            return None;
        }
        Some(Self(base.replace('_', "-")))
    }

    pub fn tag(&self) -> &str {
        &self.0
    }

    /// Primary subtag in lowercase (`en` for `en-US`).
    pub fn primary(&self) -> String {
        self.0.split('-').next().unwrap_or_default().to_ascii_lowercase()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a speech recognizer.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("constraint compilation failed: {0}")]
    ConstraintCompilation(String),

    #[error("constraints have not been compiled")]
    NotCompiled,

    #[error("recognizer is {actual}, expected {expected}")]
    InvalidState { expected: RecognizerState, actual: RecognizerState },

    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("speech engine error: {0}")]
    Engine(String),
}

/// A recognizer with a continuous recognition session.
///
/// Handlers registered with `on_completed`/`on_result` must be removed with
/// the matching `remove_*` call before the recognizer is dropped.
pub trait SpeechRecognizer {
    fn language(&self) -> &Language;

    /// Add a constraint; takes effect at the next compilation.
    fn add_constraint(&mut self, constraint: ListConstraint);

    /// Compile the added constraints. Must succeed before a session starts.
    async fn compile_constraints(&mut self) -> Result<(), SpeechError>;

    fn state(&self) -> RecognizerState;

    /// Start a continuous session. Fails unless the recognizer is idle.
    async fn start_continuous(&mut self) -> Result<(), SpeechError>;

    /// Stop the running session. Completion fires with `UserCanceled`.
    async fn stop_continuous(&mut self) -> Result<(), SpeechError>;

    fn on_completed(&mut self, handler: Handler<CompletionReason>) -> HandlerToken;

    fn remove_completed(&mut self, token: HandlerToken) -> bool;

    fn on_result(&mut self, handler: Handler<RecognitionResult>) -> HandlerToken;

    fn remove_result(&mut self, token: HandlerToken) -> bool;
}

/// Creates recognizers, one per (re)initialization.
pub trait RecognizerFactory {
    type Recognizer: SpeechRecognizer;

    fn create(&self, language: &Language) -> Result<Self::Recognizer, SpeechError>;
}
