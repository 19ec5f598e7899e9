//! Speech-to-text: the recognizer contract and its sherpa-rs implementation.
//!
//! Provides voice activity detection (VAD), Whisper transcription and
//! closed-list grammar matching behind the [`SpeechRecognizer`] trait.

mod engine;
mod events;
mod grammar;
mod service;
mod transcriber;

pub use engine::SherpaRecognizerFactory;
pub use events::HandlerToken;
#[cfg(test)]
pub use events::{EventSource, Handler};
pub use service::{
    CompletionReason, Confidence, Language, ListConstraint, RecognitionResult, RecognizerFactory, RecognizerState, SpeechError,
    SpeechRecognizer,
};
