//! One recognizer together with its two event subscriptions.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stt::{CompletionReason, HandlerToken, RecognitionResult, SpeechRecognizer};

/// What a recognizer reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Completed(CompletionReason),
    Result(RecognitionResult),
}

/// An event tagged with the generation of the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopEvent {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Owns a recognizer and the handlers that forward its events to the loop.
///
/// Handlers are attached in [`RecognizerSession::attach`] and detached in
/// `Drop` before the recognizer itself is released, so every registration is
/// paired with exactly one removal.
pub struct RecognizerSession<R: SpeechRecognizer> {
    recognizer: R,
    generation: u64,
    completed: HandlerToken,
    result: HandlerToken,
}

impl<R: SpeechRecognizer> RecognizerSession<R> {
    /// Register the completion and result handlers on `recognizer`.
    pub fn attach(mut recognizer: R, generation: u64, events: mpsc::UnboundedSender<LoopEvent>) -> Self {
        let completed_tx = events.clone();
        let completed = recognizer.on_completed(Box::new(move |reason: &CompletionReason| {
            let _ = completed_tx.send(LoopEvent { generation, event: SessionEvent::Completed(*reason) });
        }));

        let result = recognizer.on_result(Box::new(move |result: &RecognitionResult| {
            let _ = events.send(LoopEvent { generation, event: SessionEvent::Result(result.clone()) });
        }));

        debug!("Attached handlers for session {}", generation);
        Self { recognizer, generation, completed, result }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn recognizer_mut(&mut self) -> &mut R {
        &mut self.recognizer
    }
}

impl<R: SpeechRecognizer> Drop for RecognizerSession<R> {
    fn drop(&mut self) {
        let completed = self.recognizer.remove_completed(self.completed);
        let result = self.recognizer.remove_result(self.result);
        if !(completed && result) {
            warn!("Session {} handlers were already detached", self.generation);
        }
        debug!("Released session {}", self.generation);
    }
}
