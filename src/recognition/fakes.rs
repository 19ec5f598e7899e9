//! In-memory recognizer for exercising the loop without models or devices.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::stt::{
    CompletionReason, EventSource, Handler, HandlerToken, Language, ListConstraint, RecognitionResult, RecognizerFactory, RecognizerState,
    SpeechError, SpeechRecognizer,
};

pub(crate) type Sources = (EventSource<CompletionReason>, EventSource<RecognitionResult>);

#[derive(Default)]
pub(crate) struct Shared {
    pub state: RecognizerState,
    pub fail_compile: bool,
    pub fail_start: bool,
    pub starts: usize,
    pub stops: usize,
    pub dropped: usize,
    pub constraints: Vec<ListConstraint>,
    pub sources: Vec<Sources>, // One entry per created recognizer
}

pub(crate) struct FakeRecognizer {
    language: Language,
    shared: Arc<Mutex<Shared>>,
    completed: EventSource<CompletionReason>,
    results: EventSource<RecognitionResult>,
    constraints: Vec<ListConstraint>,
}

impl SpeechRecognizer for FakeRecognizer {
    fn language(&self) -> &Language {
        &self.language
    }

    fn add_constraint(&mut self, constraint: ListConstraint) {
        self.constraints.push(constraint);
    }

    async fn compile_constraints(&mut self) -> Result<(), SpeechError> {
        let mut shared = self.shared.lock();
        if shared.fail_compile || self.constraints.iter().all(|c| c.phrases().is_empty()) {
            return Err(SpeechError::ConstraintCompilation("empty list".to_string()));
        }
        shared.constraints = self.constraints.clone();
        Ok(())
    }

    fn state(&self) -> RecognizerState {
        self.shared.lock().state
    }

    async fn start_continuous(&mut self) -> Result<(), SpeechError> {
        let mut shared = self.shared.lock();
        if shared.state != RecognizerState::Idle {
            return Err(SpeechError::InvalidState { expected: RecognizerState::Idle, actual: shared.state });
        }
        if shared.fail_start {
            return Err(SpeechError::Capture("device gone".to_string()));
        }
        shared.state = RecognizerState::Capturing;
        shared.starts += 1;
        Ok(())
    }

    async fn stop_continuous(&mut self) -> Result<(), SpeechError> {
        {
            let mut shared = self.shared.lock();
            shared.state = RecognizerState::Idle;
            shared.stops += 1;
        }
        self.completed.emit(&CompletionReason::UserCanceled);
        Ok(())
    }

    fn on_completed(&mut self, handler: Handler<CompletionReason>) -> HandlerToken {
        self.completed.add(handler)
    }

    fn remove_completed(&mut self, token: HandlerToken) -> bool {
        self.completed.remove(token)
    }

    fn on_result(&mut self, handler: Handler<RecognitionResult>) -> HandlerToken {
        self.results.add(handler)
    }

    fn remove_result(&mut self, token: HandlerToken) -> bool {
        self.results.remove(token)
    }
}

impl Drop for FakeRecognizer {
    fn drop(&mut self) {
        self.shared.lock().dropped += 1;
    }
}

pub(crate) struct FakeFactory {
    pub shared: Arc<Mutex<Shared>>,
}

impl RecognizerFactory for FakeFactory {
    type Recognizer = FakeRecognizer;

    fn create(&self, language: &Language) -> Result<FakeRecognizer, SpeechError> {
        let completed = EventSource::new();
        let results = EventSource::new();
        self.shared.lock().sources.push((completed.clone(), results.clone()));
        Ok(FakeRecognizer { language: language.clone(), shared: self.shared.clone(), completed, results, constraints: Vec::new() })
    }
}
