//! The always-on recognition loop.
//!
//! Lifecycle: `Uninitialized -> Ready -> Listening -> Idle -> Listening ... -> Disposed`.
//! Recognizer events arrive on a queue and are handled one at a time on the
//! task that owns the display.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{LoopEvent, RecognizerSession, SessionEvent};
use crate::animals::{DisplaySurface, ImageResources, Vocabulary, show_animal};
use crate::stt::{CompletionReason, Language, RecognitionResult, RecognizerFactory, RecognizerState, SpeechError, SpeechRecognizer};

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Ready,
    Listening,
    Idle,
    Disposed,
}

/// Why [`RecognitionLoop::run`] returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The shutdown token was cancelled.
    Shutdown,
    /// A session completed and could not be restarted.
    RestartFailed(SpeechError),
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognizer is not initialized")]
    NotInitialized,

    #[error("cannot {action} while {state:?}")]
    InvalidTransition { state: LoopState, action: &'static str },

    #[error(transparent)]
    Speech(#[from] SpeechError),
}

/// Counters for what the loop did with recognizer events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub accepted: u64,     // Results shown on the display
    pub discarded: u64,    // Results dropped for low confidence
    pub restarts: u64,     // Sessions restarted after completion
    pub stale_events: u64, // Events from a replaced or disposed session
}

/// Owns the current recognizer session and drives the display from its events.
pub struct RecognitionLoop<F: RecognizerFactory, D> {
    factory: F,
    vocabulary: Vocabulary,
    resources: ImageResources,
    display: D,
    session: Option<RecognizerSession<F::Recognizer>>,
    state: LoopState,
    generation: u64,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    events_rx: mpsc::UnboundedReceiver<LoopEvent>,
    stats: LoopStats,
}

impl<F: RecognizerFactory, D: DisplaySurface> RecognitionLoop<F, D> {
    pub fn new(factory: F, vocabulary: Vocabulary, resources: ImageResources, display: D) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            vocabulary,
            resources,
            display,
            session: None,
            state: LoopState::Uninitialized,
            generation: 0,
            events_tx,
            events_rx,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Create a recognizer for `language` constrained to the vocabulary.
    ///
    /// Any previous session is stopped and released first, which detaches its
    /// handlers. Events it already queued are ignored afterwards.
    ///
    /// # Errors
    /// Returns an error if the recognizer cannot be created or its
    /// constraints fail to compile.
    pub async fn initialize(&mut self, language: &Language) -> Result<(), RecognitionError> {
        if self.state == LoopState::Disposed {
            return Err(RecognitionError::InvalidTransition { state: self.state, action: "initialize" });
        }

        if let Some(previous) = self.session.take() {
            info!("Re-initializing recognizer (replacing session {})", previous.generation());
            release(previous).await;
        }
        self.state = LoopState::Uninitialized;

        let mut recognizer = self.factory.create(language)?;
        recognizer.add_constraint(self.vocabulary.to_constraint());
        recognizer.compile_constraints().await?;

        self.generation += 1;
        self.session = Some(RecognizerSession::attach(recognizer, self.generation, self.events_tx.clone()));
        self.state = LoopState::Ready;

        if let Some(session) = &self.session {
            info!("Recognizer ready for {} ({} animals)", session.recognizer().language(), self.vocabulary.len());
        }
        Ok(())
    }

    /// Start the continuous session.
    pub async fn start(&mut self) -> Result<(), RecognitionError> {
        if !matches!(self.state, LoopState::Ready | LoopState::Idle) {
            return Err(RecognitionError::InvalidTransition { state: self.state, action: "start" });
        }
        let session = self.session.as_mut().ok_or(RecognitionError::NotInitialized)?;

        session.recognizer_mut().start_continuous().await?;
        self.state = LoopState::Listening;
        Ok(())
    }

    /// Handle queued events until `shutdown` is cancelled or a restart fails.
    ///
    /// Queued events take priority over the shutdown signal.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> LoopExit {
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => {
                    if let Some(exit) = self.handle_event(event).await {
                        return exit;
                    }
                }
                _ = shutdown.cancelled() => return LoopExit::Shutdown,
            }
        }
    }

    /// Stop listening and release the recognizer. No later event is handled.
    pub async fn dispose(&mut self) {
        if let Some(session) = self.session.take() {
            release(session).await;
        }
        while self.events_rx.try_recv().is_ok() {
            self.stats.stale_events += 1;
        }
        self.state = LoopState::Disposed;
        debug!("Recognition loop disposed ({:?})", self.stats);
    }

    async fn handle_event(&mut self, event: LoopEvent) -> Option<LoopExit> {
        let current = self.session.as_ref().map(RecognizerSession::generation);
        if self.state == LoopState::Disposed || current != Some(event.generation) {
            debug!("Ignoring event from session {} (current {:?})", event.generation, current);
            self.stats.stale_events += 1;
            return None;
        }

        match event.event {
            SessionEvent::Completed(reason) => self.on_completed(reason).await,
            SessionEvent::Result(result) => {
                self.on_result(result);
                None
            }
        }
    }

    async fn on_completed(&mut self, reason: CompletionReason) -> Option<LoopExit> {
        debug!("Session completed: {:?}", reason);
        self.state = LoopState::Idle;

        let session = self.session.as_mut()?;
        let recognizer_state = session.recognizer().state();
        if recognizer_state != RecognizerState::Idle {
            debug!("Not restarting, recognizer is {}", recognizer_state);
            return None;
        }

        match session.recognizer_mut().start_continuous().await {
            Ok(()) => {
                self.state = LoopState::Listening;
                self.stats.restarts += 1;
                debug!("Session restarted ({} so far)", self.stats.restarts);
                None
            }
            Err(e) => {
                warn!("Failed to restart recognition: {}", e);
                Some(LoopExit::RestartFailed(e))
            }
        }
    }

    fn on_result(&mut self, result: RecognitionResult) {
        if !result.confidence.is_accepted() {
            debug!("Discarding '{}' ({:?} confidence)", result.text, result.confidence);
            self.stats.discarded += 1;
            return;
        }

        self.stats.accepted += 1;
        show_animal(&self.vocabulary, &self.resources, &mut self.display, &result.text);
    }
}

/// Stop a session if it is still running, then drop it.
async fn release<R: SpeechRecognizer>(mut session: RecognizerSession<R>) {
    if session.recognizer().state() != RecognizerState::Idle
        && let Err(e) = session.recognizer_mut().stop_continuous().await
    {
        warn!("Failed to stop session {}: {}", session.generation(), e);
    }
    drop(session);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::animals::RecordingDisplay;
    use crate::recognition::fakes::{FakeFactory, Shared};
    use crate::stt::Confidence;

    type TestLoop = RecognitionLoop<FakeFactory, RecordingDisplay>;

    fn new_loop() -> (TestLoop, Arc<Mutex<Shared>>) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let factory = FakeFactory { shared: shared.clone() };
        let recognition = RecognitionLoop::new(factory, Vocabulary::standard(), ImageResources::new("assets"), RecordingDisplay::default());
        (recognition, shared)
    }

    async fn listening_loop() -> (TestLoop, Arc<Mutex<Shared>>) {
        let (mut recognition, shared) = new_loop();
        recognition.initialize(&Language::new("en-US")).await.unwrap();
        recognition.start().await.unwrap();
        (recognition, shared)
    }

    fn result(text: &str, confidence: Confidence) -> RecognitionResult {
        RecognitionResult { text: text.to_string(), confidence, transcript: text.to_string() }
    }

    /// Emit a result from the recognizer created `index`-th.
    fn emit_result(shared: &Arc<Mutex<Shared>>, index: usize, result: RecognitionResult) {
        let source = shared.lock().sources[index].1.clone();
        source.emit(&result);
    }

    /// Complete the session of the recognizer created `index`-th, leaving it in `state`.
    fn complete(shared: &Arc<Mutex<Shared>>, index: usize, state: RecognizerState, reason: CompletionReason) {
        let source = {
            let mut shared = shared.lock();
            shared.state = state;
            shared.sources[index].0.clone()
        };
        source.emit(&reason);
    }

    /// Handle every queued event.
    async fn pump(recognition: &mut TestLoop) -> Option<LoopExit> {
        while let Ok(event) = recognition.events_rx.try_recv() {
            if let Some(exit) = recognition.handle_event(event).await {
                return Some(exit);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_initialize_attaches_animal_constraint_and_handlers() {
        let (mut recognition, shared) = new_loop();
        assert_eq!(recognition.state(), LoopState::Uninitialized);

        recognition.initialize(&Language::new("en-US")).await.unwrap();

        assert_eq!(recognition.state(), LoopState::Ready);
        let shared = shared.lock();
        assert_eq!(shared.constraints.len(), 1);
        assert_eq!(shared.constraints[0].tag(), "Animals");
        assert_eq!(shared.constraints[0].phrases().len(), 38);
        assert_eq!(shared.sources[0].0.len(), 1);
        assert_eq!(shared.sources[0].1.len(), 1);
    }

    #[tokio::test]
    async fn test_compile_failure_is_surfaced() {
        let (mut recognition, shared) = new_loop();
        shared.lock().fail_compile = true;

        let err = recognition.initialize(&Language::new("en-US")).await.unwrap_err();

        assert!(matches!(err, RecognitionError::Speech(SpeechError::ConstraintCompilation(_))));
        assert_eq!(recognition.state(), LoopState::Uninitialized);
        assert!(matches!(recognition.start().await, Err(RecognitionError::InvalidTransition { .. })));
        // The failed recognizer never got handlers and was released
        assert!(shared.lock().sources[0].0.is_empty());
        assert_eq!(shared.lock().dropped, 1);
    }

    #[tokio::test]
    async fn test_start_requires_initialization() {
        let (mut recognition, _shared) = new_loop();
        assert!(matches!(recognition.start().await, Err(RecognitionError::InvalidTransition { state: LoopState::Uninitialized, .. })));
    }

    #[tokio::test]
    async fn test_completion_while_idle_restarts() {
        let (mut recognition, shared) = listening_loop().await;
        assert_eq!(recognition.state(), LoopState::Listening);

        complete(&shared, 0, RecognizerState::Idle, CompletionReason::TimeoutExceeded);
        assert!(pump(&mut recognition).await.is_none());

        assert_eq!(shared.lock().starts, 2);
        assert_eq!(recognition.state(), LoopState::Listening);
        assert_eq!(recognition.stats().restarts, 1);
    }

    #[tokio::test]
    async fn test_completion_while_busy_does_not_restart() {
        let (mut recognition, shared) = listening_loop().await;

        complete(&shared, 0, RecognizerState::Processing, CompletionReason::Unknown);
        assert!(pump(&mut recognition).await.is_none());

        assert_eq!(shared.lock().starts, 1);
        assert_eq!(recognition.state(), LoopState::Idle);
        assert_eq!(recognition.stats().restarts, 0);
    }

    #[tokio::test]
    async fn test_restart_failure_ends_run() {
        let (mut recognition, shared) = listening_loop().await;
        shared.lock().fail_start = true;

        complete(&shared, 0, RecognizerState::Idle, CompletionReason::MicrophoneUnavailable);
        let exit = recognition.run(&CancellationToken::new()).await;

        assert!(matches!(exit, LoopExit::RestartFailed(SpeechError::Capture(_))));
        assert_eq!(recognition.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_only_medium_and_high_results_reach_display() {
        let (mut recognition, shared) = listening_loop().await;

        emit_result(&shared, 0, result("fox", Confidence::Low));
        emit_result(&shared, 0, result("Dragon", Confidence::Rejected));
        pump(&mut recognition).await;
        assert_eq!(recognition.display().updates, 0);
        assert_eq!(recognition.stats().discarded, 2);

        emit_result(&shared, 0, result("Fox.", Confidence::Medium));
        pump(&mut recognition).await;
        assert_eq!(recognition.display().label.as_deref(), Some("fox"));
        assert_eq!(recognition.display().image_source, Some(PathBuf::from("assets/Images/Animals/fox.jpg")));

        emit_result(&shared, 0, result("dragon", Confidence::High));
        pump(&mut recognition).await;
        assert_eq!(recognition.display().label.as_deref(), Some("dragon"));
        assert_eq!(recognition.display().image_source, Some(PathBuf::from("assets/Images/Animals/fox.jpg")));
        assert_eq!(recognition.stats().accepted, 2);
    }

    #[tokio::test]
    async fn test_reinitialization_never_duplicates_updates() {
        let (mut recognition, shared) = listening_loop().await;

        // Queued by the first recognizer but not yet handled
        emit_result(&shared, 0, result("owl", Confidence::High));

        recognition.initialize(&Language::new("en-US")).await.unwrap();
        recognition.start().await.unwrap();

        {
            let shared = shared.lock();
            assert_eq!(shared.stops, 1);
            assert_eq!(shared.dropped, 1);
            assert!(shared.sources[0].0.is_empty());
            assert!(shared.sources[0].1.is_empty());
            assert_eq!(shared.sources[1].1.len(), 1);
        }

        // The old recognizer has no handlers left; only the new one reaches the display
        emit_result(&shared, 0, result("cat", Confidence::High));
        emit_result(&shared, 1, result("dog", Confidence::High));
        pump(&mut recognition).await;

        assert_eq!(recognition.display().updates, 1);
        assert_eq!(recognition.display().label.as_deref(), Some("dog"));
        // The queued owl and the stop completion of the first session
        assert_eq!(recognition.stats().stale_events, 2);
    }

    #[tokio::test]
    async fn test_run_handles_queued_events_before_shutdown() {
        let (mut recognition, shared) = listening_loop().await;
        emit_result(&shared, 0, result("panda", Confidence::High));

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(matches!(recognition.run(&shutdown).await, LoopExit::Shutdown));
        assert_eq!(recognition.display().label.as_deref(), Some("panda"));
    }

    #[tokio::test]
    async fn test_dispose_releases_recognizer() {
        let (mut recognition, shared) = listening_loop().await;

        recognition.dispose().await;

        assert_eq!(recognition.state(), LoopState::Disposed);
        {
            let shared = shared.lock();
            assert_eq!(shared.stops, 1);
            assert_eq!(shared.dropped, 1);
            assert!(shared.sources[0].1.is_empty());
        }
        assert!(matches!(recognition.initialize(&Language::new("en-US")).await, Err(RecognitionError::InvalidTransition { .. })));
        assert!(matches!(recognition.start().await, Err(RecognitionError::InvalidTransition { .. })));
    }
}
