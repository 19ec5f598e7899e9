//! Continuous-session recognizer backed by sherpa-rs.
//!
//! A session captures microphone audio, lets the VAD cut it into utterances,
//! transcribes each one with Whisper and matches the transcript against the
//! compiled grammar. Results and the final completion are delivered through
//! the registered handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventSource, Handler, HandlerToken};
use super::grammar::Grammar;
use super::service::{
    CompletionReason, Language, ListConstraint, RecognitionResult, RecognizerFactory, RecognizerState, SpeechError,
    SpeechRecognizer,
};
use super::transcriber::Transcriber;
use crate::audio::Capturer;
use crate::config::AppConfig;

/// How often the session task checks the timeout and fault flags.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Builds [`SherpaRecognizer`]s from the application configuration.
pub struct SherpaRecognizerFactory {
    config: Arc<AppConfig>,
}

impl SherpaRecognizerFactory {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl RecognizerFactory for SherpaRecognizerFactory {
    type Recognizer = SherpaRecognizer;

    fn create(&self, language: &Language) -> Result<SherpaRecognizer, SpeechError> {
        SherpaRecognizer::new(self.config.clone(), language.clone())
    }
}

/// What a session needs from the speech models.
trait SegmentTranscriber: Send + Sync + 'static {
    fn transcribe(&self, samples: &[f32]) -> Option<String>;

    fn is_speaking(&self) -> bool;
}

impl SegmentTranscriber for Transcriber {
    fn transcribe(&self, samples: &[f32]) -> Option<String> {
        Transcriber::transcribe(self, samples)
    }

    fn is_speaking(&self) -> bool {
        Transcriber::is_speaking(self)
    }
}

/// A running session task and its stop signal.
struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything the session task needs, moved into it at start.
struct SessionContext<T> {
    grammar: Arc<Grammar>,
    transcriber: Arc<T>,
    segments: Arc<AsyncMutex<mpsc::Receiver<Vec<f32>>>>,
    state: Arc<Mutex<RecognizerState>>,
    completed: EventSource<CompletionReason>,
    results: EventSource<RecognitionResult>,
    capture_running: Arc<AtomicBool>,
    capture_faulted: Arc<AtomicBool>,
    cancel: CancellationToken,
    silence_timeout: Duration,
}

/// Speech recognizer using Silero VAD, Whisper and a closed-list grammar.
pub struct SherpaRecognizer {
    config: Arc<AppConfig>,
    language: Language,
    constraints: Vec<ListConstraint>,
    grammar: Option<Arc<Grammar>>,
    transcriber: Arc<Transcriber>,
    segments: Arc<AsyncMutex<mpsc::Receiver<Vec<f32>>>>,
    capturer: Option<Capturer>, // Opened on first start, reopened after a fault
    state: Arc<Mutex<RecognizerState>>,
    completed: EventSource<CompletionReason>,
    results: EventSource<RecognitionResult>,
    session: Option<Session>,
}

impl SherpaRecognizer {
    /// Load the models for `language`.
    ///
    /// # Errors
    /// Returns `SpeechError::Engine` if the VAD or Whisper models fail to load.
    pub fn new(config: Arc<AppConfig>, language: Language) -> Result<Self, SpeechError> {
        info!("Creating recognizer for {}", language);

        let (transcriber, segments) = Transcriber::new(&config, &language).map_err(|e| SpeechError::Engine(format!("{e:#}")))?;

        Ok(Self {
            config,
            language,
            constraints: Vec::new(),
            grammar: None,
            transcriber: Arc::new(transcriber),
            segments: Arc::new(AsyncMutex::new(segments)),
            capturer: None,
            state: Arc::new(Mutex::new(RecognizerState::Idle)),
            completed: EventSource::new(),
            results: EventSource::new(),
            session: None,
        })
    }

    /// Open the microphone, replacing a capturer whose stream has failed.
    fn ensure_capturer(&mut self) -> Result<&mut Capturer, SpeechError> {
        if self.capturer.as_ref().is_some_and(Capturer::has_faulted) {
            warn!("Capture stream failed earlier, reopening the input device");
            self.capturer = None;
        }

        if self.capturer.is_none() {
            let transcriber = self.transcriber.clone();
            let capturer = Capturer::new(self.config.sample_rate, move |samples: &[f32]| {
                transcriber.accept_waveform(samples);
            })
            .map_err(|e| SpeechError::Capture(format!("{e:#}")))?;
            self.capturer = Some(capturer);
        }

        self.capturer.as_mut().ok_or_else(|| SpeechError::Capture("capturer unavailable".to_string()))
    }

    fn set_state(&self, state: RecognizerState) {
        *self.state.lock() = state;
    }
}

impl SpeechRecognizer for SherpaRecognizer {
    fn language(&self) -> &Language {
        &self.language
    }

    fn add_constraint(&mut self, constraint: ListConstraint) {
        debug!("Adding constraint '{}' ({} phrases)", constraint.tag(), constraint.phrases().len());
        self.constraints.push(constraint);
        self.grammar = None;
    }

    async fn compile_constraints(&mut self) -> Result<(), SpeechError> {
        let state = self.state();
        if state != RecognizerState::Idle {
            return Err(SpeechError::InvalidState { expected: RecognizerState::Idle, actual: state });
        }

        let grammar = Grammar::compile(&self.constraints)?;
        info!("Compiled {} phrases from constraints {:?}", grammar.len(), grammar.tags());
        self.grammar = Some(Arc::new(grammar));
        Ok(())
    }

    fn state(&self) -> RecognizerState {
        let state = *self.state.lock();
        if state == RecognizerState::Capturing && self.transcriber.is_speaking() { RecognizerState::SpeechDetected } else { state }
    }

    async fn start_continuous(&mut self) -> Result<(), SpeechError> {
        let grammar = startable(*self.state.lock(), self.grammar.as_ref())?;

        // The previous session already reported completion; reap its task
        if let Some(previous) = self.session.take()
            && let Err(e) = previous.handle.await
        {
            warn!("Previous session task failed: {}", e);
        }

        self.transcriber.reset();
        let capturer = self.ensure_capturer()?;
        capturer.start().map_err(|e| SpeechError::Capture(format!("{e:#}")))?;
        let capture_running = capturer.running_flag();
        let capture_faulted = capturer.fault_flag();

        self.set_state(RecognizerState::Capturing);

        let cancel = CancellationToken::new();
        let context = SessionContext {
            grammar,
            transcriber: self.transcriber.clone(),
            segments: self.segments.clone(),
            state: self.state.clone(),
            completed: self.completed.clone(),
            results: self.results.clone(),
            capture_running,
            capture_faulted,
            cancel: cancel.clone(),
            silence_timeout: self.config.session_timeout(),
        };
        let handle = tokio::spawn(run_session(context));
        self.session = Some(Session { cancel, handle });

        info!("🎧 Listening...");
        Ok(())
    }

    async fn stop_continuous(&mut self) -> Result<(), SpeechError> {
        let Some(session) = self.session.take() else {
            debug!("No session to stop");
            return Ok(());
        };

        if self.state() != RecognizerState::Idle {
            self.set_state(RecognizerState::Stopping);
        }
        session.cancel.cancel();
        let joined = session.handle.await;

        if let Some(capturer) = self.capturer.as_mut()
            && let Err(e) = capturer.pause()
        {
            debug!("Pausing capture after stop: {:#}", e);
        }
        self.set_state(RecognizerState::Idle);

        joined.map_err(|e| SpeechError::Engine(format!("session task failed: {e}")))
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

impl Drop for SherpaRecognizer {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

/// The grammar to start a session with, if a session may start in `state`.
fn startable(state: RecognizerState, grammar: Option<&Arc<Grammar>>) -> Result<Arc<Grammar>, SpeechError> {
    if state != RecognizerState::Idle {
        return Err(SpeechError::InvalidState { expected: RecognizerState::Idle, actual: state });
    }
    grammar.cloned().ok_or(SpeechError::NotCompiled)
}

/// Body of a continuous session.
async fn run_session<T: SegmentTranscriber>(context: SessionContext<T>) {
    let mut segments = context.segments.lock().await;

    // Segments cut before this session started belong to nobody
    while segments.try_recv().is_ok() {}

    let mut last_activity = Instant::now();

    let reason = loop {
        if context.capture_faulted.load(Ordering::SeqCst) {
            break CompletionReason::MicrophoneUnavailable;
        }
        if last_activity.elapsed() >= context.silence_timeout && !context.transcriber.is_speaking() {
            break CompletionReason::TimeoutExceeded;
        }

        tokio::select! {
            _ = context.cancel.cancelled() => break CompletionReason::UserCanceled,
            received = tokio::time::timeout(POLL_INTERVAL, segments.recv()) => match received {
                Ok(Some(samples)) => {
                    transition(&context.state, RecognizerState::Capturing, RecognizerState::Processing);

                    if let Some(transcript) = context.transcriber.transcribe(&samples) {
                        let result = context.grammar.classify(&transcript);
                        log_result(&result);
                        context.results.emit(&result);
                    }

                    transition(&context.state, RecognizerState::Processing, RecognizerState::Capturing);
                    last_activity = Instant::now();
                }
                Ok(None) => break CompletionReason::Unknown,
                Err(_) => {
                    if context.transcriber.is_speaking() {
                        last_activity = Instant::now();
                    }
                }
            },
        }
    };

    context.capture_running.store(false, Ordering::SeqCst);
    drop(segments);

    // A stop request owns the final transition to idle
    if reason != CompletionReason::UserCanceled {
        *context.state.lock() = RecognizerState::Idle;
    }

    debug!("Session completed: {:?}", reason);
    context.completed.emit(&reason);
}

/// Move `state` from `from` to `to`, leaving any other state untouched.
fn transition(state: &Mutex<RecognizerState>, from: RecognizerState, to: RecognizerState) {
    let mut state = state.lock();
    if *state == from {
        *state = to;
    }
}

fn log_result(result: &RecognitionResult) {
    if result.confidence.is_accepted() {
        debug!("Matched '{}' ({:?}) from '{}'", result.text, result.confidence, result.transcript);
    } else {
        debug!("Weak match '{}' ({:?}) from '{}'", result.text, result.confidence, result.transcript);
    }
}
