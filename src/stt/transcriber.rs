//! Speech segmentation and transcription.
//!
//! Uses Silero VAD to cut the microphone stream into utterances and Whisper
//! to transcribe them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use sherpa_rs::silero_vad::{SileroVad, SileroVadConfig};
use sherpa_rs::whisper::{WhisperConfig, WhisperRecognizer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::service::Language;
use crate::config::AppConfig;

/// Minimum speech duration in seconds to be considered valid.
const MIN_SPEECH_DURATION: f32 = 0.1;

/// Maximum speech duration in seconds. Animal names are short utterances.
const MAX_SPEECH_DURATION: f32 = 10.0;

/// VAD window size in samples (512 samples = 32ms at 16kHz).
const VAD_WINDOW_SIZE: i32 = 512;

/// Buffer size in seconds for VAD (how much audio to accumulate).
const VAD_BUFFER_SIZE_SECONDS: f32 = 30.0;

/// Completed segments waiting for transcription before new ones are dropped.
const SEGMENT_QUEUE: usize = 5;

/// State touched from the audio callback thread.
/// Kept apart from Whisper so a slow transcription never blocks capture.
struct VadState {
    vad: SileroVad,                // Voice activity detector
    was_speaking: bool,            // Previous speaking state for edge detection
    speech_start: Option<Instant>, // Timestamp when speech started
}

/// VAD segmentation plus Whisper transcription.
pub struct Transcriber {
    vad_state: Mutex<VadState>,         // VAD state (fast access, <10ms)
    whisper: Mutex<WhisperRecognizer>,  // Whisper recognizer (slow, 100-500ms)
    segment_tx: mpsc::Sender<Vec<f32>>, // Completed speech segments
    sample_rate: u32,                   // Audio sample rate (16kHz)
    speaking: Arc<AtomicBool>,          // Set while VAD hears speech
}

impl Transcriber {
    /// Load the VAD and Whisper models.
    ///
    /// # Returns
    /// The transcriber and the receiver of completed speech segments.
    ///
    /// # Errors
    /// Returns an error if either model fails to load.
    pub fn new(config: &AppConfig, language: &Language) -> Result<(Self, mpsc::Receiver<Vec<f32>>)> {
        let sample_rate = config.sample_rate;
        let provider = config.effective_stt_provider();

        info!("Initializing transcriber with {} provider", provider);

        let vad_config = SileroVadConfig {
            model: config.vad_model_path().to_string_lossy().to_string(),
            threshold: config.vad_threshold,
            sample_rate,
            min_silence_duration: config.vad_silence_duration,
            min_speech_duration: MIN_SPEECH_DURATION,
            max_speech_duration: MAX_SPEECH_DURATION,
            window_size: VAD_WINDOW_SIZE,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.vad_threads.try_into().unwrap_or(1)),
            debug: config.verbose,
        };

        let vad = SileroVad::new(vad_config, VAD_BUFFER_SIZE_SECONDS).map_err(|e| anyhow::anyhow!("Failed to initialize Silero VAD: {}", e))?;

        debug!("VAD initialized");

        let whisper_language = language.primary();
        info!("Whisper language: {} (from {})", whisper_language, language);

        let whisper_config = WhisperConfig {
            encoder: config.whisper_encoder_path().to_string_lossy().to_string(),
            decoder: config.whisper_decoder_path().to_string_lossy().to_string(),
            tokens: config.whisper_tokens_path().to_string_lossy().to_string(),
            language: whisper_language,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.stt_threads.try_into().unwrap_or(2)),
            debug: config.verbose,
            ..Default::default()
        };

        let whisper = WhisperRecognizer::new(whisper_config).map_err(|e| anyhow::anyhow!("Failed to initialize Whisper: {}", e))?;

        info!("Whisper recognizer initialized");

        let (segment_tx, segment_rx) = mpsc::channel(SEGMENT_QUEUE);

        let transcriber = Self {
            vad_state: Mutex::new(VadState { vad, was_speaking: false, speech_start: None }),
            whisper: Mutex::new(whisper),
            segment_tx,
            sample_rate,
            speaking: Arc::new(AtomicBool::new(false)),
        };

        Ok((transcriber, segment_rx))
    }

    /// Feed captured samples to the VAD and forward finished segments.
    /// Called from the capture callback thread; never blocks on Whisper.
    pub fn accept_waveform(&self, samples: &[f32]) {
        let mut state = self.vad_state.lock();
        state.vad.accept_waveform(samples.to_vec());

        let is_speech = state.vad.is_speech();
        self.speaking.store(is_speech, Ordering::SeqCst);

        if is_speech && !state.was_speaking {
            state.speech_start = Some(Instant::now());
            debug!("Speech started");
        } else if !is_speech
            && state.was_speaking
            && let Some(start) = state.speech_start.take()
        {
            debug!("Speech ended ({:.1}s)", start.elapsed().as_secs_f32());
        }
        state.was_speaking = is_speech;

        if !state.vad.is_empty() {
            let segment = state.vad.front();
            state.vad.pop();
            drop(state);

            if segment.samples.is_empty() {
                return;
            }

            debug!("Segment completed: {} samples", segment.samples.len());
            if let Err(e) = self.segment_tx.try_send(segment.samples) {
                warn!("Dropping speech segment (queue full): {}", e);
            }
        }
    }

    /// Discard buffered audio so a new session starts clean.
    pub fn reset(&self) {
        let mut state = self.vad_state.lock();
        state.vad.clear();
        state.vad.reset();
        state.was_speaking = false;
        state.speech_start = None;
        self.speaking.store(false, Ordering::SeqCst);
    }

    /// Transcribe one segment. Returns `None` for empty audio or empty text.
    pub fn transcribe(&self, samples: &[f32]) -> Option<String> {
        if samples.is_empty() {
            return None;
        }

        debug!("Transcribing {} samples", samples.len());

        let mut whisper = self.whisper.lock();
        let transcription = whisper.transcribe(self.sample_rate, samples);
        drop(whisper);

        let text = transcription.text.trim().to_string();
        if text.is_empty() {
            debug!("Empty transcription result");
            return None;
        }

        info!("🗣️ Heard: {}", text);
        Some(text)
    }

    /// Whether the VAD currently detects speech.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }
}
