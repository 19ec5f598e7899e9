//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::animals::{ImageResources, Vocabulary, print_animals};
use crate::stt::Language;

/// Language value that resolves to the user's system language.
const SYSTEM_LANGUAGE: &str = "system";

/// Longest accepted session timeout in seconds (one day).
const MAX_SESSION_TIMEOUT_SECS: f32 = 86_400.0;

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

impl Provider {
    /// Provider string understood by sherpa-rs.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Animal recognizer configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "animal-speech")]
#[command(author, version, about = "Say an animal name, see the animal", long_about = None)]
pub struct AppConfig {
    /// List the recognizable animals with their image paths and exit
    #[arg(long)]
    pub list_animals: bool,

    /// Directory containing model files (Whisper, VAD)
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Assets root holding Images/Animals/<name>.jpg
    #[arg(long, short = 'a', env = "ANIMAL_ASSETS_DIR", default_value = "assets")]
    pub assets_dir: PathBuf,

    /// Recognition language tag (e.g., en-US, de-DE), or "system" for the user's language
    #[arg(long, short = 'l', default_value = SYSTEM_LANGUAGE)]
    pub language: String,

    /// Audio sample rate for speech recognition
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Voice activity detection threshold (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    pub vad_threshold: f32,

    /// VAD silence duration in seconds (how long to wait before considering a word ended)
    #[arg(long, default_value = "0.5")]
    pub vad_silence_duration: f32,

    /// Seconds of silence after which a listening session completes and restarts
    #[arg(long, default_value = "20", value_parser = parse_session_timeout)]
    pub session_timeout: f32,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Number of threads for all models (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// VAD threads (0 = use 1)
    #[arg(long, default_value = "0")]
    pub vad_threads: usize,

    /// STT threads (0 = use num_threads)
    #[arg(long, default_value = "0")]
    pub stt_threads: usize,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();

        if config.list_animals {
            print_animals(&Vocabulary::standard(), &config.image_resources());
            std::process::exit(0);
        }

        config.normalize_thread_counts();
        config
    }

    /// Auto-detect thread counts based on CPU cores and provider.
    ///
    /// With CUDA the GPU handles parallelism, so every model gets one thread.
    /// On CPU Whisper gets cores/3 threads and the VAD one.
    fn normalize_thread_counts(&mut self) {
        let cpu_cores = num_cpus::get();
        let using_cuda = self.effective_stt_provider() == Provider::Cuda;

        if self.num_threads == 0 {
            self.num_threads = if using_cuda { 1 } else { (cpu_cores / 3).max(1) };
        }

        if self.vad_threads == 0 {
            self.vad_threads = 1;
        }

        if self.stt_threads == 0 {
            self.stt_threads = if using_cuda { 1 } else { self.num_threads };
        }

        if self.verbose {
            info!(
                "CPU cores: {}, Provider: {}, Thread counts: VAD={}, STT={}",
                cpu_cores,
                self.effective_stt_provider(),
                self.vad_threads,
                self.stt_threads
            );
        }
    }

    /// Get the effective STT provider.
    pub fn effective_stt_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Resolve the recognition language, falling back to the system language.
    pub fn language(&self) -> Language {
        if self.language.trim().is_empty() || self.language.eq_ignore_ascii_case(SYSTEM_LANGUAGE) {
            Language::system()
        } else {
            Language::new(self.language.trim())
        }
    }

    /// Image locations for the animals under the assets directory.
    pub fn image_resources(&self) -> ImageResources {
        ImageResources::new(&self.assets_dir)
    }

    /// Silence after which a session completes.
    pub fn session_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.session_timeout.clamp(0.0, MAX_SESSION_TIMEOUT_SECS)).unwrap_or(Duration::from_secs(20))
    }

    /// Get the path to the Whisper encoder model (multilingual).
    pub fn whisper_encoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-encoder.int8.onnx")
    }

    /// Get the path to the Whisper decoder model (multilingual).
    pub fn whisper_decoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-decoder.int8.onnx")
    }

    /// Get the path to the Whisper tokens file (multilingual).
    pub fn whisper_tokens_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-tokens.txt")
    }

    /// Get the path to the VAD model.
    pub fn vad_model_path(&self) -> PathBuf {
        self.model_dir.join("silero_vad.onnx")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.model_dir.exists() {
            anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
        }

        let required_files = [self.whisper_encoder_path(), self.whisper_decoder_path(), self.whisper_tokens_path(), self.vad_model_path()];

        for path in &required_files {
            if !path.exists() {
                anyhow::bail!("Required model file not found: {}", path.display());
            }
        }

        self.validate_ranges()
    }

    /// Numeric checks that need no files on disk.
    fn validate_ranges(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("VAD threshold must be between 0.0 and 1.0");
        }

        if self.vad_silence_duration <= 0.0 {
            anyhow::bail!("VAD silence duration must be positive");
        }

        if self.sample_rate == 0 {
            anyhow::bail!("Sample rate must be positive");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Model directory: {}", self.model_dir.display());
        info!("  Assets directory: {}", self.assets_dir.display());
        info!("  Language: {} ({})", self.language(), self.language);
        info!("  Sample rate: {} Hz", self.sample_rate);
        info!("  VAD threshold: {}", self.vad_threshold);
        info!("  VAD silence duration: {}s", self.vad_silence_duration);
        info!("  Session timeout: {}s", self.session_timeout);
        info!("  STT provider: {}", self.effective_stt_provider());
    }
}

/// Get the default model directory (~/.animal-speech/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".animal-speech").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        info!("Detected macOS, using CoreML provider");
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() {
            info!("Detected NVIDIA GPU, using CUDA provider");
            Provider::Cuda
        } else {
            info!("No GPU detected, using CPU provider");
            Provider::Cpu
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        info!("Using CPU provider");
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    // Desktop driver nodes, then Jetson nodes
    let nvidia_paths = ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvhost-ctrl", "/dev/nvhost-ctrl-gpu", "/etc/nv_tegra_release"];

    nvidia_paths.iter().any(|path| Path::new(path).exists())
}

/// Parse and validate the session timeout in seconds.
fn parse_session_timeout(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if value > 0.0 && value <= MAX_SESSION_TIMEOUT_SECS {
        Ok(value)
    } else {
        Err(format!("session timeout must be between 0 and {} seconds, got {}", MAX_SESSION_TIMEOUT_SECS, value))
    }
}
