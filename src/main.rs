//! Animal Speech - say an animal name, see the animal.
//!
//! Listens to the microphone continuously, recognizes animal names from a
//! closed vocabulary using voice activity detection (Silero VAD) and speech
//! recognition (Whisper), and shows the matching image and label.

mod animals;
mod audio;
mod config;
mod recognition;
mod stt;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use animals::{TerminalDisplay, Vocabulary};
use audio::{CaptureSettings, CpalProbe, PermissionGate};
use config::AppConfig;
use recognition::{RecognitionLoop, listen};
use stt::SherpaRecognizerFactory;

/// Pause before probing the microphone again after a session could not start.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG, fall back to the verbose flag, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🦊 Animal Speech v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        error!("Expected silero_vad.onnx and whisper/whisper-small-*.int8.onnx under --model-dir.");
        std::process::exit(1);
    }
    config.log_config();

    let config = Arc::new(config);
    let vocabulary = Vocabulary::standard();
    let resources = config.image_resources();

    let missing = resources.missing(&vocabulary);
    if !missing.is_empty() {
        warn!("{} of {} animal images missing under {}: {}", missing.len(), vocabulary.len(), resources.directory().display(), missing.join(", "));
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let gate = PermissionGate::new(CpalProbe, CaptureSettings::speech(config.sample_rate));
    let factory = SherpaRecognizerFactory::new(config.clone());
    let mut recognition = RecognitionLoop::new(factory, vocabulary, resources, TerminalDisplay::new());

    let outcome = listen(&gate, &mut recognition, &config.language(), &shutdown, RETRY_DELAY).await;

    recognition.dispose().await;
    debug!("Recognition loop {:?}", recognition.state());

    let last_display = recognition.display();
    if let Some(image) = last_display.image_source() {
        debug!("Last shown: {} ({})", last_display.label(), image.display());
    }

    let stats = recognition.stats();
    info!("✅ Animal Speech stopped ({} shown, {} discarded, {} restarts)", stats.accepted, stats.discarded, stats.restarts);
    outcome
}
