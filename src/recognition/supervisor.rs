//! Keeps the loop listening for as long as the microphone allows it.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::controller::{LoopExit, RecognitionError, RecognitionLoop};
use crate::animals::DisplaySurface;
use crate::audio::permission::{CaptureProbe, PermissionGate};
use crate::stt::{Language, RecognizerFactory};

/// Check microphone access, then initialize, start and run the loop until
/// `shutdown` is cancelled or access is refused.
///
/// A session that fails to start or to restart sends the loop back to the
/// permission check after `retry_delay`.
///
/// # Errors
/// Unclassified capture failures and recognizer setup failures (model
/// loading, constraint compilation) end the run.
pub async fn listen<P, F, D>(
    gate: &PermissionGate<P>,
    recognition: &mut RecognitionLoop<F, D>,
    language: &Language,
    shutdown: &CancellationToken,
    retry_delay: Duration,
) -> Result<()>
where
    P: CaptureProbe,
    F: RecognizerFactory,
    D: DisplaySurface,
{
    loop {
        let granted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            granted = gate.request_microphone_permission(recognition.display_mut()) => granted?,
        };
        if !granted {
            warn!("🔇 Microphone not available, not listening");
            return Ok(());
        }

        recognition.initialize(language).await?;

        let stopped = match recognition.start().await {
            Ok(()) => {
                info!("Say an animal name (Ctrl+C to quit)");
                match recognition.run(shutdown).await {
                    LoopExit::Shutdown => return Ok(()),
                    LoopExit::RestartFailed(e) => e,
                }
            }
            Err(RecognitionError::Speech(e)) => e,
            Err(e) => return Err(e.into()),
        };

        warn!("⚠️  Listening stopped ({}), checking the microphone again", stopped);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::animals::{ImageResources, RecordingDisplay, Vocabulary};
    use crate::audio::permission::{CaptureInitError, CaptureSettings};
    use crate::recognition::controller::LoopState;
    use crate::recognition::fakes::{FakeFactory, Shared};
    use crate::stt::SpeechError;

    const RETRY_DELAY: Duration = Duration::from_secs(2);

    /// Grants or denies access; from the second call on the device works
    /// again, and the call numbered `cancel_on` requests shutdown.
    struct ScriptedProbe {
        deny: bool,
        calls: AtomicUsize,
        cancel_on: usize,
        shared: Arc<Mutex<Shared>>,
        shutdown: CancellationToken,
    }

    impl CaptureProbe for ScriptedProbe {
        async fn initialize(&self, _settings: &CaptureSettings) -> Result<(), CaptureInitError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= 2 {
                self.shared.lock().fail_start = false;
            }
            if call == self.cancel_on {
                self.shutdown.cancel();
            }
            if self.deny { Err(CaptureInitError::AccessDenied("privacy setting".into())) } else { Ok(()) }
        }
    }

    struct Setup {
        gate: PermissionGate<ScriptedProbe>,
        recognition: RecognitionLoop<FakeFactory, RecordingDisplay>,
        shared: Arc<Mutex<Shared>>,
        shutdown: CancellationToken,
    }

    fn setup(deny: bool, cancel_on: usize) -> Setup {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let shutdown = CancellationToken::new();
        let probe = ScriptedProbe { deny, calls: AtomicUsize::new(0), cancel_on, shared: shared.clone(), shutdown: shutdown.clone() };
        let gate = PermissionGate::new(probe, CaptureSettings::speech(16000));
        let recognition = RecognitionLoop::new(
            FakeFactory { shared: shared.clone() },
            Vocabulary::standard(),
            ImageResources::new("assets"),
            RecordingDisplay::default(),
        );
        Setup { gate, recognition, shared, shutdown }
    }

    fn probe_calls(gate: &PermissionGate<ScriptedProbe>) -> usize {
        gate.probe().calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_goes_back_to_permission_check() {
        let Setup { gate, mut recognition, shared, shutdown } = setup(false, 2);
        shared.lock().fail_start = true;

        listen(&gate, &mut recognition, &Language::new("en-US"), &shutdown, RETRY_DELAY).await.unwrap();

        assert_eq!(probe_calls(&gate), 2);
        let shared = shared.lock();
        assert_eq!(shared.sources.len(), 2);
        assert_eq!(shared.dropped, 1);
        assert_eq!(shared.starts, 1);
        assert_eq!(recognition.state(), LoopState::Listening);
    }

    #[tokio::test]
    async fn test_denied_access_never_creates_recognizer() {
        let Setup { gate, mut recognition, shared, shutdown } = setup(true, 0);

        listen(&gate, &mut recognition, &Language::new("en-US"), &shutdown, RETRY_DELAY).await.unwrap();

        assert_eq!(probe_calls(&gate), 1);
        assert!(shared.lock().sources.is_empty());
        assert_eq!(recognition.state(), LoopState::Uninitialized);
    }

    #[tokio::test]
    async fn test_compile_failure_ends_run() {
        let Setup { gate, mut recognition, shared, shutdown } = setup(false, 0);
        shared.lock().fail_compile = true;

        let err = listen(&gate, &mut recognition, &Language::new("en-US"), &shutdown, RETRY_DELAY).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<RecognitionError>(), Some(RecognitionError::Speech(SpeechError::ConstraintCompilation(_)))));
        assert_eq!(probe_calls(&gate), 1);
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_skips_permission_check() {
        let Setup { gate, mut recognition, shutdown, .. } = setup(false, 0);
        shutdown.cancel();

        listen(&gate, &mut recognition, &Language::new("en-US"), &shutdown, RETRY_DELAY).await.unwrap();

        assert_eq!(probe_calls(&gate), 0);
    }
}
