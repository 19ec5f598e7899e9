//! Microphone permission gate.
//!
//! Probes whether audio capture in speech mode can be initialized and turns
//! the expected failure categories into a boolean plus an optional notice.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DevicesError, PlayStreamError, SupportedStreamConfigsError};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::util::{find_best_config, get_device_name};
use crate::animals::DisplaySurface;

/// Notice shown when the platform lacks capture components.
pub const MEDIA_COMPONENTS_UNAVAILABLE: &str = "Media player components are unavailable.";

/// Notice shown when the system has no microphone.
pub const NO_CAPTURE_DEVICES: &str = "No Audio Capture devices are present on this system.";

/// Substrings of backend messages that mean the OS refused microphone access.
const ACCESS_DENIED_HINTS: &[&str] = &["permission", "denied", "unauthorized", "not authorized", "access is denied", "privacy"];

/// What the capture session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Speech,
}

/// Capture initialization settings: audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub category: MediaCategory,
}

impl CaptureSettings {
    /// Audio-only capture for speech at `sample_rate`.
    pub fn speech(sample_rate: u32) -> Self {
        Self { sample_rate, category: MediaCategory::Speech }
    }
}

/// Failure categories of capture initialization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureInitError {
    #[error("audio capture components are unavailable: {0}")]
    ComponentsUnavailable(String),

    #[error("microphone access denied: {0}")]
    AccessDenied(String),

    #[error("no audio capture devices are present")]
    NoCaptureDevices,

    #[error("audio capture initialization failed: {0}")]
    Other(String),
}

/// The failure the gate does not handle; callers should treat it as fatal.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("unclassified capture error: {0}")]
    Unclassified(#[source] CaptureInitError),
}

/// Result of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    CaptureUnavailable,
    NoDevice,
}

impl PermissionOutcome {
    pub fn is_granted(self) -> bool {
        self == PermissionOutcome::Granted
    }
}

/// Something that can try to initialize audio capture.
pub trait CaptureProbe {
    async fn initialize(&self, settings: &CaptureSettings) -> Result<(), CaptureInitError>;
}

/// Decides whether the microphone may be used.
pub struct PermissionGate<P> {
    probe: P,
    settings: CaptureSettings,
}

impl<P: CaptureProbe> PermissionGate<P> {
    pub fn new(probe: P, settings: CaptureSettings) -> Self {
        Self { probe, settings }
    }

    #[cfg(test)]
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Check microphone access, showing a notice on `display` for the
    /// categories the user can act on.
    ///
    /// Every call probes again, since access can change while the
    /// application runs.
    ///
    /// # Errors
    /// Returns `PermissionError::Unclassified` for failures outside the known
    /// categories.
    pub async fn check<D: DisplaySurface + ?Sized>(&self, display: &mut D) -> Result<PermissionOutcome, PermissionError> {
        debug!("Probing microphone access ({:?}, {} Hz)", self.settings.category, self.settings.sample_rate);

        match self.probe.initialize(&self.settings).await {
            Ok(()) => {
                info!("🎙️ Microphone access granted");
                Ok(PermissionOutcome::Granted)
            }
            Err(CaptureInitError::ComponentsUnavailable(reason)) => {
                warn!("Audio capture unavailable: {}", reason);
                display.show_notice(MEDIA_COMPONENTS_UNAVAILABLE);
                Ok(PermissionOutcome::CaptureUnavailable)
            }
            Err(CaptureInitError::AccessDenied(reason)) => {
                warn!("Microphone access denied: {}", reason);
                Ok(PermissionOutcome::Denied)
            }
            Err(CaptureInitError::NoCaptureDevices) => {
                warn!("No audio capture device found");
                display.show_notice(NO_CAPTURE_DEVICES);
                Ok(PermissionOutcome::NoDevice)
            }
            Err(other) => Err(PermissionError::Unclassified(other)),
        }
    }

    /// Boolean form of [`PermissionGate::check`].
    pub async fn request_microphone_permission<D: DisplaySurface + ?Sized>(&self, display: &mut D) -> Result<bool, PermissionError> {
        Ok(self.check(display).await?.is_granted())
    }
}

/// Probes the default cpal input device by opening and playing a stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalProbe;

impl CaptureProbe for CpalProbe {
    async fn initialize(&self, settings: &CaptureSettings) -> Result<(), CaptureInitError> {
        let settings = *settings;
        // cpal streams are not Send on every platform; build and drop on one thread
        tokio::task::spawn_blocking(move || probe_default_input(&settings))
            .await
            .map_err(|e| CaptureInitError::Other(format!("probe task failed: {e}")))?
    }
}

fn probe_default_input(settings: &CaptureSettings) -> Result<(), CaptureInitError> {
    let host = cpal::default_host();

    // Enumerating devices fails when the audio backend itself is missing
    let _devices = host.input_devices().map_err(map_devices_error)?;

    let device = host.default_input_device().ok_or(CaptureInitError::NoCaptureDevices)?;
    debug!("Probing input device: {}", get_device_name(&device));

    let configs = device.supported_input_configs().map_err(map_configs_error)?;
    let config = find_best_config(configs, settings.sample_rate).map_err(|e| CaptureInitError::Other(e.to_string()))?;

    let stream = device
        .build_input_stream(&config.config(), |_: &[f32], _: &cpal::InputCallbackInfo| {}, |err| debug!("Probe stream error: {}", err), None)
        .map_err(map_build_error)?;
    stream.play().map_err(map_play_error)?;
    drop(stream);

    Ok(())
}

fn map_devices_error(err: DevicesError) -> CaptureInitError {
    CaptureInitError::ComponentsUnavailable(err.to_string())
}

fn map_configs_error(err: SupportedStreamConfigsError) -> CaptureInitError {
    match err {
        SupportedStreamConfigsError::DeviceNotAvailable => CaptureInitError::NoCaptureDevices,
        other => classify_backend_message(&other.to_string()),
    }
}

fn map_build_error(err: BuildStreamError) -> CaptureInitError {
    match err {
        BuildStreamError::DeviceNotAvailable => CaptureInitError::NoCaptureDevices,
        other => classify_backend_message(&other.to_string()),
    }
}

fn map_play_error(err: PlayStreamError) -> CaptureInitError {
    match err {
        PlayStreamError::DeviceNotAvailable => CaptureInitError::NoCaptureDevices,
        other => classify_backend_message(&other.to_string()),
    }
}

/// Classify a backend-specific failure by its message.
fn classify_backend_message(message: &str) -> CaptureInitError {
    let lower = message.to_lowercase();
    if ACCESS_DENIED_HINTS.iter().any(|hint| lower.contains(hint)) {
        CaptureInitError::AccessDenied(message.to_string())
    } else {
        CaptureInitError::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::animals::RecordingDisplay;

    struct FakeProbe {
        result: Result<(), CaptureInitError>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(result: Result<(), CaptureInitError>) -> Self {
            Self { result, calls: AtomicUsize::new(0) }
        }
    }

    impl CaptureProbe for FakeProbe {
        async fn initialize(&self, settings: &CaptureSettings) -> Result<(), CaptureInitError> {
            assert_eq!(settings.category, MediaCategory::Speech);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn gate(result: Result<(), CaptureInitError>) -> PermissionGate<FakeProbe> {
        PermissionGate::new(FakeProbe::new(result), CaptureSettings::speech(16000))
    }

    #[tokio::test]
    async fn test_success_grants_without_notice() {
        let mut display = RecordingDisplay::default();
        assert!(gate(Ok(())).request_microphone_permission(&mut display).await.unwrap());
        assert!(display.notices.is_empty());
    }

    #[tokio::test]
    async fn test_missing_components_denies_with_notice() {
        let mut display = RecordingDisplay::default();
        let gate = gate(Err(CaptureInitError::ComponentsUnavailable("no backend".into())));
        assert_eq!(gate.check(&mut display).await.unwrap(), PermissionOutcome::CaptureUnavailable);
        assert_eq!(display.notices, vec![MEDIA_COMPONENTS_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn test_access_denied_is_silent() {
        let mut display = RecordingDisplay::default();
        let gate = gate(Err(CaptureInitError::AccessDenied("privacy setting".into())));
        assert!(!gate.request_microphone_permission(&mut display).await.unwrap());
        assert!(display.notices.is_empty());
    }

    #[tokio::test]
    async fn test_no_device_denies_with_notice() {
        let mut display = RecordingDisplay::default();
        let gate = gate(Err(CaptureInitError::NoCaptureDevices));
        assert!(!gate.request_microphone_permission(&mut display).await.unwrap());
        assert_eq!(display.notices, vec![NO_CAPTURE_DEVICES]);
    }

    #[tokio::test]
    async fn test_unclassified_error_propagates() {
        let mut display = RecordingDisplay::default();
        let gate = gate(Err(CaptureInitError::Other("driver crashed".into())));
        let err = gate.request_microphone_permission(&mut display).await.unwrap_err();
        assert!(matches!(err, PermissionError::Unclassified(CaptureInitError::Other(_))));
        assert!(display.notices.is_empty());
    }

    #[tokio::test]
    async fn test_each_call_probes_again() {
        let mut display = RecordingDisplay::default();
        let gate = gate(Err(CaptureInitError::NoCaptureDevices));
        gate.check(&mut display).await.unwrap();
        gate.check(&mut display).await.unwrap();
        assert_eq!(gate.probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(display.notices.len(), 2);
    }

    #[test]
    fn test_backend_messages_are_classified() {
        assert!(matches!(classify_backend_message("Access is denied. (0x80070005)"), CaptureInitError::AccessDenied(_)));
        assert!(matches!(classify_backend_message("Permission not granted"), CaptureInitError::AccessDenied(_)));
        assert!(matches!(classify_backend_message("buffer underrun"), CaptureInitError::Other(_)));
        assert_eq!(map_build_error(BuildStreamError::DeviceNotAvailable), CaptureInitError::NoCaptureDevices);
        assert_eq!(map_play_error(PlayStreamError::DeviceNotAvailable), CaptureInitError::NoCaptureDevices);
    }
}
