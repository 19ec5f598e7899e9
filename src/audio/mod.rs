//! Audio capture and the microphone permission gate.
//!
//! Capture uses cpal with rubato resampling to the recognizer rate.

mod capture;
pub mod permission;
mod resampler;
mod util;

pub use capture::Capturer;
pub use permission::{CaptureSettings, CpalProbe, PermissionGate};
