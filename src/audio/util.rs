//! Shared audio utilities for capture and the permission probe.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Get a human-readable device name, or "Unknown".
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Find the best matching input configuration.
///
/// Accepts mono or stereo F32 configurations and prefers one that supports
/// `target_sample_rate` directly; otherwise picks the closest rate of the
/// first candidate so the capturer can resample.
///
/// # Errors
/// Returns an error if no mono/stereo F32 configuration exists.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let candidates: Vec<SupportedStreamConfigRange> =
        configs.filter(|config| config.channels() <= 2 && config.sample_format() == SampleFormat::F32).collect();

    if candidates.is_empty() {
        anyhow::bail!("No F32 audio configuration found - this is unexpected on modern hardware");
    }

    if let Some(config) = candidates.iter().find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&target_sample_rate)) {
        return Ok((*config).with_sample_rate(target_sample_rate));
    }

    let config = &candidates[0];
    let rate = nearest_rate(config.min_sample_rate(), config.max_sample_rate(), target_sample_rate);
    Ok((*config).with_sample_rate(rate))
}

/// Clamp `target` into `[min, max]`.
fn nearest_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max)
}

/// Mix interleaved frames down to mono by averaging channels.
pub fn convert_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}
