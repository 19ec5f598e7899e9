//! Streaming resampler for microphone input, using rubato's FFT resampler.

use std::sync::Arc;

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use parking_lot::Mutex;
use rubato::{Fft, FixedSync, Resampler};

/// Chunk size for FFT-based resampling (provides good quality and performance).
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Resampler state carried across capture callbacks.
///
/// Device callbacks deliver arbitrary buffer sizes, so input accumulates
/// until a full chunk can be converted.
pub struct ResamplerState {
    resampler: Fft<f32>,
    output_buffer: Vec<f32>,
    output_frames_max: usize,
    input_buffer: Vec<f32>, // Samples waiting for a full chunk
}

impl ResamplerState {
    /// Create a mono resampler from `from_rate` to `to_rate`, shared for the audio callback.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Arc<Mutex<Self>>> {
        let resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
            .context("Failed to create resampler")?;

        let output_frames_max = resampler.output_frames_max();

        Ok(Arc::new(Mutex::new(Self {
            resampler,
            output_buffer: vec![0.0f32; output_frames_max],
            output_frames_max,
            input_buffer: Vec::with_capacity(CHUNK_SIZE * 2),
        })))
    }

    /// Buffer `samples` and convert one chunk once enough input is available.
    ///
    /// # Returns
    /// Resampled audio, or `None` while more input is needed.
    pub fn process_samples(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        self.input_buffer.extend_from_slice(samples);

        if self.input_buffer.len() < CHUNK_SIZE {
            return None;
        }

        let chunk: Vec<f32> = self.input_buffer.drain(..CHUNK_SIZE).collect();
        let input_adapter = InterleavedSlice::new(&chunk, 1, CHUNK_SIZE).ok()?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.output_buffer, 1, self.output_frames_max).ok()?;

        let (_, frames_written) = self.resampler.process_into_buffer(&input_adapter, &mut output_adapter, None).ok()?;

        if frames_written > 0 { Some(self.output_buffer[..frames_written].to_vec()) } else { None }
    }

    /// Samples buffered but not yet converted.
    pub fn pending(&self) -> usize {
        self.input_buffer.len()
    }
}
