//! Microphone capture using cpal.
//!
//! Streams mono samples from the default input device, resampled to the
//! recognizer rate, into a lock-free ring buffer. A drain thread moves them to
//! a callback thread so the audio callback never blocks on the consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, error, info, warn};

use super::resampler::ResamplerState;
use super::util::{convert_to_mono, find_best_config, get_device_name};

/// Ring buffer size in samples (~4 seconds at 16kHz).
const RING_SIZE: usize = 65536;

/// Chunks queued for the callback thread (~1 second of audio).
const CALLBACK_QUEUE: usize = 32;

/// Samples moved per drain iteration.
const DRAIN_CHUNK: usize = 2048;

/// Audio capturer that streams samples from the microphone.
pub struct Capturer {
    stream: Stream,                             // cpal audio stream (kept alive)
    running: Arc<AtomicBool>,                   // Samples flow only while set
    faulted: Arc<AtomicBool>,                   // Set when the stream reports an error
    shutdown: Arc<AtomicBool>,                  // Permanent shutdown flag
    drain_handle: Option<JoinHandle<()>>,       // Thread draining ring buffer
    callback_handle: Option<JoinHandle<()>>,    // Thread calling user callback
    consumer: Option<ringbuf::HeapCons<f32>>,   // Ring buffer consumer
    sender: Option<SyncSender<Vec<f32>>>,       // Channel sender to callback thread
}

impl Capturer {
    /// Open the default input device.
    ///
    /// The stream is created paused; call [`Capturer::start`] to begin.
    ///
    /// # Arguments
    /// * `sample_rate` - Rate delivered to `callback` (16000 for the recognizer)
    /// * `callback` - Receives mono samples on a dedicated thread
    ///
    /// # Errors
    /// Returns an error if there is no input device or the stream cannot be built.
    pub fn new<F>(sample_rate: u32, callback: F) -> Result<Self>
    where
        F: Fn(&[f32]) + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<Vec<f32>>(CALLBACK_QUEUE);

        let callback_handle = std::thread::spawn(move || {
            while let Ok(samples) = receiver.recv() {
                callback(&samples);
            }
            debug!("Audio callback thread exiting");
        });

        let host = cpal::default_host();
        let device = host.default_input_device().context("No input device available")?;

        info!("Using input device: {}", get_device_name(&device));

        let supported_configs = device.supported_input_configs().context("Failed to get supported input configs")?;
        let config = find_best_config(supported_configs, sample_rate)?;
        let device_sample_rate = config.sample_rate();

        let needs_resampling = device_sample_rate != sample_rate;
        if needs_resampling {
            info!("Device sample rate {} Hz differs from target {} Hz - resampling will be applied", device_sample_rate, sample_rate);
        }

        debug!("Audio capture config: {} Hz, {} channels, {:?}", device_sample_rate, config.channels(), config.sample_format());

        let running = Arc::new(AtomicBool::new(false));
        let faulted = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let running_clone = running.clone();
        let faulted_clone = faulted.clone();
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let err_fn = move |err| {
            error!("Audio capture error: {}", err);
            faulted_clone.store(true, Ordering::SeqCst);
        };

        let ring = HeapRb::<f32>::new(RING_SIZE);
        let (mut producer, consumer) = ring.split();

        let resampler_state = if needs_resampling { Some(ResamplerState::new(device_sample_rate, sample_rate)?) } else { None };
        let dropped = AtomicU64::new(0);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running_clone.load(Ordering::Relaxed) {
                    return;
                }

                let samples = convert_to_mono(data, channels);
                let samples = match &resampler_state {
                    Some(state) => state.lock().process_samples(&samples),
                    None => Some(samples),
                };

                if let Some(samples) = samples {
                    let written = producer.push_slice(&samples);
                    if written < samples.len() {
                        let count = dropped.fetch_add(1, Ordering::Relaxed);
                        if count.is_multiple_of(100) {
                            warn!("Ring buffer full, dropped {} audio chunks", count + 1);
                        }
                    }
                }
            },
            err_fn,
            None,
        )?;

        info!("Audio capture configured: device {} Hz -> output {} Hz", device_sample_rate, sample_rate);

        Ok(Self {
            stream,
            running,
            faulted,
            shutdown,
            drain_handle: None,
            callback_handle: Some(callback_handle),
            consumer: Some(consumer),
            sender: Some(sender),
        })
    }

    /// Start or resume capturing.
    pub fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.stream.play().context("Failed to start audio stream")?;

        if self.drain_handle.is_some() {
            debug!("Audio capture resumed");
            return Ok(());
        }

        let mut consumer = self.consumer.take().context("Consumer already taken")?;
        let sender = self.sender.take().context("Sender already taken")?;
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();

        self.drain_handle = Some(std::thread::spawn(move || {
            let mut read_buffer = vec![0.0f32; DRAIN_CHUNK];

            loop {
                if shutdown.load(Ordering::Relaxed) {
                    debug!("Drain thread shutting down");
                    return;
                }

                if !running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }

                let available = consumer.occupied_len();
                if available == 0 {
                    std::thread::sleep(Duration::from_micros(100));
                    continue;
                }

                let to_read = available.min(read_buffer.len());
                let read = consumer.pop_slice(&mut read_buffer[..to_read]);
                if read > 0 && sender.send(read_buffer[..read].to_vec()).is_err() {
                    debug!("Audio channel closed, drain thread exiting");
                    return;
                }
            }
        }));

        info!("Audio capture started");
        Ok(())
    }

    /// Pause capturing. Threads stay alive for a later [`Capturer::start`].
    pub fn pause(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.stream.pause().context("Failed to pause audio stream")?;
        debug!("Audio capture paused");
        Ok(())
    }

    /// Whether the stream reported an error since it was opened.
    pub fn has_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Shared fault flag, for watchers on other tasks.
    pub fn fault_flag(&self) -> Arc<AtomicBool> {
        self.faulted.clone()
    }

    /// Shared running flag; clearing it stops delivery without touching the stream.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Permanently stop and join the worker threads.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stream.pause();

        drop(self.sender.take());

        if let Some(handle) = self.drain_handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Failed to join drain thread: {:?}", e);
        }

        if let Some(handle) = self.callback_handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Failed to join callback thread: {:?}", e);
        }

        debug!("Audio capture stopped");
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
