//! Audio capture from an input device
//!
//! The capture stream runs in a dedicated thread. Device callbacks deliver
//! arbitrary slice lengths; a [`BlockAssembler`] regroups them into
//! fixed-size i16 blocks, applies the live client volume, and hands each
//! completed block to the sending loop.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::volume::{scale_sample, SharedVolume};
use crate::error::AudioError;
use crate::protocol::AudioFormat;

/// Completed blocks waiting to be sent
const CAPTURE_QUEUE_BLOCKS: usize = 32;

/// Regroups captured samples into fixed-size blocks
pub struct BlockAssembler {
    pending: Vec<i16>,
    block_len: usize,
    volume: SharedVolume,
    tx: Sender<Vec<i16>>,
    dropped: Arc<AtomicU64>,
}

impl BlockAssembler {
    pub fn new(
        block_len: usize,
        volume: SharedVolume,
        tx: Sender<Vec<i16>>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            pending: Vec::with_capacity(block_len),
            block_len,
            volume,
            tx,
            dropped,
        }
    }

    /// Append samples, emitting every block that completes
    pub fn push_samples<I: IntoIterator<Item = i16>>(&mut self, samples: I) {
        let volume = self.volume.load().get();
        for sample in samples {
            self.pending.push(scale_sample(sample, volume));
            if self.pending.len() == self.block_len {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_len));
                self.emit(block);
            }
        }
    }

    fn emit(&mut self, block: Vec<i16>) {
        match self.tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Convert a float sample in `[-1.0, 1.0]` to i16
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Audio capture instance for a single input device
pub struct AudioCapture {
    device: Option<cpal::Device>,
    sample_format: SampleFormat,
    config: StreamConfig,
    format: AudioFormat,
    volume: SharedVolume,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    tx: Sender<Vec<i16>>,
    /// Blocks dropped because the sending loop fell behind
    dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Prepare a capture on `device`. Returns the capture and the receiving
    /// end of its block channel.
    pub fn new(
        device: cpal::Device,
        format: AudioFormat,
        volume: SharedVolume,
    ) -> Result<(Self, Receiver<Vec<i16>>), AudioError> {
        let sample_format = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .sample_format();

        if !matches!(sample_format, SampleFormat::I16 | SampleFormat::F32) {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", sample_format)));
        }

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded(CAPTURE_QUEUE_BLOCKS);

        Ok((
            Self {
                device: Some(device),
                sample_format,
                config,
                format,
                volume,
                running: Arc::new(AtomicBool::new(false)),
                thread_handle: None,
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        ))
    }

    /// Start capturing audio
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self
            .device
            .take()
            .ok_or_else(|| AudioError::StreamError("capture already used".to_string()))?;

        let mut assembler = BlockAssembler::new(
            self.format.samples_per_block(),
            self.volume.clone(),
            self.tx.clone(),
            self.dropped.clone(),
        );
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let running = self.running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let err_fn = |err| tracing::error!("Input stream error: {}", err);

                let stream = match sample_format {
                    SampleFormat::I16 => device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            assembler.push_samples(data.iter().copied());
                        },
                        err_fn,
                        None,
                    ),
                    _ => device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            assembler.push_samples(data.iter().map(|&s| f32_to_i16(s)));
                        },
                        err_fn,
                        None,
                    ),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".to_string())));
        if started.is_err() {
            self.stop();
        }
        started
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
