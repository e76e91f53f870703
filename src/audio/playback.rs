//! Audio playback to an output device
//!
//! cpal pulls samples from a callback running on its own thread. Playout
//! pushes whole blocks through a small bounded channel; once the channel
//! is full, `write_block` blocks until the device has consumed a block, so
//! the device clock paces the playout loop.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::device::{get_default_output_device, get_output_device, AudioDevice};
use crate::audio::playout::OutputSink;
use crate::constants::OUTPUT_QUEUE_BLOCKS;
use crate::error::AudioError;
use crate::protocol::AudioFormat;

/// Owns the output stream; dropping it stops playback and closes the
/// paired [`BlockWriter`]
pub struct AudioPlayback {
    stream: cpal::Stream,
    device_name: String,
    device_underruns: Arc<AtomicU64>,
}

impl AudioPlayback {
    /// Open an output stream on `device_id` (`output:<name>` or a bare
    /// name), or the default output device.
    ///
    /// The stream is created paused; call [`start`](Self::start) once
    /// prebuffering is done.
    pub fn open(
        device_id: Option<&str>,
        format: AudioFormat,
    ) -> Result<(Self, BlockWriter), AudioError> {
        let device = match device_id {
            Some(id) => get_output_device(id)?,
            None => get_default_output_device()?,
        };
        Self::open_device(device, format)
    }

    fn open_device(
        device: AudioDevice,
        format: AudioFormat,
    ) -> Result<(Self, BlockWriter), AudioError> {
        let sample_format = device.default_output_config()?.sample_format();
        let device_name = device.name.clone();

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = bounded::<Vec<i16>>(OUTPUT_QUEUE_BLOCKS);
        let device_underruns = Arc::new(AtomicU64::new(0));
        let mut feeder = BlockFeeder::new(rx, device_underruns.clone());

        let err_fn = |err| tracing::error!("Output stream error: {}", err);
        let cpal_device = device.into_inner();

        let stream = match sample_format {
            SampleFormat::I16 => cpal_device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| feeder.fill(data),
                err_fn,
                None,
            ),
            SampleFormat::F32 => {
                let mut scratch: Vec<i16> = Vec::new();
                cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        feeder.fill(&mut scratch);
                        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = sample as f32 / 32768.0;
                        }
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{:?} on {}",
                    other, device_name
                )))
            }
        }
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(
            "Opened output {} ({} Hz, {} ch, {:?})",
            device_name,
            format.sample_rate,
            format.channels,
            sample_format
        );

        Ok((
            Self {
                stream,
                device_name,
                device_underruns,
            },
            BlockWriter { tx },
        ))
    }

    /// Start pulling samples
    pub fn start(&self) -> Result<(), AudioError> {
        self.stream
            .play()
            .map_err(|e| AudioError::CpalError(e.to_string()))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device callbacks that found no block ready and played zeros
    pub fn device_underruns(&self) -> u64 {
        self.device_underruns.load(Ordering::Relaxed)
    }
}

/// Sending half of the output channel
pub struct BlockWriter {
    tx: Sender<Vec<i16>>,
}

impl BlockWriter {
    /// A writer/feeder pair not attached to any device
    pub fn detached(capacity: usize) -> (Self, BlockFeeder) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, BlockFeeder::new(rx, Arc::new(AtomicU64::new(0))))
    }
}

impl OutputSink for BlockWriter {
    fn write_block(&mut self, block: &[i16]) -> Result<(), AudioError> {
        self.tx
            .send(block.to_vec())
            .map_err(|_| AudioError::OutputClosed)
    }
}

/// Receiving half, drained by the device callback
pub struct BlockFeeder {
    rx: Receiver<Vec<i16>>,
    current: Vec<i16>,
    pos: usize,
    underruns: Arc<AtomicU64>,
}

impl BlockFeeder {
    fn new(rx: Receiver<Vec<i16>>, underruns: Arc<AtomicU64>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
            underruns,
        }
    }

    /// Fill `out` from queued blocks; zeros when none are ready
    pub fn fill(&mut self, out: &mut [i16]) {
        let mut written = 0;
        while written < out.len() {
            if self.pos >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(block) => {
                        self.current = block;
                        self.pos = 0;
                        continue;
                    }
                    Err(_) => {
                        out[written..].fill(0);
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }

            let n = (self.current.len() - self.pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.current[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feeder_spans_block_boundaries() {
        let (mut writer, mut feeder) = BlockWriter::detached(4);
        writer.write_block(&[1, 2, 3]).unwrap();
        writer.write_block(&[4, 5, 6]).unwrap();

        let mut out = [0i16; 4];
        feeder.fill(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        let mut out = [9i16; 4];
        feeder.fill(&mut out);
        assert_eq!(out, [5, 6, 0, 0]);
        assert_eq!(feeder.underruns(), 1);
    }

    #[test]
    fn test_feeder_plays_zeros_when_starved() {
        let (_writer, mut feeder) = BlockWriter::detached(2);
        let mut out = [7i16; 8];
        feeder.fill(&mut out);
        assert_eq!(out, [0; 8]);
        assert_eq!(feeder.underruns(), 1);
    }

    #[test]
    fn test_writer_reports_closed_output() {
        let (mut writer, feeder) = BlockWriter::detached(2);
        drop(feeder);
        assert!(matches!(
            writer.write_block(&[0; 4]),
            Err(AudioError::OutputClosed)
        ));
    }
}
