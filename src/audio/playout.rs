//! Fixed-cadence playout
//!
//! The playout loop turns jitter buffer contents into a continuous stream of
//! fixed-size sample blocks. It starts in `Prebuffering` and moves to
//! `Steady` exactly once, when the buffer first reaches its prebuffer
//! minimum. There is no way back: sustained starvation degrades into
//! continuous silence rather than another prebuffering phase.
//!
//! One cycle in `Steady`:
//!
//! 1. Below the low watermark, emit synthesized silence. Otherwise dequeue
//!    a packet, falling back to silence if the buffer turned out empty.
//! 2. Decode little-endian i16 samples and scale them by the volume.
//! 3. Above the high watermark, discard one extra queued packet.
//! 4. Hand the block to the output sink.

use std::time::Duration;

use crate::audio::buffer::SharedJitterBuffer;
use crate::audio::volume::{scale_sample, Volume};
use crate::error::AudioError;

/// Destination for processed sample blocks.
///
/// `write_block` may block; its pacing sets the playout cadence.
pub trait OutputSink {
    fn write_block(&mut self, block: &[i16]) -> Result<(), AudioError>;
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    fn write_block(&mut self, block: &[i16]) -> Result<(), AudioError> {
        (**self).write_block(block)
    }
}

/// Collects blocks in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub blocks: Vec<Vec<i16>>,
}

impl OutputSink for MemorySink {
    fn write_block(&mut self, block: &[i16]) -> Result<(), AudioError> {
        self.blocks.push(block.to_vec());
        Ok(())
    }
}

/// Playout phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutState {
    Prebuffering,
    Steady,
}

/// Where the block of a cycle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// A packet dequeued from the jitter buffer
    Packet,
    /// Silence because occupancy was below the low watermark
    Silence,
    /// Silence because the dequeue unexpectedly found nothing
    UnderflowSilence,
}

impl BlockSource {
    pub fn is_silence(self) -> bool {
        !matches!(self, BlockSource::Packet)
    }
}

/// Outcome of one playout cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub source: BlockSource,
    /// Whether an extra packet was discarded to shrink the backlog
    pub shed: bool,
}

/// Playout loop state
pub struct PlayoutLoop {
    buffer: SharedJitterBuffer,
    volume: Volume,
    state: PlayoutState,
    /// Output block, reused every cycle
    output: Vec<i16>,
    cycles: u64,
}

impl PlayoutLoop {
    /// Create a playout loop producing blocks of `samples_per_block` samples
    pub fn new(buffer: SharedJitterBuffer, volume: Volume, samples_per_block: usize) -> Self {
        Self {
            buffer,
            volume,
            state: PlayoutState::Prebuffering,
            output: vec![0; samples_per_block],
            cycles: 0,
        }
    }

    pub fn state(&self) -> PlayoutState {
        self.state
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Number of steady-state cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The block produced by the last cycle
    pub fn output(&self) -> &[i16] {
        &self.output
    }

    /// Block until the prebuffer minimum is reached, then enter `Steady`
    pub fn prebuffer(&mut self) {
        if self.state == PlayoutState::Steady {
            return;
        }
        tracing::info!(
            "Pre-buffering audio ({} packets)...",
            self.buffer.thresholds().prebuffer_min
        );
        self.buffer.wait_for_prebuffer();
        self.enter_steady();
    }

    /// Bounded variant of [`prebuffer`](Self::prebuffer). Returns whether
    /// playout is now `Steady`.
    pub fn prebuffer_timeout(&mut self, timeout: Duration) -> bool {
        if self.state == PlayoutState::Steady {
            return true;
        }
        if self.buffer.wait_for_prebuffer_timeout(timeout) {
            self.enter_steady();
            true
        } else {
            false
        }
    }

    fn enter_steady(&mut self) {
        self.state = PlayoutState::Steady;
        tracing::info!(
            "Pre-buffering complete ({} packets buffered). Starting playback.",
            self.buffer.occupancy()
        );
    }

    /// Produce the next block into [`output`](Self::output)
    pub fn cycle(&mut self) -> CycleReport {
        let (block, source) = if self.buffer.should_insert_silence() {
            (self.buffer.insert_silence_packet(), BlockSource::Silence)
        } else {
            match self.buffer.dequeue() {
                Some(block) => (block, BlockSource::Packet),
                None => (
                    self.buffer.insert_silence_packet(),
                    BlockSource::UnderflowSilence,
                ),
            }
        };

        decode_scaled(&block, self.volume, &mut self.output);

        let shed = self.buffer.is_overfull() && self.buffer.discard_one();
        if shed {
            tracing::trace!(
                "Discarded one packet to shrink backlog (occupancy {})",
                self.buffer.occupancy()
            );
        }

        self.cycles += 1;
        CycleReport { source, shed }
    }

    /// Run one cycle and write the block to `sink`
    pub fn step<S: OutputSink>(&mut self, sink: &mut S) -> Result<CycleReport, AudioError> {
        let report = self.cycle();
        sink.write_block(&self.output)?;
        Ok(report)
    }

    /// Prebuffer, then play forever.
    ///
    /// Write errors are logged and playback continues. Returns only when the
    /// sink reports the output device is gone.
    pub fn run<S: OutputSink>(&mut self, sink: &mut S) -> Result<(), AudioError> {
        self.prebuffer();

        loop {
            match self.step(sink) {
                Ok(_) => {}
                Err(AudioError::OutputClosed) => {
                    tracing::info!("Output closed after {} cycles", self.cycles);
                    return Err(AudioError::OutputClosed);
                }
                Err(e) => tracing::warn!("Error writing to output: {}", e),
            }
        }
    }
}

/// Decode little-endian i16 samples from `block` into `out`, scaling each.
///
/// A block shorter than `out` stops decoding early and the remaining output
/// samples are zeroed. Returns the number of samples decoded.
pub fn decode_scaled(block: &[u8], volume: Volume, out: &mut [i16]) -> usize {
    let volume = volume.get();
    let mut decoded = 0;

    for (sample, bytes) in out.iter_mut().zip(block.chunks_exact(2)) {
        *sample = scale_sample(i16::from_le_bytes([bytes[0], bytes[1]]), volume);
        decoded += 1;
    }

    out[decoded..].fill(0);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, JitterThresholds};
    use crate::protocol::samples_to_payload;
    use bytes::Bytes;

    const SAMPLES: usize = 8;
    const PAYLOAD: usize = SAMPLES * 2;

    fn thresholds() -> JitterThresholds {
        JitterThresholds {
            prebuffer_min: 2,
            low_watermark: 3,
            target: 4,
            high_watermark: 6,
            capacity: 16,
        }
    }

    fn block(value: i16) -> Bytes {
        samples_to_payload(&[value; SAMPLES])
    }

    fn playout(volume: f64) -> (SharedJitterBuffer, PlayoutLoop) {
        let buffer = create_shared_buffer(thresholds(), PAYLOAD).unwrap();
        let playout = PlayoutLoop::new(buffer.clone(), Volume::new(volume).unwrap(), SAMPLES);
        (buffer, playout)
    }

    #[test]
    fn test_decode_scaled() {
        let payload = samples_to_payload(&[10000, -10000, 32767, 0]);
        let mut out = [0i16; 4];
        let n = decode_scaled(&payload, Volume::new(0.5).unwrap(), &mut out);
        assert_eq!(n, 4);
        assert_eq!(out, [5000, -5000, 16383, 0]);
    }

    #[test]
    fn test_decode_short_block_zeroes_tail() {
        let payload = samples_to_payload(&[100, 200]);
        let mut out = [7i16; 4];
        let n = decode_scaled(&payload, Volume::FULL, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out, [100, 200, 0, 0]);
    }

    #[test]
    fn test_decode_ignores_odd_trailing_byte() {
        let mut out = [9i16; 2];
        let n = decode_scaled(&[0x01, 0x00, 0x02], Volume::FULL, &mut out);
        assert_eq!(n, 1);
        assert_eq!(out, [1, 0]);
    }

    #[test]
    fn test_prebuffer_transition() {
        let (buffer, mut playout) = playout(1.0);
        assert_eq!(playout.state(), PlayoutState::Prebuffering);

        buffer.enqueue(block(1));
        assert!(!playout.prebuffer_timeout(Duration::from_millis(10)));
        assert_eq!(playout.state(), PlayoutState::Prebuffering);

        buffer.enqueue(block(1));
        assert!(playout.prebuffer_timeout(Duration::from_millis(10)));
        assert_eq!(playout.state(), PlayoutState::Steady);

        // Draining below the minimum never returns to prebuffering
        while buffer.dequeue().is_some() {}
        assert!(playout.prebuffer_timeout(Duration::from_millis(1)));
        playout.cycle();
        assert_eq!(playout.state(), PlayoutState::Steady);
    }

    #[test]
    fn test_silence_gated_below_low_watermark() {
        let (buffer, mut playout) = playout(1.0);
        buffer.enqueue(block(500));
        buffer.enqueue(block(500));

        let report = playout.cycle();
        assert_eq!(report.source, BlockSource::Silence);
        assert!(playout.output().iter().all(|&s| s == 0));
        // The queued packets were not touched
        assert_eq!(buffer.occupancy(), 2);
        assert_eq!(buffer.stats().silence_inserted, 1);
        assert_eq!(buffer.stats().underflows, 0);
    }

    #[test]
    fn test_plays_packets_with_volume() {
        let (buffer, mut playout) = playout(0.5);
        for value in [1000, 2000, 3000, 4000] {
            buffer.enqueue(block(value));
        }

        let report = playout.cycle();
        assert_eq!(report.source, BlockSource::Packet);
        assert!(!report.shed);
        assert_eq!(playout.output(), &[500; SAMPLES]);
        assert_eq!(buffer.occupancy(), 3);
    }

    #[test]
    fn test_sheds_backlog_when_overfull() {
        let (buffer, mut playout) = playout(1.0);
        for value in 0..10 {
            buffer.enqueue(block(value));
        }

        // 10 -> 9 by playback, still above 6, so one more is discarded
        let report = playout.cycle();
        assert_eq!(report.source, BlockSource::Packet);
        assert!(report.shed);
        assert_eq!(playout.output(), &[0; SAMPLES]);
        assert_eq!(buffer.occupancy(), 8);

        let report = playout.cycle();
        assert!(report.shed);
        // Block 1 was discarded, so block 2 plays
        assert_eq!(playout.output(), &[2; SAMPLES]);
        assert_eq!(buffer.occupancy(), 6);

        let report = playout.cycle();
        assert!(!report.shed);
        assert_eq!(playout.output(), &[4; SAMPLES]);
        assert_eq!(buffer.occupancy(), 5);
        assert_eq!(buffer.stats().backlog_discarded, 2);
    }

    #[test]
    fn test_step_writes_to_sink() {
        let (buffer, mut playout) = playout(1.0);
        for _ in 0..4 {
            buffer.enqueue(block(42));
        }

        let mut sink = MemorySink::default();
        for _ in 0..3 {
            playout.step(&mut sink).unwrap();
        }

        assert_eq!(sink.blocks.len(), 3);
        assert_eq!(sink.blocks[0], vec![42; SAMPLES]);
        assert_eq!(sink.blocks[1], vec![42; SAMPLES]);
        // Two left, below the low watermark of 3
        assert_eq!(sink.blocks[2], vec![0; SAMPLES]);
        assert_eq!(buffer.occupancy(), 2);
        assert_eq!(playout.cycles(), 3);
    }

    struct ClosingSink {
        remaining: usize,
        written: usize,
    }

    impl OutputSink for ClosingSink {
        fn write_block(&mut self, _block: &[i16]) -> Result<(), AudioError> {
            if self.remaining == 0 {
                return Err(AudioError::OutputClosed);
            }
            self.remaining -= 1;
            self.written += 1;
            if self.written % 2 == 0 {
                Err(AudioError::StreamError("transient".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_run_survives_write_errors_until_closed() {
        let (buffer, mut playout) = playout(1.0);
        for _ in 0..3 {
            buffer.enqueue(block(1));
        }

        let mut sink = ClosingSink {
            remaining: 5,
            written: 0,
        };
        let result = playout.run(&mut sink);

        assert!(matches!(result, Err(AudioError::OutputClosed)));
        assert_eq!(sink.written, 5);
        assert_eq!(playout.cycles(), 6);
    }
}
