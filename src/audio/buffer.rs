//! Watermark-driven jitter buffer
//!
//! A bounded FIFO of fixed-size PCM payloads sitting between network
//! ingestion and playout. The buffer never blocks either side: a full buffer
//! drops the incoming packet, an empty one reports an underflow. Playout
//! consults the watermarks every cycle:
//!
//! ```text
//!  0        min      low          target        high             capacity
//!  |--------|--------|-------------|-------------|------------------|
//!  prebuffer ^       ^ below: play silence        ^ above: discard one
//!  completes here      instead of dequeuing         extra packet per cycle
//! ```
//!
//! Occupancy is always the queue's own length; there is no separate counter
//! to drift out of step with it.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ConfigError;

/// Occupancy thresholds, in packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterThresholds {
    /// Packets required before playback starts
    pub prebuffer_min: usize,
    /// Below this, playout inserts silence
    pub low_watermark: usize,
    /// Level backlog shedding aims for
    pub target: usize,
    /// Above this, playout discards one extra packet per cycle
    pub high_watermark: usize,
    /// Hard bound on queued packets
    pub capacity: usize,
}

impl JitterThresholds {
    /// Check the ordering `min <= capacity` and `low <= target <= high <= capacity`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidThresholds(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.prebuffer_min == 0 || self.prebuffer_min > self.capacity {
            return Err(ConfigError::InvalidThresholds(format!(
                "prebuffer minimum {} must be within 1..={}",
                self.prebuffer_min, self.capacity
            )));
        }
        if !(self.low_watermark <= self.target
            && self.target <= self.high_watermark
            && self.high_watermark <= self.capacity)
        {
            return Err(ConfigError::InvalidThresholds(format!(
                "expected low <= target <= high <= capacity, got {} / {} / {} / {}",
                self.low_watermark, self.target, self.high_watermark, self.capacity
            )));
        }
        Ok(())
    }
}

impl Default for JitterThresholds {
    fn default() -> Self {
        Self {
            prebuffer_min: 5,
            low_watermark: 10,
            target: 20,
            high_watermark: 30,
            capacity: 200,
        }
    }
}

/// Lifetime counters, never reset
#[derive(Debug, Default)]
struct BufferCounters {
    underflows: AtomicU64,
    overflows: AtomicU64,
    silence_inserted: AtomicU64,
    total_received: AtomicU64,
    backlog_discarded: AtomicU64,
}

/// Snapshot of the jitter buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Dequeue attempts that found the buffer empty
    pub underflows: u64,
    /// Packets dropped because the buffer was full
    pub overflows: u64,
    /// Silence blocks synthesized
    pub silence_inserted: u64,
    /// Packets admitted
    pub total_received: u64,
    /// Packets consumed by backlog shedding
    pub backlog_discarded: u64,
}

impl BufferStats {
    /// True when any anomaly counter is non-zero
    pub fn has_anomalies(&self) -> bool {
        self.underflows > 0 || self.overflows > 0 || self.silence_inserted > 0
    }
}

/// Bounded jitter buffer, safe for one producer and one consumer
pub struct JitterBuffer {
    queue: ArrayQueue<Bytes>,
    thresholds: JitterThresholds,
    payload_size: usize,
    /// Zero-filled block handed out on silence insertion
    silence: Bytes,
    counters: BufferCounters,
    /// Set once occupancy first reaches the prebuffer minimum
    primed: AtomicBool,
    prebuffer_lock: Mutex<()>,
    prebuffer_ready: Condvar,
}

impl JitterBuffer {
    /// Create a jitter buffer for payloads of `payload_size` bytes
    pub fn new(thresholds: JitterThresholds, payload_size: usize) -> Result<Self, ConfigError> {
        thresholds.validate()?;

        Ok(Self {
            queue: ArrayQueue::new(thresholds.capacity),
            thresholds,
            payload_size,
            silence: Bytes::from(vec![0u8; payload_size]),
            counters: BufferCounters::default(),
            primed: AtomicBool::new(false),
            prebuffer_lock: Mutex::new(()),
            prebuffer_ready: Condvar::new(),
        })
    }

    /// Insert a packet without blocking.
    ///
    /// Returns false if the buffer was full; the new packet is dropped.
    pub fn enqueue(&self, payload: Bytes) -> bool {
        match self.queue.push(payload) {
            Ok(()) => {
                self.counters.total_received.fetch_add(1, Ordering::Relaxed);
                self.notify_if_primed();
                true
            }
            Err(_) => {
                self.counters.overflows.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Jitter buffer overflow - dropping packet");
                false
            }
        }
    }

    /// Remove the oldest packet without blocking.
    ///
    /// An empty buffer counts as an underflow.
    pub fn dequeue(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(payload) => Some(payload),
            None => {
                self.counters.underflows.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Consume one packet to shrink the backlog. Not counted as an underflow.
    pub fn discard_one(&self) -> bool {
        if self.queue.pop().is_some() {
            self.counters.backlog_discarded.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Current number of queued packets
    pub fn occupancy(&self) -> usize {
        self.queue.len()
    }

    /// True when occupancy is below the low watermark
    pub fn should_insert_silence(&self) -> bool {
        self.occupancy() < self.thresholds.low_watermark
    }

    /// True when occupancy is above the high watermark
    pub fn is_overfull(&self) -> bool {
        self.occupancy() > self.thresholds.high_watermark
    }

    /// A zero-filled block of exactly `payload_size` bytes
    pub fn insert_silence_packet(&self) -> Bytes {
        self.counters.silence_inserted.fetch_add(1, Ordering::Relaxed);
        self.silence.clone()
    }

    /// Block until occupancy reaches the prebuffer minimum
    pub fn wait_for_prebuffer(&self) {
        let mut guard = self.prebuffer_lock.lock();
        while !self.is_primed() {
            self.prebuffer_ready.wait(&mut guard);
        }
    }

    /// Like [`wait_for_prebuffer`](Self::wait_for_prebuffer) but gives up
    /// after `timeout`. Returns whether the prebuffer minimum was reached.
    pub fn wait_for_prebuffer_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.prebuffer_lock.lock();
        while !self.is_primed() {
            if self
                .prebuffer_ready
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_primed();
            }
        }
        true
    }

    /// Whether occupancy has ever reached the prebuffer minimum
    pub fn is_primed(&self) -> bool {
        self.primed.load(Ordering::Acquire)
    }

    fn notify_if_primed(&self) {
        if self.is_primed() || self.queue.len() < self.thresholds.prebuffer_min {
            return;
        }
        let _guard = self.prebuffer_lock.lock();
        self.primed.store(true, Ordering::Release);
        self.prebuffer_ready.notify_all();
    }

    pub fn thresholds(&self) -> &JitterThresholds {
        &self.thresholds
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Snapshot the lifetime counters
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            underflows: self.counters.underflows.load(Ordering::Relaxed),
            overflows: self.counters.overflows.load(Ordering::Relaxed),
            silence_inserted: self.counters.silence_inserted.load(Ordering::Relaxed),
            total_received: self.counters.total_received.load(Ordering::Relaxed),
            backlog_discarded: self.counters.backlog_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;

/// Create a new shared jitter buffer
pub fn create_shared_buffer(
    thresholds: JitterThresholds,
    payload_size: usize,
) -> Result<SharedJitterBuffer, ConfigError> {
    Ok(Arc::new(JitterBuffer::new(thresholds, payload_size)?))
}
