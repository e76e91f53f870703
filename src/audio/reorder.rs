//! Packet reordering
//!
//! Sequenced datagrams can arrive out of order or more than once. The
//! reorder buffer parks them by sequence number and releases them strictly
//! in ascending order starting from the next expected sequence.
//!
//! A missing packet is never skipped: everything behind a gap stays parked
//! until the gap is filled. The configured horizon does not change that, it
//! only reports when the parked backlog has grown past it.

use bytes::Bytes;
use std::collections::HashMap;

/// Default number of packets to hold while waiting for a gap to fill
pub const DEFAULT_REORDER_HORIZON: usize = 50;

/// Resequences out-of-order packets
#[derive(Debug)]
pub struct ReorderBuffer {
    /// Parked payloads keyed by sequence number
    pending: HashMap<u32, Bytes>,
    /// Next sequence number to release
    next_expected: u32,
    /// Backlog size considered a stall
    horizon: usize,
}

impl ReorderBuffer {
    /// Create a reorder buffer expecting sequence 0 first
    pub fn new(horizon: usize) -> Self {
        Self::starting_at(0, horizon)
    }

    /// Create a reorder buffer expecting `next_expected` first
    pub fn starting_at(next_expected: u32, horizon: usize) -> Self {
        Self {
            pending: HashMap::new(),
            next_expected,
            horizon,
        }
    }

    /// Park a packet. A duplicate replaces the earlier copy.
    pub fn add_packet(&mut self, sequence: u32, payload: Bytes) {
        self.pending.insert(sequence, payload);
    }

    /// Release the packet at the next expected sequence, if parked
    pub fn next_packet(&mut self) -> Option<Bytes> {
        let payload = self.pending.remove(&self.next_expected)?;
        self.next_expected = self.next_expected.wrapping_add(1);
        Some(payload)
    }

    /// Release every packet that is now in sequence, stopping at the first gap
    pub fn drain_ready(&mut self) -> DrainReady<'_> {
        DrainReady { buffer: self }
    }

    /// Drop parked packets that arrived after their slot was already passed.
    ///
    /// Returns the number of packets removed.
    pub fn cleanup_stale(&mut self) -> usize {
        let next = self.next_expected;
        let before = self.pending.len();
        self.pending.retain(|&seq, _| seq >= next);
        before - self.pending.len()
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Number of parked packets
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.pending.contains_key(&sequence)
    }

    /// True when more packets are parked than the horizon allows, which
    /// means the next expected packet is most likely lost for good
    pub fn is_stalled(&self) -> bool {
        self.pending.len() > self.horizon
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_HORIZON)
    }
}

/// Iterator returned by [`ReorderBuffer::drain_ready`]
pub struct DrainReady<'a> {
    buffer: &'a mut ReorderBuffer,
}

impl Iterator for DrainReady<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.buffer.next_packet()
    }
}
