//! Network ingestion
//!
//! A dedicated thread blocks on the audio socket and drives every datagram
//! through the framer, the reorder buffer, and into the jitter buffer.
//! Nothing that arrives on the wire can stop it: malformed datagrams and
//! socket errors are logged, counted, and skipped.

use bytes::Bytes;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedJitterBuffer;
use crate::audio::reorder::ReorderBuffer;
use crate::config::NetworkConfig;
use crate::constants::{MAX_DATAGRAM_SIZE, RECEIVE_ERROR_BACKOFF_MS};
use crate::error::NetworkError;
use crate::network::udp::{create_socket, SocketOptions};
use crate::protocol::{parse_datagram, Datagram};

/// Live ingestion counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    legacy_packets: AtomicU64,
    stale_purged: AtomicU64,
    receive_errors: AtomicU64,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            legacy_packets: self.legacy_packets.load(Ordering::Relaxed),
            stale_purged: self.stale_purged.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStatsSnapshot {
    /// Datagrams read from the socket
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Datagrams of unexpected length
    pub invalid_packets: u64,
    /// Headerless datagrams
    pub legacy_packets: u64,
    /// Late packets purged from the reorder buffer
    pub stale_purged: u64,
    /// Failed socket reads
    pub receive_errors: u64,
}

/// Framer → reorder buffer → jitter buffer, one datagram at a time
pub struct Ingest {
    reorder: ReorderBuffer,
    jitter: SharedJitterBuffer,
    payload_size: usize,
    stats: Arc<ReceiverStats>,
    stalled: bool,
}

impl Ingest {
    pub fn new(jitter: SharedJitterBuffer, reorder_horizon: usize) -> Self {
        Self::with_stats(jitter, reorder_horizon, Arc::new(ReceiverStats::default()))
    }

    fn with_stats(
        jitter: SharedJitterBuffer,
        reorder_horizon: usize,
        stats: Arc<ReceiverStats>,
    ) -> Self {
        Self {
            reorder: ReorderBuffer::new(reorder_horizon),
            payload_size: jitter.payload_size(),
            jitter,
            stats,
            stalled: false,
        }
    }

    /// Process one datagram. Returns how many packets were handed to the
    /// jitter buffer as a result.
    pub fn handle_datagram(&mut self, data: Bytes) -> Result<usize, NetworkError> {
        self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let datagram = match parse_datagram(data, self.payload_size) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Discarding datagram: {}", e);
                return Err(e);
            }
        };

        match datagram {
            Datagram::Sequenced { sequence, payload } => {
                self.reorder.add_packet(sequence, payload);

                let mut released = 0;
                for payload in self.reorder.drain_ready() {
                    self.jitter.enqueue(payload);
                    released += 1;
                }

                let purged = self.reorder.cleanup_stale();
                if purged > 0 {
                    self.stats
                        .stale_purged
                        .fetch_add(purged as u64, Ordering::Relaxed);
                    tracing::trace!("Purged {} late packet(s)", purged);
                }

                self.check_stall();
                Ok(released)
            }
            Datagram::Legacy(payload) => {
                self.stats.legacy_packets.fetch_add(1, Ordering::Relaxed);
                self.jitter.enqueue(payload);
                Ok(1)
            }
        }
    }

    fn check_stall(&mut self) {
        let stalled = self.reorder.is_stalled();
        if stalled && !self.stalled {
            tracing::warn!(
                "Reorder buffer stalled waiting for sequence {} ({} packets parked)",
                self.reorder.next_expected(),
                self.reorder.pending_len()
            );
        } else if !stalled && self.stalled {
            tracing::info!(
                "Reorder buffer recovered at sequence {}",
                self.reorder.next_expected()
            );
        }
        self.stalled = stalled;
    }

    pub fn reorder(&self) -> &ReorderBuffer {
        &self.reorder
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Owns the ingestion thread and its socket
pub struct AudioReceiver {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    stats: Arc<ReceiverStats>,
}

impl AudioReceiver {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            local_addr: None,
            stats: Arc::new(ReceiverStats::default()),
        }
    }

    /// Bind the audio socket and start ingesting into `jitter`.
    ///
    /// Returns the bound address. A bind failure is returned, never retried.
    pub fn start(
        &mut self,
        config: &NetworkConfig,
        jitter: SharedJitterBuffer,
        reorder_horizon: usize,
    ) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }

        let bind_addr = crate::network::udp::resolve(&config.listen_addr())?;
        let socket = create_socket(
            bind_addr,
            SocketOptions {
                recv_buffer_size: Some(config.recv_buffer_size),
                read_timeout: Some(config.read_timeout()),
            },
        )?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let ingest = Ingest::with_stats(jitter, reorder_horizon, self.stats.clone());
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-receiver".to_string())
            .spawn(move || receive_loop(socket, ingest, running))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        tracing::info!("Listening for audio on UDP {}", local_addr);
        self.thread_handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop the ingestion thread and close the socket
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Live counters, for reporting from another thread
    pub fn shared_stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }
}

impl Default for AudioReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: UdpSocket, mut ingest: Ingest, running: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, _src)) => {
                // Malformed datagrams are already logged and counted
                let _ = ingest.handle_datagram(Bytes::copy_from_slice(&buf[..n]));
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                ingest.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Error reading UDP packet: {}", e);
                thread::sleep(Duration::from_millis(RECEIVE_ERROR_BACKOFF_MS));
            }
        }
    }

    tracing::debug!("Receive loop stopped");
}
