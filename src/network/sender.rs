//! Audio datagram sender
//!
//! Frames fixed-size sample blocks into sequenced (or legacy) datagrams and
//! sends them to the receiver. Sequence numbers start at 0 and wrap at
//! `u32::MAX`.

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::RECEIVE_ERROR_BACKOFF_MS;
use crate::error::NetworkError;
use crate::network::udp::connect_socket;
use crate::protocol::{encode_legacy, encode_sequenced, samples_to_payload, AudioFormat};

/// Sender counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

/// Connected sending socket with its sequence counter
pub struct AudioSender {
    socket: UdpSocket,
    target: SocketAddr,
    next_sequence: AtomicU32,
    legacy: bool,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl AudioSender {
    /// Connect to `target`. With `legacy` set, datagrams carry no sequence
    /// header.
    pub fn connect(target: SocketAddr, legacy: bool) -> Result<Self, NetworkError> {
        let socket = connect_socket(target)?;
        tracing::info!(
            "Sending {} audio to {}",
            if legacy { "legacy" } else { "sequenced" },
            target
        );

        Ok(Self {
            socket,
            target,
            next_sequence: AtomicU32::new(0),
            legacy,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        })
    }

    /// Send one block of interleaved samples
    pub fn send_block(&self, samples: &[i16]) -> Result<(), NetworkError> {
        self.send_payload(&samples_to_payload(samples))
    }

    /// Frame and send one payload
    pub fn send_payload(&self, payload: &[u8]) -> Result<(), NetworkError> {
        let datagram: Bytes = if self.legacy {
            encode_legacy(payload)
        } else {
            // fetch_add wraps on overflow
            encode_sequenced(self.next_sequence.fetch_add(1, Ordering::Relaxed), payload)
        };

        match self.socket.send(&datagram) {
            Ok(n) => {
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    /// Sequence number the next datagram will carry
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Send captured blocks until `running` is cleared or the capture side
/// hangs up. A failed send is logged and followed by a short backoff.
pub fn run_capture_loop(blocks: &Receiver<Vec<i16>>, sender: &AudioSender, running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        let block = match blocks.recv_timeout(Duration::from_millis(100)) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Err(e) = sender.send_block(&block) {
            tracing::warn!("Error sending UDP packet: {}", e);
            thread::sleep(Duration::from_millis(RECEIVE_ERROR_BACKOFF_MS));
        }
    }

    tracing::debug!("Capture send loop stopped");
}

/// Stream raw interleaved s16le PCM from `reader` in payload-sized chunks,
/// zero-padding the final chunk. With `paced` set, chunks go out at the
/// block cadence of `format`.
///
/// Returns the number of datagrams sent.
pub fn stream_pcm<R: Read>(
    mut reader: R,
    sender: &AudioSender,
    format: &AudioFormat,
    paced: bool,
) -> crate::Result<u64> {
    let mut chunk = vec![0u8; format.payload_size()];
    let period = format.block_duration();
    let started = Instant::now();
    let mut sent = 0u64;

    loop {
        let n = read_chunk(&mut reader, &mut chunk)?;
        if n == 0 {
            break;
        }
        chunk[n..].fill(0);

        if paced {
            let due = started + pacing_offset(period, sent);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }

        sender.send_payload(&chunk)?;
        sent += 1;
        tracing::trace!("Sent chunk {} ({} bytes of audio)", sent, n);

        if n < chunk.len() {
            break;
        }
    }

    tracing::info!("Finished sending audio: {} datagrams", sent);
    Ok(sent)
}

/// Time from stream start until chunk number `sent` is due
fn pacing_offset(period: Duration, sent: u64) -> Duration {
    period.mul_f64(sent as f64)
}

/// Fill `buf` from `reader`, stopping early only at end of input
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
