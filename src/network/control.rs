//! Volume control channel
//!
//! The receiver pushes client volume updates as single 8-byte datagrams.
//! There is no acknowledgement or retry: the sender adopts the last valid
//! value it receives and ignores anything malformed.

use std::io::{self, BufRead, ErrorKind, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::audio::volume::{SharedVolume, Volume};
use crate::error::NetworkError;
use crate::network::udp::{connect_socket, create_socket, SocketOptions};
use crate::protocol::{ControlMessage, CONTROL_MESSAGE_LEN};

/// How often the listener wakes to check its stop flag
const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Rejected operator input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VolumeInputError {
    #[error("Invalid input. Please enter a number between 0.0 and 1.0.")]
    Unparsable,

    #[error("Volume must be between 0.0 and 1.0.")]
    OutOfRange,
}

/// Parse one line of operator input into a volume
pub fn parse_volume_input(line: &str) -> Result<Volume, VolumeInputError> {
    let value: f64 = line
        .trim()
        .parse()
        .map_err(|_| VolumeInputError::Unparsable)?;
    Volume::new(value).map_err(|_| VolumeInputError::OutOfRange)
}

/// Sends volume control datagrams to a remote peer
pub struct ControlEmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl ControlEmitter {
    pub fn connect(target: SocketAddr) -> Result<Self, NetworkError> {
        let socket = connect_socket(target)?;
        Ok(Self { socket, target })
    }

    /// Send one control datagram. Fire-and-forget.
    pub fn send_volume(&self, volume: Volume) -> Result<(), NetworkError> {
        let message = ControlMessage::new(volume.get()).encode();
        self.socket
            .send(&message)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        tracing::debug!("Sent control volume {:.2} to {}", volume.get(), self.target);
        Ok(())
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

/// Operator console: read a volume per line and push it to the peer.
///
/// Invalid lines get a message on `output` and the loop continues. Returns
/// when `input` reaches end of file.
pub fn run_console<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    emitter: &ControlEmitter,
) -> io::Result<()> {
    writeln!(output, "Ready to send client volume control to {}", emitter.target())?;
    writeln!(output, "Enter new client volume (0.0-1.0) and press Enter:")?;

    let mut line = String::new();
    loop {
        write!(output, "> ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }

        match parse_volume_input(&line) {
            Ok(volume) => match emitter.send_volume(volume) {
                Ok(()) => writeln!(output, "Sent client volume: {:.2}", volume.get())?,
                Err(e) => tracing::error!("Error sending client volume control: {}", e),
            },
            Err(e) => writeln!(output, "{}", e)?,
        }
    }
}

/// Apply one control datagram to `volume`. On error the previous value is
/// left in place.
pub fn apply_control_datagram(data: &[u8], volume: &SharedVolume) -> Result<Volume, NetworkError> {
    let message = ControlMessage::decode(data)?;
    let new_volume = Volume::new(message.volume)
        .map_err(|e| NetworkError::InvalidControl(e.to_string()))?;
    volume.store(new_volume);
    Ok(new_volume)
}

/// Listens for control datagrams and updates a [`SharedVolume`]
pub struct ControlListener {
    volume: SharedVolume,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ControlListener {
    pub fn new(volume: SharedVolume) -> Self {
        Self {
            volume,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            local_addr: None,
        }
    }

    /// Bind `bind_addr` and start applying control datagrams
    pub fn start(&mut self, bind_addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        if let Some(addr) = self.local_addr.filter(|_| self.is_running()) {
            return Ok(addr);
        }

        let socket = create_socket(
            bind_addr,
            SocketOptions {
                recv_buffer_size: None,
                read_timeout: Some(LISTENER_POLL_INTERVAL),
            },
        )?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let volume = self.volume.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("control-listener".to_string())
            .spawn(move || listen_loop(socket, volume, running))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        tracing::info!("Listening for volume control on UDP {}", local_addr);
        self.thread_handle = Some(handle);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

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

    pub fn volume(&self) -> Volume {
        self.volume.load()
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen_loop(socket: UdpSocket, volume: SharedVolume, running: Arc<AtomicBool>) {
    // One byte extra so oversized datagrams are seen as such
    let mut buf = [0u8; CONTROL_MESSAGE_LEN + 1];

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, src)) => match apply_control_datagram(&buf[..n], &volume) {
                Ok(v) => tracing::info!("Volume set to {:.2} by {}", v.get(), src),
                Err(e) => tracing::warn!("Ignoring control datagram from {}: {}", src, e),
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::warn!("Error reading control packet: {}", e);
                thread::sleep(Duration::from_millis(crate::constants::RECEIVE_ERROR_BACKOFF_MS));
            }
        }
    }
}
