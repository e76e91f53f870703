//! # LAN PCM Streamer
//!
//! Low-latency uncompressed PCM streaming over LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SENDER PC                               │
//! │  ┌──────────────┐    ┌──────────────┐    ┌────────────────────────┐  │
//! │  │ Input device │───▶│ AudioCapture │───▶│ AudioSender            │  │
//! │  │ (Stereo Mix) │    │ i16 blocks   │    │ [Seq u32 LE|PCM block] │  │
//! │  └──────────────┘    └──────▲───────┘    └───────────┬────────────┘  │
//! │                             │ volume                 │               │
//! │                    ┌────────┴────────┐               │               │
//! │                    │ ControlListener │◀─ ─ ─ ─ ─ ┐   │               │
//! │                    └─────────────────┘           │   │               │
//! └──────────────────────────────────────────────────┼───┼───────────────┘
//!                                  control [f64 LE]  │   │ UDP over LAN
//! ┌──────────────────────────────────────────────────┼───┼───────────────┐
//! │                             RECEIVER PC          │   ▼               │
//! │  ┌────────────────┐                     ┌────────┴─────────────────┐ │
//! │  │ ControlEmitter │◀── operator console │ AudioReceiver (thread)   │ │
//! │  └────────────────┘                     │  parse_datagram          │ │
//! │                                         │    │ sequenced   │ legacy │ │
//! │                                         │    ▼             │        │ │
//! │                                         │  ReorderBuffer   │        │ │
//! │                                         │    │ in order    │        │ │
//! │                                         └────┼─────────────┼────────┘ │
//! │                                              ▼             ▼          │
//! │                                    ┌──────────────────────────────┐   │
//! │                                    │ JitterBuffer (ArrayQueue)    │   │
//! │                                    │ watermarks, lifetime stats   │   │
//! │                                    └──────────────┬───────────────┘   │
//! │                                                   ▼                   │
//! │                                    ┌──────────────────────────────┐   │
//! │                                    │ PlayoutLoop                  │   │
//! │                                    │ silence / dequeue / shed     │   │
//! │                                    │ volume scaling               │   │
//! │                                    └──────────────┬───────────────┘   │
//! │                                                   ▼                   │
//! │                                    ┌──────────────────────────────┐   │
//! │                                    │ cpal output stream           │   │
//! │                                    └──────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frames per datagram (~10.7ms at 48kHz)
    pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 512;

    /// Default UDP port for audio streaming
    pub const DEFAULT_AUDIO_PORT: u16 = 8080;

    /// Default UDP port for volume control on the sender
    pub const DEFAULT_CONTROL_PORT: u16 = 8081;

    /// Default kernel receive buffer for the audio socket
    pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1 << 20;

    /// Largest UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65507;

    /// Blocks queued between playout and the output device callback
    pub const OUTPUT_QUEUE_BLOCKS: usize = 2;

    /// Pause after a failed socket read
    pub const RECEIVE_ERROR_BACKOFF_MS: u64 = 10;
}
