//! Wire protocol
//!
//! Three datagram shapes travel between sender and receiver. Audio datagrams
//! are told apart purely by their length:
//!
//! ```text
//! Sequenced audio   [seq: u32 LE][payload: payload_size bytes]
//! Legacy audio      [payload: payload_size bytes]
//! Control           [volume: f64 LE]
//! ```
//!
//! The payload is interleaved little-endian i16 PCM. Sample rate, channel
//! count and block size are agreed out of band, so nothing about the format
//! is negotiated on the wire.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::NetworkError;

/// Length of the sequence header on sequenced audio datagrams
pub const SEQUENCE_HEADER_LEN: usize = 4;

/// Length of a control datagram
pub const CONTROL_MESSAGE_LEN: usize = 8;

/// Bytes per PCM sample (signed 16-bit)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Session-wide PCM format shared by both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames carried by one datagram
    pub frames_per_buffer: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, frames_per_buffer: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frames_per_buffer,
        }
    }

    /// Number of i16 samples in one block (all channels)
    pub fn samples_per_block(&self) -> usize {
        self.frames_per_buffer as usize * self.channels as usize
    }

    /// Payload bytes in one audio datagram
    pub fn payload_size(&self) -> usize {
        self.samples_per_block() * BYTES_PER_SAMPLE
    }

    /// Wall-clock duration of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_buffer as f64 / self.sample_rate as f64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            frames_per_buffer: crate::constants::DEFAULT_FRAMES_PER_BUFFER,
        }
    }
}

/// A parsed audio datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Carries a sequence number and goes through reordering
    Sequenced { sequence: u32, payload: Bytes },
    /// Headerless payload, delivered straight to the jitter buffer
    Legacy(Bytes),
}

impl Datagram {
    pub fn payload(&self) -> &Bytes {
        match self {
            Datagram::Sequenced { payload, .. } => payload,
            Datagram::Legacy(payload) => payload,
        }
    }
}

/// Classify a raw datagram by its length.
///
/// The payload is split off the input without copying.
pub fn parse_datagram(data: Bytes, payload_size: usize) -> Result<Datagram, NetworkError> {
    let len = data.len();
    if len == payload_size + SEQUENCE_HEADER_LEN {
        let sequence = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Ok(Datagram::Sequenced {
            sequence,
            payload: data.slice(SEQUENCE_HEADER_LEN..),
        })
    } else if len == payload_size {
        Ok(Datagram::Legacy(data))
    } else {
        Err(NetworkError::UnexpectedSize {
            got: len,
            payload_size,
        })
    }
}

/// Build a sequenced audio datagram
pub fn encode_sequenced(sequence: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SEQUENCE_HEADER_LEN + payload.len());
    buf.put_u32_le(sequence);
    buf.put_slice(payload);
    buf.freeze()
}

/// Build a legacy (headerless) audio datagram
pub fn encode_legacy(payload: &[u8]) -> Bytes {
    Bytes::copy_from_slice(payload)
}

/// Serialize interleaved samples to little-endian payload bytes
pub fn samples_to_payload(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Volume control message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlMessage {
    pub volume: f64,
}

impl ControlMessage {
    pub fn new(volume: f64) -> Self {
        Self { volume }
    }

    /// Encode as 8 little-endian bytes of an IEEE-754 double
    pub fn encode(&self) -> [u8; CONTROL_MESSAGE_LEN] {
        self.volume.to_le_bytes()
    }

    /// Decode a control datagram. Wrong length or a value outside
    /// `[0.0, 1.0]` is rejected.
    pub fn decode(data: &[u8]) -> Result<Self, NetworkError> {
        let bytes: [u8; CONTROL_MESSAGE_LEN] = data.try_into().map_err(|_| {
            NetworkError::InvalidControl(format!(
                "unexpected size: {} bytes (expected {})",
                data.len(),
                CONTROL_MESSAGE_LEN
            ))
        })?;

        let volume = f64::from_le_bytes(bytes);
        if !(0.0..=1.0).contains(&volume) {
            return Err(NetworkError::InvalidControl(format!(
                "volume out of range: {:.2}",
                volume
            )));
        }

        Ok(Self { volume })
    }
}

/// Audio device description used for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: usize = 2048;

    #[test]
    fn test_default_payload_size() {
        let format = AudioFormat::default();
        assert_eq!(format.payload_size(), 2048);
        assert_eq!(format.samples_per_block(), 1024);
    }

    #[test]
    fn test_block_duration() {
        let format = AudioFormat::default();
        let ms = format.block_duration().as_secs_f64() * 1000.0;
        assert!((ms - 10.666).abs() < 0.01);
    }

    #[test]
    fn test_parse_sequenced() {
        let datagram = encode_sequenced(0xDEAD_BEEF, &[7u8; PAYLOAD]);
        assert_eq!(datagram.len(), PAYLOAD + 4);
        assert_eq!(&datagram[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);

        match parse_datagram(datagram, PAYLOAD).unwrap() {
            Datagram::Sequenced { sequence, payload } => {
                assert_eq!(sequence, 0xDEAD_BEEF);
                assert_eq!(payload.len(), PAYLOAD);
                assert!(payload.iter().all(|&b| b == 7));
            }
            other => panic!("expected sequenced datagram, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_legacy() {
        let datagram = encode_legacy(&[1u8; PAYLOAD]);
        let parsed = parse_datagram(datagram, PAYLOAD).unwrap();
        assert!(matches!(parsed, Datagram::Legacy(ref p) if p.len() == PAYLOAD));
    }

    #[test]
    fn test_parse_malformed() {
        for len in [0, 1, 4, PAYLOAD - 1, PAYLOAD + 1, PAYLOAD + 3, PAYLOAD + 5] {
            let err = parse_datagram(Bytes::from(vec![0u8; len]), PAYLOAD).unwrap_err();
            match err {
                NetworkError::UnexpectedSize { got, payload_size } => {
                    assert_eq!(got, len);
                    assert_eq!(payload_size, PAYLOAD);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
    }

    #[test]
    fn test_samples_to_payload_little_endian() {
        let payload = samples_to_payload(&[1, -1, 0x1234]);
        assert_eq!(&payload[..], &[0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_control_message_encoding() {
        let encoded = ControlMessage::new(0.75).encode();
        assert_eq!(encoded.len(), 8);
        assert_eq!(encoded, 0.75f64.to_le_bytes());

        let decoded = ControlMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.volume, 0.75);
    }

    #[test]
    fn test_control_message_rejects_bad_input() {
        assert!(ControlMessage::decode(&[0u8; 7]).is_err());
        assert!(ControlMessage::decode(&[0u8; 9]).is_err());
        assert!(ControlMessage::decode(&1.5f64.to_le_bytes()).is_err());
        assert!(ControlMessage::decode(&(-0.1f64).to_le_bytes()).is_err());
        assert!(ControlMessage::decode(&f64::NAN.to_le_bytes()).is_err());
    }
}
