//! Inbound audio configuration and PCM helpers

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The only inbound sample rate the server accepts.
pub const SAMPLE_RATE_HZ: u32 = 8_000;

/// Analysis frame length in milliseconds.
pub const FRAME_MS: u32 = 30;

/// Samples per analysis frame (240 at 8 kHz / 30 ms).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE_HZ as usize * FRAME_MS as usize) / 1000;

/// Audio handshake sent by the client as the first control frame.
///
/// The server accepts exactly 16-bit linear PCM, mono, 8 kHz; anything
/// else is a protocol error fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub encoding: String,
    pub channels: u16,
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate != SAMPLE_RATE_HZ || self.encoding != "LINEAR16" || self.channels != 1 {
            return Err(Error::Protocol(format!(
                "unsupported audio config: {} Hz {} x{} (expected {} Hz LINEAR16 x1)",
                self.sample_rate, self.encoding, self.channels, SAMPLE_RATE_HZ
            )));
        }
        Ok(())
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_HZ,
            encoding: "LINEAR16".to_string(),
            channels: 1,
        }
    }
}

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte is dropped.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Encode samples as little-endian 16-bit PCM bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Mean absolute amplitude of a frame, used as the speech energy measure.
pub fn frame_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: i64 = samples.iter().map(|&s| (s as i64).abs()).sum();
    sum as f32 / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_linear16_8khz_mono() {
        assert!(AudioConfig::default().validate().is_ok());

        let bad_rate = AudioConfig {
            sample_rate: 16_000,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let bad_encoding = AudioConfig {
            encoding: "OPUS".to_string(),
            ..Default::default()
        };
        assert!(bad_encoding.validate().is_err());

        let bad_channels = AudioConfig {
            channels: 2,
            ..Default::default()
        };
        assert!(bad_channels.validate().is_err());
    }

    #[test]
    fn pcm_round_trip() {
        let samples = vec![0i16, -1, 32767, -32768, 123];
        let bytes = pcm16_to_bytes(&samples);
        assert_eq!(pcm16_from_bytes(&bytes), samples);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let bytes = [0x01, 0x02, 0x03];
        assert_eq!(pcm16_from_bytes(&bytes).len(), 1);
    }

    #[test]
    fn frame_energy_of_silence_is_zero() {
        assert_eq!(frame_energy(&[0i16; FRAME_SAMPLES]), 0.0);
        assert!(frame_energy(&[1000i16; FRAME_SAMPLES]) > 999.0);
    }
}
