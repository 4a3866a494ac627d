//! Serial port and framing profile.
//!
//! The port profile and the framing constants are fixed by the device
//! firmware; they are exposed as typed values so callers can inspect or print
//! them, not negotiate them. Only the session's local behaviour
//! ([`SessionConfig`]) is tunable.
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::config::{PortSettings, SerialConfig};
//!
//! let config = SerialConfig::default();
//! assert_eq!(config.port, PortSettings::FIXED);
//! assert_eq!(config.port.baud_rate, 115_200);
//! assert_eq!(config.protocol.max_length, 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frame::{HEADER_LENGTH, LENGTH_BYTES, MAGIC, MAX_LENGTH};

/// Default size of a single read from the channel.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Default pause after a transport read error, before the session tears down.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataBits {
    /// Seven data bits.
    Seven,
    /// Eight data bits.
    Eight,
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Line settings used when opening the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSettings {
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Parity mode.
    pub parity: Parity,
}

impl PortSettings {
    /// The profile spoken by the device firmware: 115200 8N1.
    pub const FIXED: Self = Self {
        baud_rate: 115_200,
        data_bits: DataBits::Eight,
        stop_bits: StopBits::One,
        parity: Parity::None,
    };
}

impl Default for PortSettings {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Framing constants shared with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Frame start marker.
    pub magic: [u8; 3],
    /// Bytes before the payload: magic plus length.
    pub header_length: usize,
    /// Width of the big-endian length field.
    pub length_bytes: usize,
    /// Largest payload a frame may carry.
    pub max_length: usize,
}

impl ProtocolSettings {
    /// The framing understood by the device firmware.
    pub const FIXED: Self = Self {
        magic: MAGIC,
        header_length: HEADER_LENGTH,
        length_bytes: LENGTH_BYTES,
        max_length: MAX_LENGTH,
    };
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self::FIXED
    }
}

/// Complete serial profile: line settings plus framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Line settings.
    pub port: PortSettings,
    /// Framing constants.
    pub protocol: ProtocolSettings,
}

/// Local tuning of a [`Session`](crate::Session).
///
/// None of these values travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Size of the buffer handed to each read call.
    pub read_chunk_size: usize,
    /// Pause after a transport read error before the session tears down.
    ///
    /// The session never reconnects on its own once this elapses.
    pub error_backoff: Duration,
}

impl SessionConfig {
    /// Sets the pause applied after a transport read error.
    #[must_use]
    pub const fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the read buffer size. Zero is bumped to one byte.
    #[must_use]
    pub const fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = if size == 0 { 1 } else { size };
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_port_profile() {
        let port = PortSettings::default();
        assert_eq!(port.baud_rate, 115_200);
        assert_eq!(port.data_bits, DataBits::Eight);
        assert_eq!(port.stop_bits, StopBits::One);
        assert_eq!(port.parity, Parity::None);
    }

    #[test]
    fn protocol_matches_frame_constants() {
        let protocol = ProtocolSettings::default();
        assert_eq!(protocol.magic, [0xE2, 0x82, 0xBF]);
        assert_eq!(protocol.header_length, protocol.magic.len() + protocol.length_bytes);
        assert_eq!(protocol.max_length, 1024);
    }

    #[test]
    fn serial_config_serializes_to_json() {
        let json = serde_json::to_value(SerialConfig::default()).unwrap();
        assert_eq!(json["port"]["baud_rate"], 115_200);
        assert_eq!(json["port"]["parity"], "none");
        assert_eq!(json["protocol"]["max_length"], 1024);
    }

    #[test]
    fn session_config_builders() {
        let config = SessionConfig::default()
            .with_error_backoff(Duration::from_millis(5))
            .with_read_chunk_size(0);

        assert_eq!(config.error_backoff, Duration::from_millis(5));
        assert_eq!(config.read_chunk_size, 1);
        assert_eq!(SessionConfig::default().error_backoff, DEFAULT_ERROR_BACKOFF);
    }
}
