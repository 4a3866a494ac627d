//! Error types for the hardware wallet bridge.
//!
//! This module provides a single error type [`enum@Error`] covering every
//! failure the bridge can report, from opening the serial channel to
//! resolving a signature's recovery identifier.
//!
//! # Error Categories
//!
//! - **Transport errors**: channel acquisition, opening, reading and writing
//! - **Framing errors**: oversized payloads and undecodable frames
//! - **Cryptographic errors**: malformed keys or signatures, failed recovery
//!
//! Framing and read-loop errors never leave the [`Session`](crate::Session):
//! they are logged and surface only as a reading-state transition to `false`.
//! Send-path and resolver errors are returned to the caller.
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::Error;
//!
//! let err = Error::PayloadTooLarge { len: 2048, max: 1024 };
//! assert_eq!(
//!     err.to_string(),
//!     "payload of 2048 bytes exceeds the maximum frame length of 1024"
//! );
//! ```

use core::result::Result as CoreResult;
use std::io;

use hex::FromHexError;
use thiserror::Error;

/// The main error type for the bridge.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The host environment offers no way to acquire a serial channel.
    #[error("no serial transport available")]
    TransportUnavailable,

    /// The device refused to open, or configuring the port failed.
    #[error("failed to open port: {0}")]
    PortOpen(String),

    /// There is no open, writable channel to send on.
    #[error("port is not open for writing")]
    NotWritable,

    /// The channel reported a fault while reading.
    #[error("transport read failed: {0}")]
    TransportRead(String),

    /// Writing a frame to the channel failed.
    #[error("failed to write frame: {0}")]
    Write(#[source] io::Error),

    // =========================================================================
    // Framing and Message Errors
    // =========================================================================
    /// The payload does not fit in a single frame.
    #[error("payload of {len} bytes exceeds the maximum frame length of {max}")]
    PayloadTooLarge {
        /// Length of the rejected payload.
        len: usize,
        /// Largest payload a frame may carry.
        max: usize,
    },

    /// A frame payload could not be decoded into a response.
    #[error("failed to decode frame payload: {0}")]
    FrameDecode(String),

    /// A request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// A request was built with invalid parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Cryptographic Errors
    // =========================================================================
    /// The public key is invalid or malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The signature is invalid or malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Neither recovery candidate reproduces the expected signer.
    #[error("no recovery id reproduces the expected signer")]
    RecoveryExhausted,

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Self::HexDecodeFailed(err.to_string())
    }
}

/// A specialized [`Result`] type for bridge operations.
pub type Result<T> = CoreResult<T, Error>;
