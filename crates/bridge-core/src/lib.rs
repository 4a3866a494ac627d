//! Hardware Wallet Bridge Core Library
//!
//! This crate connects a host to a USB-serial hardware wallet: it opens the
//! serial channel, frames and unframes messages on the byte stream, and turns
//! the device's 64-byte signatures into Ethereum-ready 65-byte ones.
//!
//! # Overview
//!
//! The device speaks a minimal framing protocol at 115200 8N1. Each message
//! is preceded by the three-byte marker `E2 82 BF` and a big-endian `u16`
//! length; there is no checksum and no request id. On top of that the bridge
//! provides:
//!
//! - **Framing**: encoding with a 1024-byte payload limit, and a receive
//!   buffer that tolerates arbitrary chunking and resynchronizes after noise
//! - **Session**: connect / read / close lifecycle with one spawned read loop
//!   and observer callbacks for messages and reading state
//! - **Messages**: typed device requests and responses over a pluggable codec
//! - **Signatures**: recovery id resolution and address derivation on
//!   secp256k1
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Message   │   Recovery    │   Address    │   Signature    │
//! │   Codecs    │   Resolver    │  Derivation  │     Types      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                        Session                               │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐  │
//! │  │ Lifecycle │  │ Read Loop │  │  Frame    │  │ Observer │  │
//! │  │  State    │  │  (task)   │  │  Buffer   │  │ Dispatch │  │
//! │  └───────────┘  └───────────┘  └───────────┘  └──────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Connector (tty / in-memory pipe)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Framing a Payload
//!
//! ```rust
//! use ohw_bridge_core::FrameBuffer;
//! use ohw_bridge_core::frame::encode;
//!
//! let packet = encode(&[0xAA, 0xBB, 0xCC]).unwrap();
//!
//! // Bytes may arrive in any chunking.
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&packet[..2]).is_empty());
//! assert!(buffer.push(&packet[2..7]).is_empty());
//! let payloads = buffer.push(&packet[7..]);
//! assert_eq!(&payloads[0][..], &[0xAA, 0xBB, 0xCC]);
//! ```
//!
//! ## Address Derivation
//!
//! ```rust
//! use ohw_bridge_core::derive_address;
//!
//! let key = hex::decode(
//!     "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
//! )
//! .unwrap();
//! assert_eq!(
//!     derive_address(&key).unwrap(),
//!     "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
//! );
//! ```
//!
//! ## Talking to a Device
//!
//! ```ignore
//! use ohw_bridge_core::{Request, Response, Session, transport::TtyConnector};
//!
//! let session = Session::new(TtyConnector::discover());
//! session.on_message(|response: Response| {
//!     if let Response::Signature(result) = response {
//!         println!("{}", result.resolve().unwrap());
//!     }
//! });
//! session.connect().await?;
//! session.send_request(&Request::GetVersion).await?;
//! ```
//!
//! # Feature Flags
//!
//! - `tty`: the [`transport::TtyConnector`] for unix serial device nodes
//!
//! # Logging
//!
//! All diagnostics go through [`tracing`]. Connect, close and read failures
//! log at `info`/`error`; per-frame activity at `debug`/`trace`. Install a
//! subscriber to see them.

// Modules
pub mod address;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod recovery;
pub mod session;
pub mod signature;
pub mod transport;

// Re-exports for convenience
pub use address::{Address, derive_address};
pub use config::{PortSettings, SerialConfig, SessionConfig};
pub use error::{Error, Result};
pub use frame::FrameBuffer;
pub use message::{MessageCodec, PostcardCodec, RawCodec, Request, Response, SignResult};
pub use session::{Session, SessionState};
pub use signature::RecoverableSignature;
pub use transport::Connector;

#[cfg(test)]
use tracing_subscriber as _;
