//! Typed device messages and the codecs that carry them in frame payloads.
//!
//! Requests and responses are closed enums: adding a variant forces every
//! `match` over them to be revisited. The protocol carries no request id, so
//! a response is matched to the request that caused it by variant and content
//! alone; that correlation is left to the caller.
//!
//! Two codecs implement [`MessageCodec`]:
//!
//! - [`PostcardCodec`]: the device schema, [`Request`] out and [`Response`] in
//! - [`RawCodec`]: pass-through bytes, for diagnostics and tests
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::message::{MessageCodec, PostcardCodec, Request, Response};
//!
//! let codec = PostcardCodec;
//! let bytes = codec.encode(&Request::GetVersion).unwrap();
//! assert!(!bytes.is_empty());
//!
//! let reply = postcard::to_allocvec(&Response::Version {
//!     version: "1.2.0".to_string(),
//!     initialized: true,
//! })
//! .unwrap();
//! assert!(matches!(
//!     codec.decode(&reply).unwrap(),
//!     Response::Version { initialized: true, .. }
//! ));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::recovery;
use crate::signature::RecoverableSignature;

/// Converts frame payloads to and from typed messages.
pub trait MessageCodec: Send + Sync + 'static {
    /// Messages sent to the device.
    type Request;

    /// Messages received from the device.
    type Response: Send + 'static;

    /// Encodes a request into a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the request cannot be serialized.
    fn encode(&self, request: &Self::Request) -> Result<Vec<u8>>;

    /// Decodes a frame payload into a response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameDecode`] if the payload is not a valid response.
    fn decode(&self, payload: &[u8]) -> Result<Self::Response>;
}

/// Number of words in a generated mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordCount {
    /// 12 words (128 bits of entropy).
    Twelve,
    /// 15 words (160 bits of entropy).
    Fifteen,
    /// 18 words (192 bits of entropy).
    Eighteen,
    /// 21 words (224 bits of entropy).
    TwentyOne,
    /// 24 words (256 bits of entropy).
    TwentyFour,
}

impl WordCount {
    /// Maps a word count to its variant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for anything but 12, 15, 18, 21 or 24.
    pub fn new(words: u8) -> Result<Self> {
        match words {
            12 => Ok(Self::Twelve),
            15 => Ok(Self::Fifteen),
            18 => Ok(Self::Eighteen),
            21 => Ok(Self::TwentyOne),
            24 => Ok(Self::TwentyFour),
            other => Err(Error::InvalidRequest(format!(
                "unsupported mnemonic length: {other} words"
            ))),
        }
    }

    /// Number of words.
    #[must_use]
    pub const fn words(self) -> u8 {
        match self {
            Self::Twelve => 12,
            Self::Fifteen => 15,
            Self::Eighteen => 18,
            Self::TwentyOne => 21,
            Self::TwentyFour => 24,
        }
    }
}

/// A message sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Query the firmware version and initialization status.
    GetVersion,
    /// Generate a fresh wallet on the device.
    InitWallet {
        /// Length of the mnemonic to generate.
        word_count: WordCount,
        /// Optional BIP-39 passphrase, empty for none.
        password: String,
    },
    /// Restore a wallet from an existing mnemonic.
    ImportWallet {
        /// Space-separated mnemonic words.
        mnemonic: String,
        /// Optional BIP-39 passphrase, empty for none.
        password: String,
    },
    /// Derive the public key at a BIP-32 path.
    DerivePublicKey {
        /// Derivation path, e.g. `m/44'/60'/0'/0/0`.
        path: String,
    },
    /// Sign a personal message (EIP-191) with the key at `path`.
    SignMessage {
        /// Derivation path of the signing key.
        path: String,
        /// Raw message bytes.
        message: Vec<u8>,
    },
    /// Sign a transaction digest with the key at `path`.
    SignTransaction {
        /// Derivation path of the signing key.
        path: String,
        /// 32-byte transaction signing hash.
        digest: [u8; 32],
    },
}

/// A message received from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Reply to [`Request::GetVersion`].
    Version {
        /// Firmware version string.
        version: String,
        /// Whether a wallet has been created or imported.
        initialized: bool,
    },
    /// Reply to [`Request::InitWallet`] and [`Request::ImportWallet`].
    WalletInit {
        /// Mnemonic now held by the device.
        mnemonic: String,
    },
    /// Reply to [`Request::DerivePublicKey`].
    PublicKey {
        /// Path the key was derived at.
        path: String,
        /// SEC1-encoded secp256k1 public key.
        public_key: Vec<u8>,
    },
    /// Reply to [`Request::SignMessage`] and [`Request::SignTransaction`].
    Signature(SignResult),
    /// The device rejected a request.
    Failure {
        /// Firmware error code.
        code: u32,
        /// Human-readable reason.
        message: String,
    },
}

/// A signature as reported by the device.
///
/// Some firmware builds omit the recovery id; [`resolve`](Self::resolve)
/// recovers it from the signer's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    /// `r || s`, 64 bytes.
    pub signature: Vec<u8>,
    /// The 32-byte hash that was signed.
    pub digest: [u8; 32],
    /// SEC1-encoded public key of the signer.
    pub public_key: Vec<u8>,
    /// Recovery id (`0` or `1`) when the device supplies it.
    pub recovery_id: Option<u8>,
}

impl SignResult {
    /// Produces the 65-byte `r || s || v` signature.
    ///
    /// # Errors
    ///
    /// See [`recovery::resolve`].
    pub fn resolve(&self) -> Result<RecoverableSignature> {
        recovery::resolve(
            &self.signature,
            &self.digest,
            &self.public_key,
            self.recovery_id,
        )
    }
}

/// Postcard encoding of [`Request`] and [`Response`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl MessageCodec for PostcardCodec {
    type Request = Request;
    type Response = Response;

    fn encode(&self, request: &Request) -> Result<Vec<u8>> {
        postcard::to_allocvec(request).map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Response> {
        postcard::from_bytes(payload).map_err(|e| Error::FrameDecode(e.to_string()))
    }
}

/// Pass-through codec: payloads in, payloads out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Request = Bytes;
    type Response = Bytes;

    fn encode(&self, request: &Bytes) -> Result<Vec<u8>> {
        Ok(request.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(payload))
    }
}
