//! Recoverable secp256k1 signatures in Ethereum wire form.
//!
//! # Signature Format
//!
//! ```text
//! | r (32 bytes) | s (32 bytes) | v (1 byte) |
//! ```
//!
//! `v` is the recovery id offset by 27: `0x1b` selects the even-y candidate
//! key, `0x1c` the odd one.
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::RecoverableSignature;
//!
//! let sig = RecoverableSignature::from_parts(&[1u8; 64], 0x1c).unwrap();
//! assert_eq!(sig.recovery_id(), 1);
//! assert_eq!(sig.to_bytes()[64], 0x1c);
//! ```

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// Offset between a recovery id and its `v` byte.
pub const V_OFFSET: u8 = 27;

/// A 65-byte `r || s || v` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecoverableSignature {
    /// The R scalar.
    r: [u8; 32],
    /// The S scalar.
    s: [u8; 32],
    /// `27` or `28`.
    v: u8,
}

impl RecoverableSignature {
    /// The length of a serialized signature in bytes.
    pub const BYTE_LEN: usize = 65;

    /// Joins a 64-byte `r || s` with a `v` byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if `rs` is not 64 bytes or `v` is
    /// neither `0x1b` nor `0x1c`.
    pub fn from_parts(rs: &[u8], v: u8) -> Result<Self> {
        if rs.len() != 64 {
            return Err(Error::InvalidSignature(format!(
                "expected 64 bytes of r || s, got {}",
                rs.len()
            )));
        }
        if !(V_OFFSET..=V_OFFSET + 1).contains(&v) {
            return Err(Error::InvalidSignature(format!("v must be 27 or 28, got {v}")));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&rs[..32]);
        s.copy_from_slice(&rs[32..]);
        Ok(Self { r, s, v })
    }

    /// Parses a 65-byte `r || s || v` signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] on a wrong length or `v` byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.split_last() {
            Some((&v, rs)) if bytes.len() == Self::BYTE_LEN => Self::from_parts(rs, v),
            _ => Err(Error::InvalidSignature(format!(
                "expected {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))),
        }
    }

    /// Parses a hex signature, with or without the `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] for invalid hex, otherwise as
    /// [`from_bytes`](Self::from_bytes).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    /// Serializes to `r || s || v`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    /// The R scalar.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// The S scalar.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// The `v` byte, `27` or `28`.
    #[must_use]
    pub const fn v(&self) -> u8 {
        self.v
    }

    /// The recovery id, `0` or `1`.
    #[must_use]
    pub const fn recovery_id(&self) -> u8 {
        self.v - V_OFFSET
    }

    /// Lowercase hex with `0x` prefix (132 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for RecoverableSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecoverableSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs() -> Vec<u8> {
        let mut rs = vec![1u8; 32];
        rs.extend([2u8; 32]);
        rs
    }

    #[test]
    fn from_parts_splits_scalars() {
        let sig = RecoverableSignature::from_parts(&rs(), 0x1b).unwrap();

        assert_eq!(sig.r(), &[1u8; 32]);
        assert_eq!(sig.s(), &[2u8; 32]);
        assert_eq!(sig.v(), 27);
        assert_eq!(sig.recovery_id(), 0);
    }

    #[test]
    fn from_parts_rejects_bad_input() {
        assert!(matches!(
            RecoverableSignature::from_parts(&[0u8; 63], 27),
            Err(Error::InvalidSignature(_))
        ));
        assert!(RecoverableSignature::from_parts(&rs(), 0).is_err());
        assert!(RecoverableSignature::from_parts(&rs(), 29).is_err());
    }

    #[test]
    fn bytes_roundtrip() {
        let sig = RecoverableSignature::from_parts(&rs(), 0x1c).unwrap();
        let bytes = sig.to_bytes();

        assert_eq!(bytes[64], 0x1c);
        assert_eq!(RecoverableSignature::from_bytes(&bytes).unwrap(), sig);
        assert!(RecoverableSignature::from_bytes(&bytes[..64]).is_err());
    }

    #[test]
    fn hex_and_display() {
        let sig = RecoverableSignature::from_parts(&rs(), 0x1c).unwrap();
        let hex = sig.to_string();

        assert!(hex.starts_with("0x"));
        assert!(hex.ends_with("1c"));
        assert_eq!(hex.len(), 132);
        assert_eq!(RecoverableSignature::from_hex(&hex).unwrap(), sig);
        assert_eq!(RecoverableSignature::from_hex(&hex[2..]).unwrap(), sig);
    }

    #[test]
    fn serde_as_hex_string() {
        let sig = RecoverableSignature::from_parts(&rs(), 0x1b).unwrap();
        let json = serde_json::to_string(&sig).unwrap();

        assert_eq!(json, format!("\"{}\"", sig.to_hex()));
        assert_eq!(serde_json::from_str::<RecoverableSignature>(&json).unwrap(), sig);
    }
}
