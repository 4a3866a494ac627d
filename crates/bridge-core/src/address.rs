//! Ethereum address derivation from secp256k1 public keys.
//!
//! The device reports public keys in SEC1 form, compressed (33 bytes) or
//! uncompressed (65 bytes); some firmware builds send the bare 64-byte
//! `x || y`. All three are normalized to the uncompressed point before
//! hashing:
//!
//! 1. Decode and validate the point on the curve
//! 2. Take the 64 bytes `x || y` of its uncompressed encoding
//! 3. Keccak-256 them and keep the last 20 bytes
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::Address;
//!
//! // The secp256k1 generator point, i.e. the key for private scalar 1.
//! let key = hex::decode(
//!     "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
//! )
//! .unwrap();
//! let address = Address::from_public_key_bytes(&key).unwrap();
//! assert_eq!(
//!     address.to_checksum_hex(),
//!     "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
//! );
//! ```

use std::fmt;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag byte of an uncompressed SEC1 point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// An Ethereum address (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates an address from its raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Derives the address controlled by a verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Skip the 0x04 tag, hash x || y.
        let hash = keccak256(&point.as_bytes()[1..]);
        Self(AlloyAddress::from_slice(&hash[12..]))
    }

    /// Derives the address for a raw public key.
    ///
    /// # Arguments
    ///
    /// * `bytes` - 33 bytes (compressed), 65 bytes (`0x04 || x || y`) or
    ///   64 bytes (`x || y`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if the length is not one of the
    /// above or the bytes do not describe a point on secp256k1.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let key = match bytes.len() {
            33 | 65 => VerifyingKey::from_sec1_bytes(bytes),
            64 => {
                let mut tagged = [0u8; 65];
                tagged[0] = UNCOMPRESSED_TAG;
                tagged[1..].copy_from_slice(bytes);
                VerifyingKey::from_sec1_bytes(&tagged)
            }
            len => {
                return Err(Error::InvalidPublicKey(format!(
                    "expected 33, 64 or 65 bytes, got {len}"
                )));
            }
        }
        .map_err(|_| Error::InvalidPublicKey("not a point on secp256k1".to_string()))?;

        Ok(Self::from_verifying_key(&key))
    }

    /// Parses an address from hex, with or without the `0x` prefix.
    ///
    /// Checksum casing is accepted but not enforced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] for invalid hex or a length other
    /// than 20 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes: [u8; Self::BYTE_LEN] = hex::decode(hex_str)?.try_into().map_err(|b: Vec<u8>| {
            Error::HexDecodeFailed(format!("expected {} bytes, got {}", Self::BYTE_LEN, b.len()))
        })?;
        Ok(Self::new(bytes))
    }

    /// Returns the raw address bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        &self.0.0.0
    }

    /// EIP-55 mixed-case hex with `0x` prefix.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Lowercase hex with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_hex())
    }
}

impl From<Address> for AlloyAddress {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Derives the checksummed address string for a raw public key.
///
/// # Errors
///
/// See [`Address::from_public_key_bytes`].
pub fn derive_address(public_key: &[u8]) -> Result<String> {
    Address::from_public_key_bytes(public_key).map(|address| address.to_checksum_hex())
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;

    /// Compressed public key for private scalar 1.
    const GENERATOR_COMPRESSED: &str =
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    /// Address for private scalar 1.
    const GENERATOR_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

    fn generator_key() -> VerifyingKey {
        let bytes = hex::decode(GENERATOR_COMPRESSED).unwrap();
        VerifyingKey::from_sec1_bytes(&bytes).unwrap()
    }

    #[test]
    fn known_address_from_compressed_key() {
        let bytes = hex::decode(GENERATOR_COMPRESSED).unwrap();
        assert_eq!(derive_address(&bytes).unwrap(), GENERATOR_ADDRESS);
    }

    #[test]
    fn encodings_agree() {
        let key = generator_key();
        let uncompressed = key.to_encoded_point(false);
        let compressed = key.to_encoded_point(true);

        let from_65 = Address::from_public_key_bytes(uncompressed.as_bytes()).unwrap();
        let from_64 = Address::from_public_key_bytes(&uncompressed.as_bytes()[1..]).unwrap();
        let from_33 = Address::from_public_key_bytes(compressed.as_bytes()).unwrap();

        assert_eq!(from_65, from_64);
        assert_eq!(from_65, from_33);
        assert_eq!(from_65, Address::from_verifying_key(&key));
    }

    #[test]
    fn derived_from_signing_key() {
        let signing_key = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let compressed = signing_key.verifying_key().to_encoded_point(true);

        let address = Address::from_public_key_bytes(compressed.as_bytes()).unwrap();

        assert_eq!(address, Address::from_verifying_key(signing_key.verifying_key()));
    }

    #[test]
    fn rejects_bad_length() {
        let result = Address::from_public_key_bytes(&[0u8; 63]);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn rejects_point_off_curve() {
        let result = Address::from_public_key_bytes(&[0u8; 64]);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));

        let mut bad_tag = [0u8; 65];
        bad_tag[0] = 0x05;
        assert!(Address::from_public_key_bytes(&bad_tag).is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let address = Address::new([0xab; 20]);
        assert_eq!(Address::from_hex(&address.to_hex()).unwrap(), address);
        assert_eq!(
            Address::from_hex(address.to_hex().trim_start_matches("0x")).unwrap(),
            address
        );
        assert_eq!(Address::from_hex(GENERATOR_ADDRESS).unwrap().to_string(), GENERATOR_ADDRESS);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            Address::from_hex("0x1234"),
            Err(Error::HexDecodeFailed(_))
        ));
    }

    #[test]
    fn serde_as_hex_string() {
        let address = Address::from_hex(GENERATOR_ADDRESS).unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json.to_lowercase(), format!("\"{}\"", GENERATOR_ADDRESS.to_lowercase()));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), address);
    }
}
