//! Recovery id resolution for device signatures.
//!
//! The device returns `r || s` together with the digest it signed and the
//! signer's public key. Ethereum needs the extra `v` byte that selects which
//! of the two candidate keys produced the signature. When the firmware does
//! not report it, both candidates are tried in the fixed order `0x1b`,
//! `0x1c`: the signer address is recovered from the digest and compared with
//! the address of the expected key. The first match wins; if neither matches
//! the inputs are inconsistent and the call fails rather than guessing.
//!
//! # Example
//!
//! ```
//! use ohw_bridge_core::recovery::resolve;
//!
//! // A device that reports the recovery id needs no trial.
//! let sig = resolve(&[1u8; 64], &[0u8; 32], &[], Some(1)).unwrap();
//! assert_eq!(sig.v(), 0x1c);
//! ```

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use tracing::{debug, trace};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::{RecoverableSignature, V_OFFSET};

/// `v` bytes tried when the device omits the recovery id, in order.
pub const RECOVERY_CANDIDATES: [u8; 2] = [V_OFFSET, V_OFFSET + 1];

/// Builds the `r || s || v` signature for a device sign result.
///
/// # Arguments
///
/// * `signature` - 64-byte `r || s`
/// * `digest` - the 32-byte hash that was signed
/// * `expected_public_key` - SEC1 public key of the signer; unused when
///   `recovery_id` is given
/// * `recovery_id` - `0` or `1` when the device supplies it
///
/// # Errors
///
/// - [`Error::InvalidSignature`] if `signature` is not 64 bytes, the supplied
///   recovery id is not `0` or `1`, or the scalars are out of range or not
///   in low-S form
/// - [`Error::InvalidPublicKey`] if the expected key cannot be decoded
/// - [`Error::RecoveryExhausted`] if neither candidate recovers the expected
///   signer
pub fn resolve(
    signature: &[u8],
    digest: &[u8; 32],
    expected_public_key: &[u8],
    recovery_id: Option<u8>,
) -> Result<RecoverableSignature> {
    if let Some(id) = recovery_id {
        if id > 1 {
            return Err(Error::InvalidSignature(format!(
                "recovery id must be 0 or 1, got {id}"
            )));
        }
        return RecoverableSignature::from_parts(signature, id + V_OFFSET);
    }

    let scalars = parse_scalars(signature)?;
    let expected = Address::from_public_key_bytes(expected_public_key)?;

    for candidate in RECOVERY_CANDIDATES {
        match recover_with(digest, &scalars, candidate) {
            Ok(address) if address == expected => {
                debug!(v = candidate, %address, "recovery id resolved");
                return RecoverableSignature::from_parts(signature, candidate);
            }
            Ok(address) => trace!(v = candidate, %address, "candidate recovers another signer"),
            Err(err) => trace!(v = candidate, %err, "candidate does not recover"),
        }
    }

    Err(Error::RecoveryExhausted)
}

/// Recovers the signer address of a complete signature.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if the scalars are out of range, not
/// in low-S form, or no key recovers from them.
pub fn recover_address(digest: &[u8; 32], signature: &RecoverableSignature) -> Result<Address> {
    let bytes = signature.to_bytes();
    let scalars = parse_scalars(&bytes[..64])?;
    recover_with(digest, &scalars, signature.v())
}

/// Parses `r || s` into a low-S signature.
fn parse_scalars(rs: &[u8]) -> Result<Signature> {
    if rs.len() != 64 {
        return Err(Error::InvalidSignature(format!(
            "expected 64 bytes of r || s, got {}",
            rs.len()
        )));
    }
    let signature = Signature::from_slice(rs)
        .map_err(|_| Error::InvalidSignature("r or s out of range".to_string()))?;
    if signature.normalize_s().is_some() {
        return Err(Error::InvalidSignature("s is not in low-S form".to_string()));
    }
    Ok(signature)
}

/// Recovers the address for one `v` candidate.
fn recover_with(digest: &[u8; 32], signature: &Signature, v: u8) -> Result<Address> {
    let id = v
        .checked_sub(V_OFFSET)
        .and_then(RecoveryId::from_byte)
        .ok_or_else(|| Error::InvalidSignature(format!("invalid v byte {v:#04x}")))?;
    let key = VerifyingKey::recover_from_prehash(digest, signature, id)
        .map_err(|_| Error::InvalidSignature("no key recovers from signature".to_string()))?;
    Ok(Address::from_verifying_key(&key))
}

#[cfg(test)]
mod tests {
    use alloy_primitives::keccak256;
    use k256::ecdsa::SigningKey;

    use super::*;

    /// Order of the secp256k1 group.
    const N: [u8; 32] = [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFE, 0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36,
        0x41, 0x41,
    ];

    struct Fixture {
        digest: [u8; 32],
        rs: Vec<u8>,
        public_key: Vec<u8>,
        key: SigningKey,
    }

    /// Signs successive digests until one yields the wanted recovery id.
    fn fixture(wanted: u8) -> Fixture {
        let key = SigningKey::from_slice(&[0x42; 32]).unwrap();
        let public_key = key.verifying_key().to_encoded_point(true).as_bytes().to_vec();

        (0u8..=u8::MAX)
            .find_map(|seed| {
                let digest = keccak256([seed]).0;
                let (sig, id) = key.sign_prehash_recoverable(&digest).ok()?;
                (id.to_byte() == wanted).then(|| Fixture {
                    digest,
                    rs: sig.to_bytes().to_vec(),
                    public_key: public_key.clone(),
                    key: key.clone(),
                })
            })
            .unwrap()
    }

    /// Computes `N - s` for a big-endian scalar.
    fn negate(s: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut diff = i16::from(N[i]) - i16::from(s[i]) - borrow;
            borrow = i16::from(diff < 0);
            if diff < 0 {
                diff += 256;
            }
            out[i] = u8::try_from(diff).unwrap();
        }
        out
    }

    #[test]
    fn resolves_second_candidate() {
        let f = fixture(1);

        let sig = resolve(&f.rs, &f.digest, &f.public_key, None).unwrap();

        assert_eq!(sig.v(), 0x1c);
        assert_eq!(&sig.to_bytes()[..64], &f.rs[..]);
    }

    #[test]
    fn resolves_first_candidate() {
        let f = fixture(0);

        let sig = resolve(&f.rs, &f.digest, &f.public_key, None).unwrap();

        assert_eq!(sig.v(), 0x1b);
    }

    #[test]
    fn accepts_uncompressed_expected_key() {
        let f = fixture(1);
        let uncompressed = f.key.verifying_key().to_encoded_point(false);

        let sig = resolve(&f.rs, &f.digest, uncompressed.as_bytes(), None).unwrap();

        assert_eq!(sig.v(), 0x1c);
    }

    #[test]
    fn supplied_recovery_id_skips_trial() {
        let sig = resolve(&[5u8; 64], &[0u8; 32], &[], Some(0)).unwrap();
        assert_eq!(sig.v(), 0x1b);

        let sig = resolve(&[5u8; 64], &[0u8; 32], &[], Some(1)).unwrap();
        assert_eq!(sig.v(), 0x1c);
    }

    #[test]
    fn rejects_out_of_range_recovery_id() {
        let result = resolve(&[5u8; 64], &[0u8; 32], &[], Some(2));
        assert!(matches!(result, Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn mismatched_key_exhausts() {
        let f = fixture(1);
        let other = SigningKey::from_slice(&[0x07; 32]).unwrap();
        let other_key = other.verifying_key().to_encoded_point(true);

        let result = resolve(&f.rs, &f.digest, other_key.as_bytes(), None);

        assert!(matches!(result, Err(Error::RecoveryExhausted)));
    }

    #[test]
    fn wrong_digest_exhausts() {
        let f = fixture(0);
        let mut digest = f.digest;
        digest[0] ^= 0xFF;

        let result = resolve(&f.rs, &digest, &f.public_key, None);

        assert!(matches!(result, Err(Error::RecoveryExhausted)));
    }

    #[test]
    fn rejects_high_s() {
        let f = fixture(0);
        let mut rs = f.rs[..32].to_vec();
        rs.extend(negate(&f.rs[32..]));

        let result = resolve(&rs, &f.digest, &f.public_key, None);

        assert!(matches!(result, Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn rejects_short_signature() {
        let f = fixture(0);
        let result = resolve(&f.rs[..63], &f.digest, &f.public_key, None);
        assert!(matches!(result, Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn rejects_bad_expected_key() {
        let f = fixture(0);
        let result = resolve(&f.rs, &f.digest, &[0u8; 12], None);
        assert!(matches!(result, Err(Error::InvalidPublicKey(_))));
    }

    #[test]
    fn recover_address_matches_signer() {
        let f = fixture(1);
        let sig = resolve(&f.rs, &f.digest, &f.public_key, None).unwrap();

        let address = recover_address(&f.digest, &sig).unwrap();

        assert_eq!(address, Address::from_verifying_key(f.key.verifying_key()));
    }
}
