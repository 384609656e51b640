// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! E-Hash / R-Hash device-password commitments. The device password is split
//! in two halves and each side commits to both halves before either half's
//! secret nonce is revealed, proving PIN possession without disclosing it.
//!
//! The public keys are hashed in a fixed absolute order: the Enrollee's key
//! occupies the first slot in both the E-Hash and the R-Hash computation.
//! Each builder therefore passes (own, peer) or (peer, own) depending on its
//! role, and the validator must mirror the same order exactly; getting this
//! backwards fails silently against a correct peer.

use crate::crypto::{Crypto, CryptoError};
use crate::wsc::constants::size;

/// Artifacts of committing to one password half.
#[derive(Debug, Clone, PartialEq)]
pub struct HalfCommitment {
    /// First 128 bits of HMAC-SHA-256(AuthKey, password half).
    pub psk: [u8; 16],
    /// Fresh secret nonce, revealed later inside encrypted settings.
    pub secret_nonce: [u8; size::NONCE],
    /// The commitment placed on the wire.
    pub hash: [u8; size::HASH],
}

/// Splits a device password: half A is the first `ceil(len/2)` octets, half B
/// the remainder.
pub fn split_password(password: &[u8]) -> (&[u8], &[u8]) {
    password.split_at(password.len() / 2 + password.len() % 2)
}

/// Commits to one password half with a freshly generated secret nonce.
pub fn generate(
    crypto: &dyn Crypto,
    auth_key: &[u8; size::AUTH_KEY],
    password_half: &[u8],
    pub_key_first: &[u8; size::PUB_KEY],
    pub_key_second: &[u8; size::PUB_KEY],
) -> Result<HalfCommitment, CryptoError> {
    let digest = crypto.hmac_sha256(auth_key, &[password_half])?;
    let mut psk = [0u8; 16];
    psk.copy_from_slice(&digest[..16]);

    let mut secret_nonce = [0u8; size::NONCE];
    crypto.random_bytes(&mut secret_nonce)?;

    let hash = crypto.hmac_sha256(
        auth_key,
        &[&secret_nonce[..], &psk[..], &pub_key_first[..], &pub_key_second[..]],
    )?;
    Ok(HalfCommitment { psk, secret_nonce, hash })
}

/// Recomputes the peer's commitment from the nonce it revealed and the psk we
/// derived from our own copy of the password half. Any byte mismatch rejects;
/// there is no partial-match leniency.
pub fn validate(
    crypto: &dyn Crypto,
    auth_key: &[u8; size::AUTH_KEY],
    committed_hash: &[u8; size::HASH],
    revealed_nonce: &[u8; size::NONCE],
    psk: &[u8; 16],
    pub_key_first: &[u8; size::PUB_KEY],
    pub_key_second: &[u8; size::PUB_KEY],
) -> Result<bool, CryptoError> {
    let expected = crypto.hmac_sha256(
        auth_key,
        &[&revealed_nonce[..], &psk[..], &pub_key_first[..], &pub_key_second[..]],
    )?;
    Ok(expected == *committed_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCrypto;

    fn setup() -> (SoftwareCrypto, [u8; 32], [u8; 192], [u8; 192]) {
        (SoftwareCrypto::new(), [0x42; 32], [0x11; 192], [0x22; 192])
    }

    #[test]
    fn split_covers_odd_and_even_lengths() {
        assert_eq!(split_password(b"12345670"), (&b"1234"[..], &b"5670"[..]));
        assert_eq!(split_password(b"1234567"), (&b"1234"[..], &b"567"[..]));
        assert_eq!(split_password(b""), (&b""[..], &b""[..]));
    }

    #[test]
    fn fresh_nonces_produce_distinct_hashes() {
        let (crypto, auth_key, pk1, pk2) = setup();
        let a = generate(&crypto, &auth_key, b"1234", &pk1, &pk2).unwrap();
        let b = generate(&crypto, &auth_key, b"1234", &pk1, &pk2).unwrap();
        assert_eq!(a.psk, b.psk);
        assert_ne!(a.secret_nonce, b.secret_nonce);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn validate_accepts_exact_pair_only() {
        let (crypto, auth_key, pk1, pk2) = setup();
        let c = generate(&crypto, &auth_key, b"5670", &pk1, &pk2).unwrap();
        assert!(validate(&crypto, &auth_key, &c.hash, &c.secret_nonce, &c.psk, &pk1, &pk2)
            .unwrap());

        // A single flipped bit anywhere in the inputs must reject.
        let mut bad_nonce = c.secret_nonce;
        bad_nonce[0] ^= 0x01;
        assert!(!validate(&crypto, &auth_key, &c.hash, &bad_nonce, &c.psk, &pk1, &pk2).unwrap());

        let mut bad_psk = c.psk;
        bad_psk[15] ^= 0x80;
        assert!(!validate(&crypto, &auth_key, &c.hash, &c.secret_nonce, &bad_psk, &pk1, &pk2)
            .unwrap());

        let mut bad_pk1 = pk1;
        bad_pk1[191] ^= 0x01;
        assert!(!validate(&crypto, &auth_key, &c.hash, &c.secret_nonce, &c.psk, &bad_pk1, &pk2)
            .unwrap());

        let mut bad_pk2 = pk2;
        bad_pk2[0] ^= 0x01;
        assert!(!validate(&crypto, &auth_key, &c.hash, &c.secret_nonce, &c.psk, &pk1, &bad_pk2)
            .unwrap());
    }

    #[test]
    fn public_key_order_matters() {
        let (crypto, auth_key, pk1, pk2) = setup();
        let c = generate(&crypto, &auth_key, b"1234", &pk1, &pk2).unwrap();
        // Swapped key order is exactly the easy-to-make mistake; it must not
        // validate.
        assert!(!validate(&crypto, &auth_key, &c.hash, &c.secret_nonce, &c.psk, &pk2, &pk1)
            .unwrap());
    }
}
