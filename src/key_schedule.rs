// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Derivation of the per-session keys from the Diffie-Hellman exchange:
//! DHKey = SHA-256(shared secret), KDK = HMAC-SHA-256(DHKey, N1 | MAC | N2),
//! then the WSC key derivation function expands the KDK into AuthKey,
//! KeyWrapKey and EMSK.

use crate::crypto::{Crypto, CryptoError};
use crate::wsc::constants::size;

/// Wi-Fi Simple Configuration Technical Specification v2.0.5, Section 7.3.
const KDF_PERSONALIZATION: &[u8] = b"Wi-Fi Easy and Secure Key Derivation";
/// Total derived key length in bits: AuthKey(256) + KeyWrapKey(128) + EMSK(256).
const KDF_KEY_BITS: u32 = 640;

/// Keys derived exactly once per session, after the peer's public key and
/// both nonces are known; immutable thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionKeys {
    pub auth_key: [u8; size::AUTH_KEY],
    pub key_wrap_key: [u8; size::KEY_WRAP_KEY],
    pub emsk: [u8; size::EMSK],
}

impl SessionKeys {
    pub(crate) fn zero(&mut self) {
        self.auth_key = [0; size::AUTH_KEY];
        self.key_wrap_key = [0; size::KEY_WRAP_KEY];
        self.emsk = [0; size::EMSK];
    }
}

/// Runs the full schedule. The Enrollee-produced nonce and MAC address
/// always occupy the first two KDK slots, regardless of which side computes;
/// both sides therefore arrive at identical keys when the exchange succeeded.
pub fn compute_keys(
    crypto: &dyn Crypto,
    dh_private: &[u8],
    peer_public: &[u8; size::PUB_KEY],
    enrollee_nonce: &[u8; size::NONCE],
    enrollee_mac: &[u8; size::MAC_ADDR],
    registrar_nonce: &[u8; size::NONCE],
) -> Result<SessionKeys, CryptoError> {
    let shared_secret = crypto.dh_shared(dh_private, peer_public)?;
    let dhkey = crypto.sha256(&[&shared_secret])?;
    let kdk =
        crypto.hmac_sha256(&dhkey, &[&enrollee_nonce[..], &enrollee_mac[..], &registrar_nonce[..]])?;

    let expanded = kdf(crypto, &kdk)?;
    let mut keys = SessionKeys {
        auth_key: [0; size::AUTH_KEY],
        key_wrap_key: [0; size::KEY_WRAP_KEY],
        emsk: [0; size::EMSK],
    };
    keys.auth_key.copy_from_slice(&expanded[..size::AUTH_KEY]);
    keys.key_wrap_key
        .copy_from_slice(&expanded[size::AUTH_KEY..size::AUTH_KEY + size::KEY_WRAP_KEY]);
    keys.emsk.copy_from_slice(
        &expanded[size::AUTH_KEY + size::KEY_WRAP_KEY
            ..size::AUTH_KEY + size::KEY_WRAP_KEY + size::EMSK],
    );
    // The tail of the final block is unused but was still generated; the
    // iteration count is a function of KDF_KEY_BITS alone, never of the data.
    Ok(keys)
}

fn kdf(crypto: &dyn Crypto, kdk: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iterations = (KDF_KEY_BITS + 255) / 256;
    let total_bits = KDF_KEY_BITS.to_be_bytes();
    let mut out = Vec::with_capacity(iterations as usize * 32);
    for i in 1..=iterations {
        let block =
            crypto.hmac_sha256(kdk, &[&i.to_be_bytes(), KDF_PERSONALIZATION, &total_bits])?;
        out.extend_from_slice(&block);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCrypto;

    #[test]
    fn kdf_output_covers_all_three_keys() {
        let crypto = SoftwareCrypto::new();
        let expanded = kdf(&crypto, &[0x11; 32]).unwrap();
        assert!(expanded.len() >= size::AUTH_KEY + size::KEY_WRAP_KEY + size::EMSK);
        // Fixed iteration count: same KDK, same output, every time.
        assert_eq!(expanded, kdf(&crypto, &[0x11; 32]).unwrap());
    }

    #[test]
    fn both_sides_derive_identical_keys() {
        let crypto = SoftwareCrypto::new();
        let (enrollee_priv, enrollee_pub) = crypto.dh_generate().unwrap();
        let (registrar_priv, registrar_pub) = crypto.dh_generate().unwrap();
        let e_nonce = [0xA1; 16];
        let r_nonce = [0xB2; 16];
        let e_mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

        let enrollee_keys = compute_keys(
            &crypto, &enrollee_priv, &registrar_pub, &e_nonce, &e_mac, &r_nonce,
        )
        .unwrap();
        let registrar_keys = compute_keys(
            &crypto, &registrar_priv, &enrollee_pub, &e_nonce, &e_mac, &r_nonce,
        )
        .unwrap();
        assert_eq!(enrollee_keys, registrar_keys);
    }

    #[test]
    fn nonce_order_changes_keys() {
        let crypto = SoftwareCrypto::new();
        let (priv_a, _) = crypto.dh_generate().unwrap();
        let (_, pub_b) = crypto.dh_generate().unwrap();
        let n1 = [1; 16];
        let n2 = [2; 16];
        let mac = [3; 6];
        let forward = compute_keys(&crypto, &priv_a, &pub_b, &n1, &mac, &n2).unwrap();
        let reversed = compute_keys(&crypto, &priv_a, &pub_b, &n2, &mac, &n1).unwrap();
        assert_ne!(forward, reversed);
    }
}
