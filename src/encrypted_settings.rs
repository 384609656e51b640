// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Encrypted Settings container: a TLV sub-message carrying a secret
//! nonce and/or configuration payload, integrity-tagged with the first eight
//! octets of an HMAC under AuthKey (the Key Wrap Authenticator), then
//! AES-128-CBC encrypted under KeyWrapKey. On the wire the container is
//! IV ‖ ciphertext.

use crate::crypto::Crypto;
use crate::wsc::constants::size;
use crate::wsc::{Id, Message};
use crate::Error;

/// Serializes the optional nonce attribute and payload, appends the Key Wrap
/// Authenticator, pads (PKCS#7-style, always, 1..=16 octets) and encrypts.
pub fn build(
    crypto: &dyn Crypto,
    auth_key: &[u8; size::AUTH_KEY],
    key_wrap_key: &[u8; size::KEY_WRAP_KEY],
    secret_nonce: Option<(Id, &[u8; size::NONCE])>,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let mut plaintext = Vec::new();
    if let Some((id, nonce)) = secret_nonce {
        let mut msg = Message::new();
        msg.set(id, nonce.to_vec());
        plaintext.extend_from_slice(&msg.write());
    }
    if let Some(payload) = payload {
        plaintext.extend_from_slice(payload);
    }

    let tag = crypto.hmac_sha256(auth_key, &[&plaintext])?;
    let mut tagged = Message::parse(&plaintext)?;
    tagged.set(Id::KEY_WRAP_AUTH, tag[..size::KEY_WRAP_AUTH].to_vec());
    let mut padded = tagged.write();

    // Pad out with a byte value that gives the number of padding bytes,
    // added even when the plaintext is already block aligned.
    let pad = size::BLOCK - padded.len() % size::BLOCK;
    padded.extend(std::iter::repeat(pad as u8).take(pad));

    let mut iv = [0u8; size::BLOCK];
    crypto.random_bytes(&mut iv)?;
    let ciphertext = crypto.aes128_cbc_encrypt(key_wrap_key, &iv, &padded)?;

    let mut out = Vec::with_capacity(size::BLOCK + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts and validates a container, returning the revealed secret nonce
/// (when `nonce_id` names one) and the remaining plaintext attributes with
/// the Key Wrap Authenticator removed.
pub fn open(
    crypto: &dyn Crypto,
    auth_key: &[u8; size::AUTH_KEY],
    key_wrap_key: &[u8; size::KEY_WRAP_KEY],
    container: &[u8],
    nonce_id: Option<Id>,
) -> Result<(Option<[u8; size::NONCE]>, Vec<u8>), Error> {
    if container.len() <= size::BLOCK {
        return Err(Error::MalformedEncryptedSettings);
    }
    let (iv, ciphertext) = container.split_at(size::BLOCK);
    if ciphertext.is_empty() || ciphertext.len() % size::BLOCK != 0 {
        return Err(Error::MalformedEncryptedSettings);
    }
    let mut iv_arr = [0u8; size::BLOCK];
    iv_arr.copy_from_slice(iv);

    let mut plaintext = crypto.aes128_cbc_decrypt(key_wrap_key, &iv_arr, ciphertext)?;
    let pad = *plaintext.last().ok_or(Error::MalformedEncryptedSettings)? as usize;
    if pad == 0 || pad > size::BLOCK || pad > plaintext.len() {
        return Err(Error::MalformedEncryptedSettings);
    }
    plaintext.truncate(plaintext.len() - pad);

    let mut msg = Message::parse(&plaintext)?;
    let tag = msg.remove(Id::KEY_WRAP_AUTH).ok_or(Error::MissingAttribute(Id::KEY_WRAP_AUTH))?;
    let remaining = msg.write();
    let expected = crypto.hmac_sha256(auth_key, &[&remaining])?;
    if !constant_time_eq(&tag, &expected[..size::KEY_WRAP_AUTH]) {
        return Err(Error::AuthenticatorMismatch);
    }

    let nonce = match nonce_id {
        Some(id) => {
            Some(msg.get_fixed::<{ size::NONCE }>(id).ok_or(Error::MissingAttribute(id))??)
        }
        None => None,
    };
    Ok((nonce, remaining))
}

/// Single pass over every byte; no early exit on the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::crypto::software::SoftwareCrypto;

    const AUTH_KEY: [u8; 32] = [0xAA; 32];
    const WRAP_KEY: [u8; 16] = [0xBB; 16];

    #[test]
    fn round_trip_across_every_padding_boundary() {
        let crypto = SoftwareCrypto::new();
        let nonce = [0x5E; 16];
        // Credential payloads sized to hit every plaintext length residue
        // mod 16, plus a multi-KB case.
        let sizes: Vec<usize> = (0..48).chain(std::iter::once(3000)).collect();
        for credential_len in sizes {
            let mut payload = Message::new();
            payload.set(Id::CREDENTIAL, vec![0xC7; credential_len]);
            let payload = payload.write();

            let container = build(
                &crypto,
                &AUTH_KEY,
                &WRAP_KEY,
                Some((Id::R_SNONCE1, &nonce)),
                Some(&payload[..]),
            )
            .unwrap();

            let (revealed, remaining) =
                open(&crypto, &AUTH_KEY, &WRAP_KEY, &container, Some(Id::R_SNONCE1)).unwrap();
            assert_eq!(revealed, Some(nonce));
            let msg = Message::parse(&remaining).unwrap();
            assert_eq!(msg.get(Id::CREDENTIAL), Some(&vec![0xC7; credential_len][..]));
            assert!(!msg.contains(Id::KEY_WRAP_AUTH));
        }
    }

    #[test]
    fn empty_payload_round_trip() {
        let crypto = SoftwareCrypto::new();
        let nonce = [1u8; 16];
        let container =
            build(&crypto, &AUTH_KEY, &WRAP_KEY, Some((Id::E_SNONCE1, &nonce)), None).unwrap();
        let (revealed, _) =
            open(&crypto, &AUTH_KEY, &WRAP_KEY, &container, Some(Id::E_SNONCE1)).unwrap();
        assert_eq!(revealed, Some(nonce));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let crypto = SoftwareCrypto::new();
        let nonce = [2u8; 16];
        let mut container =
            build(&crypto, &AUTH_KEY, &WRAP_KEY, Some((Id::R_SNONCE2, &nonce)), None).unwrap();
        // Flip one bit in the first ciphertext block; either the TLV parse,
        // the padding, or the key wrap authenticator must fail, never succeed.
        container[size::BLOCK] ^= 0x01;
        open(&crypto, &AUTH_KEY, &WRAP_KEY, &container, Some(Id::R_SNONCE2))
            .expect_err("tampered container must not open");
    }

    #[test]
    fn wrong_key_rejected() {
        let crypto = SoftwareCrypto::new();
        let nonce = [3u8; 16];
        let container =
            build(&crypto, &AUTH_KEY, &WRAP_KEY, Some((Id::R_SNONCE1, &nonce)), None).unwrap();
        let other_key = [0xCC; 16];
        open(&crypto, &AUTH_KEY, &other_key, &container, Some(Id::R_SNONCE1))
            .expect_err("wrong key must not open");
    }

    #[test]
    fn short_or_misaligned_container_rejected() {
        let crypto = SoftwareCrypto::new();
        assert_matches!(
            open(&crypto, &AUTH_KEY, &WRAP_KEY, &[0u8; 16], None),
            Err(Error::MalformedEncryptedSettings)
        );
        assert_matches!(
            open(&crypto, &AUTH_KEY, &WRAP_KEY, &[0u8; 33], None),
            Err(Error::MalformedEncryptedSettings)
        );
    }
}
