// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Software implementation of the [`Crypto`] capability backed by RustCrypto
//! primitives and `num` big-integer arithmetic.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, NewBlockCipher};
use aes::Aes128;
use hmac::{Hmac, Mac, NewMac};
use num::bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{Crypto, CryptoError};
use crate::wsc::constants::size;

type HmacSha256 = Hmac<Sha256>;

// RFC 3526, Section 2: the 1536-bit MODP group. Generator is 2.
#[rustfmt::skip]
const MODP_1536_PRIME: [u8; size::PUB_KEY] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1,
    0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22,
    0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B,
    0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45,
    0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B,
    0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5,
    0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D,
    0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05,
    0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3, 0x9A,
    0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F,
    0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96,
    0x1C, 0x62, 0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB,
    0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D,
    0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04,
    0xF1, 0x74, 0x6C, 0x08, 0xCA, 0x23, 0x73, 0x27,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

const GENERATOR: u32 = 2;

#[derive(Default)]
pub struct SoftwareCrypto;

impl SoftwareCrypto {
    pub fn new() -> Self {
        SoftwareCrypto
    }
}

/// Converts to a fixed-width big-endian value, left-zero-padded if the
/// numeric result is shorter.
fn to_fixed_be(n: &BigUint) -> Result<[u8; size::PUB_KEY], CryptoError> {
    let bytes = n.to_bytes_be();
    if bytes.len() > size::PUB_KEY {
        return Err(CryptoError::InvalidKey);
    }
    let mut out = [0u8; size::PUB_KEY];
    out[size::PUB_KEY - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

impl Crypto for SoftwareCrypto {
    fn dh_generate(&self) -> Result<(Vec<u8>, [u8; size::PUB_KEY]), CryptoError> {
        let mut private = vec![0u8; size::PUB_KEY];
        self.random_bytes(&mut private)?;
        let p = BigUint::from_bytes_be(&MODP_1536_PRIME);
        let public =
            BigUint::from(GENERATOR).modpow(&BigUint::from_bytes_be(&private), &p);
        Ok((private, to_fixed_be(&public)?))
    }

    fn dh_shared(
        &self,
        private: &[u8],
        peer_public: &[u8; size::PUB_KEY],
    ) -> Result<[u8; size::PUB_KEY], CryptoError> {
        let p = BigUint::from_bytes_be(&MODP_1536_PRIME);
        let peer = BigUint::from_bytes_be(peer_public);
        if peer.bits() == 0 || peer >= p {
            return Err(CryptoError::InvalidKey);
        }
        let shared = peer.modpow(&BigUint::from_bytes_be(private), &p);
        to_fixed_be(&shared)
    }

    fn sha256(&self, parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Ok(hasher.finalize().into())
    }

    fn hmac_sha256(&self, key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::Mac)?;
        for part in parts {
            mac.update(part);
        }
        Ok(mac.finalize().into_bytes().into())
    }

    fn aes128_cbc_encrypt(
        &self,
        key: &[u8; size::KEY_WRAP_KEY],
        iv: &[u8; size::BLOCK],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() || data.len() % size::BLOCK != 0 {
            return Err(CryptoError::BlockAlignment);
        }
        let cipher = Aes128::new(GenericArray::from_slice(key));
        let mut out = Vec::with_capacity(data.len());
        let mut chain = *iv;
        for chunk in data.chunks(size::BLOCK) {
            let mut block = [0u8; size::BLOCK];
            for (i, b) in block.iter_mut().enumerate() {
                *b = chunk[i] ^ chain[i];
            }
            let ga = GenericArray::from_mut_slice(&mut block);
            cipher.encrypt_block(ga);
            chain.copy_from_slice(&block);
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    fn aes128_cbc_decrypt(
        &self,
        key: &[u8; size::KEY_WRAP_KEY],
        iv: &[u8; size::BLOCK],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() || data.len() % size::BLOCK != 0 {
            return Err(CryptoError::BlockAlignment);
        }
        let cipher = Aes128::new(GenericArray::from_slice(key));
        let mut out = Vec::with_capacity(data.len());
        let mut chain = *iv;
        for chunk in data.chunks(size::BLOCK) {
            let mut block = [0u8; size::BLOCK];
            block.copy_from_slice(chunk);
            let ga = GenericArray::from_mut_slice(&mut block);
            cipher.decrypt_block(ga);
            for (i, b) in block.iter_mut().enumerate() {
                *b ^= chain[i];
            }
            chain.copy_from_slice(chunk);
            out.extend_from_slice(&block);
        }
        Ok(out)
    }

    fn random_bytes(&self, out: &mut [u8]) -> Result<(), CryptoError> {
        rand::thread_rng().try_fill_bytes(out).map_err(|_| CryptoError::Entropy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex::FromHex;

    #[test]
    fn sha256_matches_known_vector() {
        let crypto = SoftwareCrypto::new();
        let digest = crypto.sha256(&[b"abc"]).unwrap();
        let expected =
            Vec::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert_eq!(&digest[..], &expected[..]);
    }

    #[test]
    fn hmac_sha256_matches_rfc4231_case_2() {
        let crypto = SoftwareCrypto::new();
        let mac = crypto.hmac_sha256(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        let expected =
            Vec::from_hex("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap();
        assert_eq!(&mac[..], &expected[..]);
    }

    #[test]
    fn dh_shared_secret_is_symmetric() {
        let crypto = SoftwareCrypto::new();
        let (priv_a, pub_a) = crypto.dh_generate().unwrap();
        let (priv_b, pub_b) = crypto.dh_generate().unwrap();
        let shared_a = crypto.dh_shared(&priv_a, &pub_b).unwrap();
        let shared_b = crypto.dh_shared(&priv_b, &pub_a).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn dh_shared_rejects_degenerate_peer_key() {
        let crypto = SoftwareCrypto::new();
        let (private, _) = crypto.dh_generate().unwrap();
        let zero = [0u8; 192];
        assert_eq!(crypto.dh_shared(&private, &zero), Err(CryptoError::InvalidKey));
    }

    #[test]
    fn cbc_round_trip_and_chaining() {
        let crypto = SoftwareCrypto::new();
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plain = [0x5Au8; 48];
        let cipher = crypto.aes128_cbc_encrypt(&key, &iv, &plain).unwrap();
        assert_eq!(cipher.len(), plain.len());
        // Identical plaintext blocks must not produce identical ciphertext
        // blocks under CBC.
        assert_ne!(&cipher[..16], &cipher[16..32]);
        let back = crypto.aes128_cbc_decrypt(&key, &iv, &cipher).unwrap();
        assert_eq!(&back[..], &plain[..]);
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let crypto = SoftwareCrypto::new();
        let res = crypto.aes128_cbc_encrypt(&[0; 16], &[0; 16], &[1, 2, 3]);
        assert_eq!(res, Err(CryptoError::BlockAlignment));
    }
}
