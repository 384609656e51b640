// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability interface over the cryptographic primitives the protocol core
//! consumes. The core never implements a primitive itself; it calls through
//! this trait so that an embedder can supply a hardware or vendor
//! implementation. [`software`] provides a pure-software default.

pub mod software;

use thiserror::Error;

use crate::wsc::constants::size;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("random byte generation failed")]
    Entropy,
    #[error("mac computation failed")]
    Mac,
    #[error("block cipher failure")]
    Cipher,
    #[error("invalid Diffie-Hellman key")]
    InvalidKey,
    #[error("input is not a whole number of cipher blocks")]
    BlockAlignment,
}

/// All operations are fast and synchronous; any failure aborts the calling
/// session rather than falling back to a default key.
pub trait Crypto {
    /// Generates a Diffie-Hellman keypair over the fixed 1536-bit MODP group
    /// with generator 2. The public key is returned as a fixed-width
    /// 192-octet big-endian value, left-zero-padded if the numeric result is
    /// shorter.
    fn dh_generate(&self) -> Result<(Vec<u8>, [u8; size::PUB_KEY]), CryptoError>;

    /// Computes the shared secret `peer_public ^ private mod P`, normalized
    /// to the same fixed 192-octet width.
    fn dh_shared(
        &self,
        private: &[u8],
        peer_public: &[u8; size::PUB_KEY],
    ) -> Result<[u8; size::PUB_KEY], CryptoError>;

    /// SHA-256 over the concatenation of `parts`.
    fn sha256(&self, parts: &[&[u8]]) -> Result<[u8; 32], CryptoError>;

    /// HMAC-SHA-256 over the concatenation of `parts`.
    fn hmac_sha256(&self, key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptoError>;

    /// Raw AES-128-CBC over `data`, which must already be padded to a whole
    /// number of 16-octet blocks. Padding policy belongs to the caller.
    fn aes128_cbc_encrypt(
        &self,
        key: &[u8; size::KEY_WRAP_KEY],
        iv: &[u8; size::BLOCK],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn aes128_cbc_decrypt(
        &self,
        key: &[u8; size::KEY_WRAP_KEY],
        iv: &[u8; size::BLOCK],
        data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Fills `out` with cryptographically strong random bytes.
    fn random_bytes(&self, out: &mut [u8]) -> Result<(), CryptoError>;
}
