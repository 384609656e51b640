// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device password (PIN) helpers: the weighted checksum carried in the last
//! digit of an 8-digit PIN, validation of operator-entered PINs, and
//! generation of fresh PINs and device password ids.

use crate::crypto::{Crypto, CryptoError};

/// Checksum over the first seven digits of an 8-digit PIN: weighted digit sum
/// (3, 1, 3, 1, ...) folded to a single decimal digit.
pub fn checksum(first_seven: u32) -> u8 {
    let tmp = first_seven * 10;
    let mut acc = 0u32;
    acc += 3 * ((tmp / 10_000_000) % 10);
    acc += 1 * ((tmp / 1_000_000) % 10);
    acc += 3 * ((tmp / 100_000) % 10);
    acc += 1 * ((tmp / 10_000) % 10);
    acc += 3 * ((tmp / 1_000) % 10);
    acc += 1 * ((tmp / 100) % 10);
    acc += 3 * ((tmp / 10) % 10);
    ((10 - (acc % 10)) % 10) as u8
}

/// Validates an operator-entered 8-digit PIN: all ASCII digits with a correct
/// trailing checksum digit.
pub fn validate(pin: &[u8]) -> bool {
    if pin.len() != 8 || !pin.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let value: u32 = match std::str::from_utf8(pin).ok().and_then(|s| s.parse().ok()) {
        Some(value) => value,
        None => return false,
    };
    checksum(value / 10) == (value % 10) as u8
}

/// Generates a random 8-digit PIN with a valid checksum digit.
pub fn generate(crypto: &dyn Crypto) -> Result<[u8; 8], CryptoError> {
    let mut raw = [0u8; 4];
    crypto.random_bytes(&mut raw)?;
    let first_seven = u32::from_be_bytes(raw) % 10_000_000;
    let pin = first_seven * 10 + checksum(first_seven) as u32;
    let mut out = [0u8; 8];
    let digits = format!("{:08}", pin);
    out.copy_from_slice(digits.as_bytes());
    Ok(out)
}

/// Generates a registrar-specified device password id (top bit set, low
/// nibble clear, leaving the reserved assignments untouched).
pub fn generate_password_id(crypto: &dyn Crypto) -> Result<u16, CryptoError> {
    let mut raw = [0u8; 2];
    crypto.random_bytes(&mut raw)?;
    Ok((u16::from_be_bytes(raw) | 0x8000) & 0xfff0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCrypto;

    #[test]
    fn known_pin_validates() {
        // 1234567 -> checksum 0.
        assert_eq!(checksum(1234567), 0);
        assert!(validate(b"12345670"));
    }

    #[test]
    fn wrong_checksum_rejected() {
        assert!(!validate(b"12345671"));
        assert!(!validate(b"12345678"));
    }

    #[test]
    fn malformed_pins_rejected() {
        assert!(!validate(b"1234567"));
        assert!(!validate(b"123456789"));
        assert!(!validate(b"1234567a"));
        assert!(!validate(b""));
    }

    #[test]
    fn generated_pins_validate() {
        let crypto = SoftwareCrypto::new();
        for _ in 0..32 {
            let pin = generate(&crypto).unwrap();
            assert!(validate(&pin), "generated PIN {:?} failed validation", pin);
        }
    }

    #[test]
    fn generated_password_ids_are_in_the_private_range() {
        let crypto = SoftwareCrypto::new();
        for _ in 0..32 {
            let id = generate_password_id(&crypto).unwrap();
            assert_eq!(id & 0x8000, 0x8000);
            assert_eq!(id & 0x000f, 0);
        }
    }
}
