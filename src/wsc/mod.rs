// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! WSC attribute (TLV) codec. Attributes are carried as a 2-octet big-endian
//! identifier, a 2-octet big-endian length, and `length` octets of value.
//! This module knows nothing about protocol semantics: attribute order and
//! duplicates are preserved so that messages can be re-serialized to the
//! exact bytes an authenticator was computed over, and unknown identifiers
//! pass through untouched for forward compatibility and relay use.

pub mod constants;

use std::fmt;
use thiserror::Error;

/// WSC attribute identifier. Known assignments live in [`constants`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(pub u16);

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:#06x})", self.0)
    }
}

const HDR_LEN: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("buffer too short for attribute header or value")]
    Truncated,
    #[error("attribute {0:?} has unexpected length {1}")]
    UnexpectedLength(Id, usize),
    #[error("attribute {0:?} longer than its fixed width ({1} > {2})")]
    TooLong(Id, usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: Id,
    pub value: Vec<u8>,
}

/// An ordered sequence of attributes, as read from or written to the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    attrs: Vec<Attribute>,
}

impl Message {
    pub fn new() -> Self {
        Message { attrs: vec![] }
    }

    /// Walks `bytes` front to back. Fails with [`ParseError::Truncated`] if
    /// fewer than 4 octets remain for a header or fewer than `length` octets
    /// remain for a value; no attribute may exceed the remaining buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut attrs = vec![];
        let mut rest = bytes;
        while !rest.is_empty() {
            if rest.len() < HDR_LEN {
                return Err(ParseError::Truncated);
            }
            let id = Id(u16::from_be_bytes([rest[0], rest[1]]));
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            rest = &rest[HDR_LEN..];
            if rest.len() < len {
                return Err(ParseError::Truncated);
            }
            attrs.push(Attribute { id, value: rest[..len].to_vec() });
            rest = &rest[len..];
        }
        Ok(Message { attrs })
    }

    /// Serializes all attributes in insertion order.
    pub fn write(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        for attr in &self.attrs {
            buf.extend_from_slice(&attr.id.0.to_be_bytes());
            buf.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
            buf.extend_from_slice(&attr.value);
        }
        buf
    }

    /// Total serialized length. Reported for the transport's benefit; the
    /// codec itself does not enforce a payload limit.
    pub fn wire_len(&self) -> usize {
        self.attrs.iter().map(|a| HDR_LEN + a.value.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Appends an attribute. Repeated identifiers are kept; only
    /// `CREDENTIAL` legitimately repeats within one message, but relay paths
    /// must not lose duplicates either way.
    pub fn set(&mut self, id: Id, value: impl Into<Vec<u8>>) {
        self.attrs.push(Attribute { id, value: value.into() });
    }

    pub fn set_u8(&mut self, id: Id, value: u8) {
        self.set(id, value.to_be_bytes().to_vec());
    }

    pub fn set_u16(&mut self, id: Id, value: u16) {
        self.set(id, value.to_be_bytes().to_vec());
    }

    pub fn set_u32(&mut self, id: Id, value: u32) {
        self.set(id, value.to_be_bytes().to_vec());
    }

    /// Last occurrence wins when reading a scalar value.
    pub fn get(&self, id: Id) -> Option<&[u8]> {
        self.attrs.iter().rev().find(|a| a.id == id).map(|a| &a.value[..])
    }

    pub fn get_all<'a>(&'a self, id: Id) -> impl Iterator<Item = &'a [u8]> {
        self.attrs.iter().filter(move |a| a.id == id).map(|a| &a.value[..])
    }

    pub fn contains(&self, id: Id) -> bool {
        self.attrs.iter().any(|a| a.id == id)
    }

    pub fn get_u8(&self, id: Id) -> Option<Result<u8, ParseError>> {
        self.get(id).map(|v| match v {
            [b] => Ok(*b),
            _ => Err(ParseError::UnexpectedLength(id, v.len())),
        })
    }

    pub fn get_u16(&self, id: Id) -> Option<Result<u16, ParseError>> {
        self.get(id).map(|v| match v {
            [a, b] => Ok(u16::from_be_bytes([*a, *b])),
            _ => Err(ParseError::UnexpectedLength(id, v.len())),
        })
    }

    pub fn get_u32(&self, id: Id) -> Option<Result<u32, ParseError>> {
        self.get(id).map(|v| match v {
            [a, b, c, d] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(ParseError::UnexpectedLength(id, v.len())),
        })
    }

    /// Reads a fixed-width binary field (public key, nonce, hash). A value
    /// shorter than `N` is left-zero-padded to tolerate peers that strip the
    /// leading zero octets of a big-endian integer; a longer value is a hard
    /// reject.
    pub fn get_fixed<const N: usize>(&self, id: Id) -> Option<Result<[u8; N], ParseError>> {
        self.get(id).map(|v| {
            if v.len() > N {
                return Err(ParseError::TooLong(id, v.len(), N));
            }
            let mut out = [0u8; N];
            out[N - v.len()..].copy_from_slice(v);
            Ok(out)
        })
    }

    /// Removes every occurrence of `id`, returning the last value if any.
    pub fn remove(&mut self, id: Id) -> Option<Vec<u8>> {
        let last = self.attrs.iter().rev().find(|a| a.id == id).map(|a| a.value.clone());
        self.attrs.retain(|a| a.id != id);
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_buffer_is_empty_message() {
        let msg = Message::parse(&[]).expect("empty buffer must parse");
        assert!(msg.is_empty());
        assert_eq!(msg.write(), Vec::<u8>::new());
    }

    #[test]
    fn parse_write_round_trip_preserves_order_and_values() {
        let mut msg = Message::new();
        msg.set_u8(Id::VERSION, 0x10);
        msg.set_u8(Id::MSG_TYPE, constants::msg_type::M1);
        msg.set(Id::ENROLLEE_NONCE, vec![0xAA; 16]);
        msg.set(Id(0x2001), vec![1, 2, 3]); // unknown id passes through
        let bytes = msg.write();
        let reparsed = Message::parse(&bytes).expect("round trip must parse");
        assert_eq!(msg, reparsed);
        assert_eq!(bytes, reparsed.write());
    }

    #[test]
    fn truncated_header_rejected() {
        assert_matches!(Message::parse(&[0x10, 0x4A, 0x00]), Err(ParseError::Truncated));
    }

    #[test]
    fn truncated_value_rejected() {
        // Header promises 4 octets of value but only 2 remain.
        let bytes = [0x10, 0x4A, 0x00, 0x04, 0xDE, 0xAD];
        assert_matches!(Message::parse(&bytes), Err(ParseError::Truncated));
    }

    #[test]
    fn duplicate_reads_last_but_writes_all() {
        let mut msg = Message::new();
        msg.set_u8(Id::VERSION, 0x10);
        msg.set_u8(Id::VERSION, 0x20);
        assert_eq!(msg.get_u8(Id::VERSION), Some(Ok(0x20)));
        assert_eq!(msg.get_all(Id::VERSION).count(), 2);
        let reparsed = Message::parse(&msg.write()).unwrap();
        assert_eq!(reparsed.get_all(Id::VERSION).count(), 2);
    }

    #[test]
    fn fixed_width_short_value_left_padded() {
        let mut msg = Message::new();
        msg.set(Id::PUBLIC_KEY, vec![0x7F; 190]);
        let key = msg.get_fixed::<192>(Id::PUBLIC_KEY).unwrap().unwrap();
        assert_eq!(&key[..2], &[0, 0]);
        assert_eq!(&key[2..], &[0x7F; 190][..]);
    }

    #[test]
    fn fixed_width_long_value_rejected() {
        let mut msg = Message::new();
        msg.set(Id::ENROLLEE_NONCE, vec![0; 17]);
        assert_matches!(
            msg.get_fixed::<16>(Id::ENROLLEE_NONCE),
            Some(Err(ParseError::TooLong(Id::ENROLLEE_NONCE, 17, 16)))
        );
    }

    #[test]
    fn remove_strips_all_occurrences() {
        let mut msg = Message::new();
        msg.set_u8(Id::VERSION, 0x10);
        msg.set(Id::AUTHENTICATOR, vec![1; 8]);
        msg.set(Id::AUTHENTICATOR, vec![2; 8]);
        assert_eq!(msg.remove(Id::AUTHENTICATOR), Some(vec![2; 8]));
        assert!(!msg.contains(Id::AUTHENTICATOR));
        assert!(msg.contains(Id::VERSION));
    }

    #[test]
    fn scalar_width_mismatch_rejected() {
        let mut msg = Message::new();
        msg.set(Id::CONFIG_METHODS, vec![1, 2, 3]);
        assert_matches!(
            msg.get_u16(Id::CONFIG_METHODS),
            Some(Err(ParseError::UnexpectedLength(Id::CONFIG_METHODS, 3)))
        );
    }
}
