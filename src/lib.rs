// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This crate implements the EAP-WPS (Wi-Fi Simple Configuration) registration
//! protocol as a transport-agnostic library: the WSC attribute (TLV) codec,
//! the M1-M8 message builders and parsers, the Diffie-Hellman key schedule,
//! the PIN-half hash commitments, the encrypted-settings container, and the
//! per-session state machine for both the Registrar and the Enrollee role.
//!
//! The enclosing EAP method owns framing, retransmits and timeouts; it feeds
//! received payload bytes into [`Session::process_inbound`] and ships whatever
//! [`Session::build_outbound`] returns. Cryptographic primitives are consumed
//! through the [`crypto::Crypto`] capability trait; a software implementation
//! backed by commonly used RustCrypto crates is provided in
//! [`crypto::software`].

pub mod commitment;
pub mod crypto;
pub mod device;
pub mod encrypted_settings;
pub mod fsm;
pub mod key_schedule;
mod message;
pub mod pbc;
pub mod pin;
pub mod policy;
pub mod session;
pub mod wsc;

use thiserror::Error;

pub use crate::device::{DeviceInfo, SessionConfig};
pub use crate::fsm::{OpCode, Outbound, Outcome};
pub use crate::session::{Role, Session, State};

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Parse(#[from] wsc::ParseError),
    #[error("unsupported protocol version {0:#04x}")]
    VersionMismatch(u8),
    #[error("unexpected message type {got:#04x} while waiting for {want:#04x}")]
    UnexpectedMessageType { got: u8, want: u8 },
    #[error("missing mandatory attribute {0:?}")]
    MissingAttribute(wsc::Id),
    #[error("encrypted settings container malformed")]
    MalformedEncryptedSettings,
    #[error("nonce echo does not match this session")]
    NonceMismatch,
    #[error("message authenticator mismatch")]
    AuthenticatorMismatch,
    #[error("device password proof (hash commitment) mismatch")]
    HashMismatch,
    #[error("no usable device password configured")]
    NoDevicePassword,
    #[error("message requires session keys that are not yet established")]
    KeysNotEstablished,
    #[error("no credential configured to serve")]
    NoCredential,
    #[error("no external registrar is active for this session")]
    NoExternalRegistrar,
    #[error("cryptographic backend failure: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("configuration locked after repeated failed attempts")]
    Locked,
    #[error("overlapping push button sessions detected")]
    PushButtonConflict,
    #[error("session timed out")]
    Timeout,
    #[error("reassembled payload exceeds the transport limit")]
    PayloadTooLarge,
}

/// Fire-and-forget notifications emitted while driving a session. The caller
/// owns the sink and drains it after each call; no response is expected.
#[derive(Debug, PartialEq)]
pub enum SessionUpdate {
    /// A session was admitted and is ready to exchange messages.
    Ready,
    /// The protocol run completed; the peer holds (or provided) the credential.
    Success,
    /// The session failed with a human-readable reason. No partial credential
    /// is ever exposed on this path.
    Failed { reason: String },
    /// A registrar answered with M2D because no usable device password is
    /// active; operator tooling should prompt for a PIN.
    PinRequested,
    /// A second station attempted push-button configuration within the
    /// monitor window.
    PushButtonConflict,
    /// A credential was received and local policy allows applying it.
    ApplyConfig(Vec<u8>),
    /// The credential just served to the peer should become our own
    /// configuration (the autoconfiguration path of an unconfigured
    /// registrar).
    SelfConfigure(Vec<u8>),
    /// An external registrar is active; the received message should be
    /// relayed to it. The reply comes back via
    /// [`Session::supply_external_message`].
    ProxyToExternalRegistrar(Vec<u8>),
}

/// Ordered sink for [`SessionUpdate`]s, in the manner of an RSNA update sink.
pub type UpdateSink = Vec<SessionUpdate>;
