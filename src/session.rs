// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-conversation state. A [`Session`] is owned by exactly one EAP
//! conversation and only ever touched synchronously by the call delivering an
//! inbound message or requesting the next outbound one; the process-wide
//! stores it references serialize access behind their own locks.

use std::time::Instant;

use log::warn;

use crate::crypto::Crypto;
use crate::device::SessionConfig;
use crate::key_schedule::SessionKeys;
use crate::pbc::SharedPbcTracker;
use crate::policy::SharedLockoutPolicy;
use crate::wsc::constants::size;
use crate::{Error, SessionUpdate, UpdateSink};

/// Which side of the registration protocol we are playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Enrollee,
    Registrar,
}

/// Protocol position. The name is the message the session is waiting to
/// receive or about to build, depending on direction; `M2d1`/`M2d2` are the
/// discovery/proxy detour, and `Failure` is the single terminal state (the
/// enclosing EAP conversation always terminates as failure, success is
/// reported through events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    M1,
    M2,
    M2d1,
    M2d2,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    Done,
    Ack,
    Nack,
    Failure,
}

/// Everything learned about the peer from M1/M2/M2D.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub version: u8,
    pub uuid: [u8; size::UUID],
    pub mac: Option<[u8; size::MAC_ADDR]>,
    pub auth_type_flags: u16,
    pub encr_type_flags: u16,
    pub conn_type_flags: u8,
    pub config_methods: u16,
    pub wps_state: u8,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub primary_device_type: [u8; size::PRIM_DEV_TYPE],
    pub device_name: String,
    pub rf_bands: u8,
    pub assoc_state: u16,
    pub config_error: u16,
    pub os_version: u32,
    pub nonce: [u8; size::NONCE],
    pub pub_key: Option<Box<[u8; size::PUB_KEY]>>,
    pub dev_pwd_id: u16,
    pub hash1: Option<[u8; size::HASH]>,
    pub hash2: Option<[u8; size::HASH]>,
    /// Decrypted settings received from the peer (M2/M7/M8 payloads).
    pub config: Option<Vec<u8>>,
}

impl Default for TargetInfo {
    fn default() -> Self {
        TargetInfo {
            version: 0,
            uuid: [0; size::UUID],
            mac: None,
            auth_type_flags: 0,
            encr_type_flags: 0,
            conn_type_flags: 0,
            config_methods: 0,
            wps_state: 0,
            manufacturer: String::new(),
            model_name: String::new(),
            model_number: String::new(),
            serial_number: String::new(),
            primary_device_type: [0; size::PRIM_DEV_TYPE],
            device_name: String::new(),
            rf_bands: 0,
            assoc_state: 0,
            config_error: 0,
            os_version: 0,
            nonce: [0; size::NONCE],
            pub_key: None,
            dev_pwd_id: 0,
            hash1: None,
            hash2: None,
            config: None,
        }
    }
}

/// Cap on reassembled inbound payloads; the EAP layer fragments far below
/// this, so anything larger is a peer misbehaving.
pub(crate) const MAX_REASSEMBLED_LEN: usize = 64 * 1024;

pub struct Session {
    pub(crate) cfg: SessionConfig,
    pub(crate) crypto: Box<dyn Crypto>,
    pub(crate) policy: SharedLockoutPolicy,
    pub(crate) pbc: SharedPbcTracker,
    pub(crate) peer_addr: Option<[u8; size::MAC_ADDR]>,

    pub(crate) state: State,
    pub(crate) nonce: [u8; size::NONCE],
    pub(crate) pub_key: Box<[u8; size::PUB_KEY]>,
    pub(crate) dh_private: Option<Vec<u8>>,
    pub(crate) keys: Option<SessionKeys>,

    pub(crate) psk1: Option<[u8; 16]>,
    pub(crate) psk2: Option<[u8; 16]>,
    pub(crate) snonce1: Option<[u8; size::NONCE]>,
    pub(crate) snonce2: Option<[u8; size::NONCE]>,
    pub(crate) hash1: Option<[u8; size::HASH]>,
    pub(crate) hash2: Option<[u8; size::HASH]>,

    pub(crate) dev_pwd: Vec<u8>,
    pub(crate) dev_pwd_id: u16,

    pub(crate) assoc_state: u16,
    pub(crate) config_error: u16,

    /// Last serialized message in each direction; authenticators cover these
    /// exact bytes, so a resend must replay `sent_msg` verbatim.
    pub(crate) sent_msg: Vec<u8>,
    pub(crate) received_msg: Vec<u8>,

    /// Fragment reassembly buffer and the more-fragments latch.
    pub(crate) fragments: Vec<u8>,
    pub(crate) fragment_pending: bool,

    /// A message handed to us by the external registrar, pending relay.
    pub(crate) external_reply: Option<Vec<u8>>,

    /// We were unconfigured and are inventing the configuration we serve; on
    /// success it becomes our own.
    pub(crate) autoconfig: bool,
    /// Serialized settings to serve to the peer.
    pub(crate) config: Option<Vec<u8>>,

    pub(crate) target: TargetInfo,
}

impl Session {
    /// Creates a session for one peer conversation. Refuses with
    /// [`Error::Locked`] or [`Error::PushButtonConflict`] before any
    /// cryptographic work happens.
    pub fn new(
        cfg: SessionConfig,
        crypto: Box<dyn Crypto>,
        policy: SharedLockoutPolicy,
        pbc: SharedPbcTracker,
        peer_addr: Option<[u8; size::MAC_ADDR]>,
        now: Instant,
        update_sink: &mut UpdateSink,
    ) -> Result<Self, Error> {
        if policy.lock().locked() {
            warn!("refusing WPS session: configuration is locked");
            return Err(Error::Locked);
        }

        if cfg.password.as_ref().map_or(false, |pwd| pwd.is_push_button()) {
            let addr = match peer_addr {
                Some(addr) if addr != [0; size::MAC_ADDR] => addr,
                _ => {
                    warn!("push button session without a usable peer address");
                    return Err(Error::PushButtonConflict);
                }
            };
            if pbc.lock().conflicts(addr, now) {
                update_sink.push(SessionUpdate::PushButtonConflict);
                return Err(Error::PushButtonConflict);
            }
        }

        let (dev_pwd, dev_pwd_id) = match &cfg.password {
            Some(pwd) => (pwd.value.clone(), pwd.id),
            None => (vec![], 0),
        };
        let autoconfig = cfg.provisioning_state == crate::device::ProvisioningState::Unconfigured;
        let config = cfg.credential.clone();

        update_sink.push(SessionUpdate::Ready);
        Ok(Session {
            cfg,
            crypto,
            policy,
            pbc,
            peer_addr,
            state: State::Start,
            nonce: [0; size::NONCE],
            pub_key: Box::new([0; size::PUB_KEY]),
            dh_private: None,
            keys: None,
            psk1: None,
            psk2: None,
            snonce1: None,
            snonce2: None,
            hash1: None,
            hash2: None,
            dev_pwd,
            dev_pwd_id,
            assoc_state: 0,
            config_error: 0,
            sent_msg: vec![],
            received_msg: vec![],
            fragments: vec![],
            fragment_pending: false,
            external_reply: None,
            autoconfig,
            config,
            target: TargetInfo::default(),
        })
    }

    pub fn role(&self) -> Role {
        self.cfg.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The extended master session key, exported to the EAP layer once the
    /// key schedule ran.
    pub fn emsk(&self) -> Option<&[u8; size::EMSK]> {
        self.keys.as_ref().map(|keys| &keys.emsk)
    }

    /// Zeroes in-progress key material. Always called before the session is
    /// dropped on a failure path.
    pub(crate) fn clear_key_material(&mut self) {
        if let Some(private) = self.dh_private.as_mut() {
            for byte in private.iter_mut() {
                *byte = 0;
            }
        }
        self.dh_private = None;
        if let Some(keys) = self.keys.as_mut() {
            keys.zero();
        }
        self.keys = None;
        self.psk1 = None;
        self.psk2 = None;
        self.snonce1 = None;
        self.snonce2 = None;
        for byte in self.dev_pwd.iter_mut() {
            *byte = 0;
        }
    }

    pub(crate) fn clear_target_info(&mut self) {
        self.target = TargetInfo::default();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.clear_key_material();
    }
}
