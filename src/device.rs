// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Descriptor data supplied by the configuration collaborator: who this
//! device is, which secret is active, and what policy applies to the session.

use bitflags::bitflags;

use crate::session::Role;
use crate::wsc::constants::{dev_pwd_id, wps_state};

bitflags! {
    /// Authentication Type Flags attribute values.
    pub struct AuthTypeFlags: u16 {
        const OPEN = 0x0001;
        const WPA_PSK = 0x0002;
        const SHARED = 0x0004;
        const WPA = 0x0008;
        const WPA2 = 0x0010;
        const WPA2_PSK = 0x0020;
    }
}

bitflags! {
    /// Encryption Type Flags attribute values.
    pub struct EncrTypeFlags: u16 {
        const NONE = 0x0001;
        const WEP = 0x0002;
        const TKIP = 0x0004;
        const AES = 0x0008;
    }
}

bitflags! {
    /// Config Methods attribute values.
    pub struct ConfigMethods: u16 {
        const USBA = 0x0001;
        const ETHERNET = 0x0002;
        const LABEL = 0x0004;
        const DISPLAY = 0x0008;
        const EXTERNAL_NFC_TOKEN = 0x0010;
        const INTEGRATED_NFC_TOKEN = 0x0020;
        const NFC_INTERFACE = 0x0040;
        const PUSH_BUTTON = 0x0080;
        const KEYPAD = 0x0100;
    }
}

/// Whether this device already carries a network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Unconfigured,
    Configured,
}

impl ProvisioningState {
    pub fn to_wire(self) -> u8 {
        match self {
            ProvisioningState::Unconfigured => wps_state::UNCONFIGURED,
            ProvisioningState::Configured => wps_state::CONFIGURED,
        }
    }
}

/// Static device descriptor carried in M1/M2/M2D.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub version: u8,
    pub uuid: [u8; 16],
    pub mac: [u8; 6],
    pub auth_type_flags: AuthTypeFlags,
    pub encr_type_flags: EncrTypeFlags,
    pub conn_type_flags: u8,
    pub config_methods: ConfigMethods,
    pub manufacturer: String,
    pub model_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub primary_device_type: [u8; 8],
    pub device_name: String,
    pub rf_bands: u8,
    pub os_version: u32,
}

/// The shared secret: PIN digits, or the fixed all-zero push-button sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePassword {
    pub id: u16,
    pub value: Vec<u8>,
}

impl DevicePassword {
    pub fn pin(digits: impl Into<Vec<u8>>) -> Self {
        DevicePassword { id: dev_pwd_id::DEFAULT_PIN, value: digits.into() }
    }

    pub fn push_button() -> Self {
        DevicePassword { id: dev_pwd_id::PUSH_BUTTON, value: b"00000000".to_vec() }
    }

    pub fn is_push_button(&self) -> bool {
        self.id == dev_pwd_id::PUSH_BUTTON
    }
}

/// Everything the collaborator decides per session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    pub device: DeviceInfo,
    /// Active shared secret; a registrar without one answers M2D.
    pub password: Option<DevicePassword>,
    /// Serialized settings to serve: the credential(s) a registrar ships in
    /// M8, or the current AP settings an enrollee AP reports in M7.
    pub credential: Option<Vec<u8>>,
    pub provisioning_state: ProvisioningState,
    /// Whether a received credential may be applied to this device.
    pub allow_reconfiguration: bool,
    /// An external registrar is reachable; gates the proxy-only M2D states.
    pub external_registrar: bool,
}
