// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Numeric assignments from the Wi-Fi Simple Configuration Technical
//! Specification. These values appear on the wire and must match bit-exact
//! for interoperability with third-party stations.

use super::Id;

// Wi-Fi Simple Configuration Technical Specification v2.0.5, Section 12,
// Table 28 (Data Element Definitions).
impl Id {
    pub const AP_SETUP_LOCKED: Id = Id(0x1057);
    pub const ASSOC_STATE: Id = Id(0x1002);
    pub const AUTH_TYPE_FLAGS: Id = Id(0x1004);
    pub const AUTHENTICATOR: Id = Id(0x1005);
    pub const CONFIG_METHODS: Id = Id(0x1008);
    pub const CONFIG_ERROR: Id = Id(0x1009);
    pub const CONN_TYPE_FLAGS: Id = Id(0x100D);
    pub const CREDENTIAL: Id = Id(0x100E);
    pub const DEVICE_NAME: Id = Id(0x1011);
    pub const DEVICE_PWD_ID: Id = Id(0x1012);
    pub const E_HASH1: Id = Id(0x1014);
    pub const E_HASH2: Id = Id(0x1015);
    pub const E_SNONCE1: Id = Id(0x1016);
    pub const E_SNONCE2: Id = Id(0x1017);
    pub const ENCR_SETTINGS: Id = Id(0x1018);
    pub const ENCR_TYPE_FLAGS: Id = Id(0x1010);
    pub const ENROLLEE_NONCE: Id = Id(0x101A);
    pub const KEY_WRAP_AUTH: Id = Id(0x101E);
    pub const MAC_ADDR: Id = Id(0x1020);
    pub const MANUFACTURER: Id = Id(0x1021);
    pub const MSG_TYPE: Id = Id(0x1022);
    pub const MODEL_NAME: Id = Id(0x1023);
    pub const MODEL_NUMBER: Id = Id(0x1024);
    pub const NW_INDEX: Id = Id(0x1026);
    pub const NW_KEY: Id = Id(0x1027);
    pub const OS_VERSION: Id = Id(0x102D);
    pub const PRIM_DEV_TYPE: Id = Id(0x1054);
    pub const PUBLIC_KEY: Id = Id(0x1032);
    pub const REGISTRAR_NONCE: Id = Id(0x1039);
    pub const RF_BANDS: Id = Id(0x103C);
    pub const R_HASH1: Id = Id(0x103D);
    pub const R_HASH2: Id = Id(0x103E);
    pub const R_SNONCE1: Id = Id(0x103F);
    pub const R_SNONCE2: Id = Id(0x1040);
    pub const SELECTED_REGISTRAR: Id = Id(0x1041);
    pub const SERIAL_NUMBER: Id = Id(0x1042);
    pub const SSID: Id = Id(0x1045);
    pub const UUID_E: Id = Id(0x1047);
    pub const UUID_R: Id = Id(0x1048);
    pub const VERSION: Id = Id(0x104A);
    pub const WPS_STATE: Id = Id(0x1044);
}

/// Protocol versions accepted on the wire.
pub const VERSION: u8 = 0x10;
pub const VERSION_EX: u8 = 0x20;

// Message Type values, Table 34.
pub mod msg_type {
    pub const M1: u8 = 0x04;
    pub const M2: u8 = 0x05;
    pub const M2D: u8 = 0x06;
    pub const M3: u8 = 0x07;
    pub const M4: u8 = 0x08;
    pub const M5: u8 = 0x09;
    pub const M6: u8 = 0x0A;
    pub const M7: u8 = 0x0B;
    pub const M8: u8 = 0x0C;
    pub const ACK: u8 = 0x0D;
    pub const NACK: u8 = 0x0E;
    pub const DONE: u8 = 0x0F;
}

// Device Password ID values, Table 37.
pub mod dev_pwd_id {
    pub const DEFAULT_PIN: u16 = 0x0000;
    pub const USER_SPECIFIED: u16 = 0x0001;
    pub const MACHINE_SPECIFIED: u16 = 0x0002;
    pub const REKEY: u16 = 0x0003;
    pub const PUSH_BUTTON: u16 = 0x0004;
    pub const REGISTRAR_SPECIFIED: u16 = 0x0005;
}

// Configuration Error values, Table 36.
pub mod config_error {
    pub const NO_ERROR: u16 = 0;
    pub const DECRYPTION_CRC_FAILURE: u16 = 3;
    pub const SIGNAL_TOO_WEAK: u16 = 8;
    pub const ROGUE_ACTIVITY_SUSPECTED: u16 = 9;
    pub const DEVICE_BUSY: u16 = 10;
    pub const SETUP_LOCKED: u16 = 15;
    pub const MESSAGE_TIMEOUT: u16 = 16;
    pub const REGISTRATION_SESSION_TIMEOUT: u16 = 17;
    pub const DEVICE_PASSWORD_AUTH_FAILURE: u16 = 18;
}

// Wi-Fi Protected Setup State values.
pub mod wps_state {
    pub const UNCONFIGURED: u8 = 0x01;
    pub const CONFIGURED: u8 = 0x02;
}

/// Fixed field widths, in octets.
pub mod size {
    pub const NONCE: usize = 16;
    pub const UUID: usize = 16;
    pub const MAC_ADDR: usize = 6;
    pub const PUB_KEY: usize = 192;
    pub const HASH: usize = 32;
    pub const AUTHENTICATOR: usize = 8;
    pub const KEY_WRAP_AUTH: usize = 8;
    pub const AUTH_KEY: usize = 32;
    pub const KEY_WRAP_KEY: usize = 16;
    pub const EMSK: usize = 32;
    pub const PRIM_DEV_TYPE: usize = 8;
    pub const BLOCK: usize = 16;
}
