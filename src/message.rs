// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Builders and parsers for the registration protocol messages M1-M8 and the
//! special messages (ACK, NACK, DONE). Builders assemble attributes in the
//! fixed order the protocol prescribes and append the authenticator; parsers
//! validate version, message type, nonce echoes and the authenticator before
//! extracting anything into the session.
//!
//! The authenticator of every message except M1 and the specials covers the
//! exact serialized bytes of the previously received message followed by the
//! message being built with its own authenticator attribute absent; both
//! sides therefore keep the last message of each direction verbatim.

use crate::commitment;
use crate::encrypted_settings;
use crate::key_schedule;
use crate::session::Session;
use crate::wsc::constants::{msg_type, size, VERSION, VERSION_EX};
use crate::wsc::{Id, Message};
use crate::Error;

fn req_bytes<'a>(msg: &'a Message, id: Id) -> Result<&'a [u8], Error> {
    msg.get(id).ok_or(Error::MissingAttribute(id))
}

fn req_u8(msg: &Message, id: Id) -> Result<u8, Error> {
    Ok(msg.get_u8(id).ok_or(Error::MissingAttribute(id))??)
}

fn req_u16(msg: &Message, id: Id) -> Result<u16, Error> {
    Ok(msg.get_u16(id).ok_or(Error::MissingAttribute(id))??)
}

fn req_u32(msg: &Message, id: Id) -> Result<u32, Error> {
    Ok(msg.get_u32(id).ok_or(Error::MissingAttribute(id))??)
}

fn req_fixed<const N: usize>(msg: &Message, id: Id) -> Result<[u8; N], Error> {
    Ok(msg.get_fixed::<N>(id).ok_or(Error::MissingAttribute(id))??)
}

fn req_string(msg: &Message, id: Id) -> Result<String, Error> {
    Ok(String::from_utf8_lossy(req_bytes(msg, id)?).into_owned())
}

fn check_version(msg: &Message) -> Result<u8, Error> {
    let version = req_u8(msg, Id::VERSION)?;
    if version != VERSION && version != VERSION_EX {
        return Err(Error::VersionMismatch(version));
    }
    Ok(version)
}

fn check_msg_type(msg: &Message, want: u8) -> Result<(), Error> {
    let got = req_u8(msg, Id::MSG_TYPE)?;
    if got != want {
        return Err(Error::UnexpectedMessageType { got, want });
    }
    Ok(())
}

fn auth_key(s: &Session) -> Result<[u8; size::AUTH_KEY], Error> {
    Ok(s.keys.as_ref().ok_or(Error::KeysNotEstablished)?.auth_key)
}

fn key_wrap_key(s: &Session) -> Result<[u8; size::KEY_WRAP_KEY], Error> {
    Ok(s.keys.as_ref().ok_or(Error::KeysNotEstablished)?.key_wrap_key)
}

fn peer_pub_key(s: &Session) -> Result<[u8; size::PUB_KEY], Error> {
    Ok(**s.target.pub_key.as_ref().ok_or(Error::KeysNotEstablished)?)
}

fn fresh_nonce(s: &Session) -> Result<[u8; size::NONCE], Error> {
    let mut nonce = [0u8; size::NONCE];
    s.crypto.random_bytes(&mut nonce)?;
    Ok(nonce)
}

/// Generates a fresh DH keypair, zeroing and releasing any previous private
/// value first.
fn regenerate_dh(s: &mut Session) -> Result<(), Error> {
    if let Some(mut old) = s.dh_private.take() {
        for byte in old.iter_mut() {
            *byte = 0;
        }
    }
    let (private, public) = s.crypto.dh_generate()?;
    s.dh_private = Some(private);
    *s.pub_key = public;
    Ok(())
}

/// Appends the trailing authenticator and records the finished bytes as the
/// new `sent_msg`.
fn seal(s: &mut Session, msg: &mut Message) -> Result<Vec<u8>, Error> {
    let unsigned = msg.write();
    let key = auth_key(s)?;
    let mac = s.crypto.hmac_sha256(&key, &[&s.received_msg, &unsigned])?;
    msg.set(Id::AUTHENTICATOR, mac[..size::AUTHENTICATOR].to_vec());
    let bytes = msg.write();
    s.sent_msg = bytes.clone();
    Ok(bytes)
}

/// Records an authenticator-less message (M1, specials) as the new
/// `sent_msg`.
fn record_unsigned(s: &mut Session, msg: &Message) -> Vec<u8> {
    let bytes = msg.write();
    s.sent_msg = bytes.clone();
    bytes
}

/// Recomputes the received message's authenticator over our stored
/// `sent_msg` and the received bytes with the authenticator attribute
/// stripped. Mismatch is a hard reject.
fn validate_authenticator(s: &Session, msg: &Message) -> Result<(), Error> {
    let received: [u8; size::AUTHENTICATOR] = req_fixed(msg, Id::AUTHENTICATOR)?;
    let mut stripped = msg.clone();
    stripped.remove(Id::AUTHENTICATOR);
    let bytes = stripped.write();
    let key = auth_key(s)?;
    let expected = s.crypto.hmac_sha256(&key, &[&s.sent_msg, &bytes])?;
    if expected[..size::AUTHENTICATOR] != received[..] {
        return Err(Error::AuthenticatorMismatch);
    }
    Ok(())
}

fn check_nonce_echo(msg: &Message, id: Id, expected: &[u8; size::NONCE]) -> Result<(), Error> {
    let echoed: [u8; size::NONCE] = req_fixed(msg, id)?;
    if echoed != *expected {
        return Err(Error::NonceMismatch);
    }
    Ok(())
}

/// The descriptor block shared by M2 and M2D.
fn write_descriptor(s: &Session, msg: &mut Message) {
    let device = &s.cfg.device;
    msg.set_u16(Id::AUTH_TYPE_FLAGS, device.auth_type_flags.bits());
    msg.set_u16(Id::ENCR_TYPE_FLAGS, device.encr_type_flags.bits());
    msg.set_u8(Id::CONN_TYPE_FLAGS, device.conn_type_flags);
    msg.set_u16(Id::CONFIG_METHODS, device.config_methods.bits());
    msg.set(Id::MANUFACTURER, device.manufacturer.as_bytes().to_vec());
    msg.set(Id::MODEL_NAME, device.model_name.as_bytes().to_vec());
    msg.set(Id::MODEL_NUMBER, device.model_number.as_bytes().to_vec());
    msg.set(Id::SERIAL_NUMBER, device.serial_number.as_bytes().to_vec());
    msg.set(Id::PRIM_DEV_TYPE, device.primary_device_type.to_vec());
    msg.set(Id::DEVICE_NAME, device.device_name.as_bytes().to_vec());
    msg.set_u8(Id::RF_BANDS, device.rf_bands);
    msg.set_u16(Id::ASSOC_STATE, s.assoc_state);
    msg.set_u16(Id::CONFIG_ERROR, s.config_error);
}

fn read_descriptor(s: &mut Session, msg: &Message) -> Result<(), Error> {
    s.target.auth_type_flags = req_u16(msg, Id::AUTH_TYPE_FLAGS)?;
    s.target.encr_type_flags = req_u16(msg, Id::ENCR_TYPE_FLAGS)?;
    s.target.conn_type_flags = req_u8(msg, Id::CONN_TYPE_FLAGS)?;
    s.target.config_methods = req_u16(msg, Id::CONFIG_METHODS)?;
    s.target.manufacturer = req_string(msg, Id::MANUFACTURER)?;
    s.target.model_name = req_string(msg, Id::MODEL_NAME)?;
    s.target.model_number = req_string(msg, Id::MODEL_NUMBER)?;
    s.target.serial_number = req_string(msg, Id::SERIAL_NUMBER)?;
    s.target.primary_device_type = req_fixed(msg, Id::PRIM_DEV_TYPE)?;
    s.target.device_name = req_string(msg, Id::DEVICE_NAME)?;
    s.target.rf_bands = req_u8(msg, Id::RF_BANDS)?;
    s.target.assoc_state = req_u16(msg, Id::ASSOC_STATE)?;
    s.target.config_error = req_u16(msg, Id::CONFIG_ERROR)?;
    Ok(())
}

//
// Enrollee-built messages.
//

pub(crate) fn build_m1(s: &mut Session) -> Result<Vec<u8>, Error> {
    s.nonce = fresh_nonce(s)?;
    regenerate_dh(s)?;

    let mut msg = Message::new();
    let device = s.cfg.device.clone();
    msg.set_u8(Id::VERSION, device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M1);
    msg.set(Id::UUID_E, device.uuid.to_vec());
    msg.set(Id::MAC_ADDR, device.mac.to_vec());
    msg.set(Id::ENROLLEE_NONCE, s.nonce.to_vec());
    msg.set(Id::PUBLIC_KEY, s.pub_key.to_vec());
    msg.set_u16(Id::AUTH_TYPE_FLAGS, device.auth_type_flags.bits());
    msg.set_u16(Id::ENCR_TYPE_FLAGS, device.encr_type_flags.bits());
    msg.set_u8(Id::CONN_TYPE_FLAGS, device.conn_type_flags);
    msg.set_u16(Id::CONFIG_METHODS, device.config_methods.bits());
    msg.set_u8(Id::WPS_STATE, s.cfg.provisioning_state.to_wire());
    msg.set(Id::MANUFACTURER, device.manufacturer.as_bytes().to_vec());
    msg.set(Id::MODEL_NAME, device.model_name.as_bytes().to_vec());
    msg.set(Id::MODEL_NUMBER, device.model_number.as_bytes().to_vec());
    msg.set(Id::SERIAL_NUMBER, device.serial_number.as_bytes().to_vec());
    msg.set(Id::PRIM_DEV_TYPE, device.primary_device_type.to_vec());
    msg.set(Id::DEVICE_NAME, device.device_name.as_bytes().to_vec());
    msg.set_u8(Id::RF_BANDS, device.rf_bands);
    msg.set_u16(Id::ASSOC_STATE, s.assoc_state);
    msg.set_u16(Id::DEVICE_PWD_ID, s.dev_pwd_id);
    msg.set_u16(Id::CONFIG_ERROR, s.config_error);
    msg.set_u32(Id::OS_VERSION, device.os_version);

    Ok(record_unsigned(s, &msg))
}

pub(crate) fn build_m3(s: &mut Session) -> Result<Vec<u8>, Error> {
    if s.dev_pwd.is_empty() {
        return Err(Error::NoDevicePassword);
    }
    let key = auth_key(s)?;
    let peer_key = peer_pub_key(s)?;
    let own_key = *s.pub_key;

    // The Enrollee's public key occupies the first slot of both halves'
    // commitments.
    let password = s.dev_pwd.clone();
    let (half1, half2) = commitment::split_password(&password);
    let first = commitment::generate(&*s.crypto, &key, half1, &own_key, &peer_key)?;
    let second = commitment::generate(&*s.crypto, &key, half2, &own_key, &peer_key)?;
    s.psk1 = Some(first.psk);
    s.snonce1 = Some(first.secret_nonce);
    s.hash1 = Some(first.hash);
    s.psk2 = Some(second.psk);
    s.snonce2 = Some(second.secret_nonce);
    s.hash2 = Some(second.hash);

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M3);
    msg.set(Id::REGISTRAR_NONCE, s.target.nonce.to_vec());
    msg.set(Id::E_HASH1, first.hash.to_vec());
    msg.set(Id::E_HASH2, second.hash.to_vec());
    seal(s, &mut msg)
}

pub(crate) fn build_m5(s: &mut Session) -> Result<Vec<u8>, Error> {
    let snonce1 = s.snonce1.ok_or(Error::KeysNotEstablished)?;
    let encrypted = encrypted_settings::build(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        Some((Id::E_SNONCE1, &snonce1)),
        None,
    )?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M5);
    msg.set(Id::REGISTRAR_NONCE, s.target.nonce.to_vec());
    msg.set(Id::ENCR_SETTINGS, encrypted);
    seal(s, &mut msg)
}

pub(crate) fn build_m7(s: &mut Session) -> Result<Vec<u8>, Error> {
    let snonce2 = s.snonce2.ok_or(Error::KeysNotEstablished)?;
    let encrypted = encrypted_settings::build(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        Some((Id::E_SNONCE2, &snonce2)),
        s.config.as_deref(),
    )?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M7);
    msg.set(Id::REGISTRAR_NONCE, s.target.nonce.to_vec());
    msg.set(Id::ENCR_SETTINGS, encrypted);
    seal(s, &mut msg)
}

//
// Registrar-built messages.
//

pub(crate) fn build_m2(s: &mut Session) -> Result<Vec<u8>, Error> {
    s.nonce = fresh_nonce(s)?;
    regenerate_dh(s)?;

    // Keys are derived here, once the peer's public key and both nonces are
    // known; the authenticator below already uses them.
    let enrollee_mac = s.target.mac.ok_or(Error::MissingAttribute(Id::MAC_ADDR))?;
    let keys = key_schedule::compute_keys(
        &*s.crypto,
        s.dh_private.as_deref().ok_or(Error::KeysNotEstablished)?,
        &peer_pub_key(s)?,
        &s.target.nonce,
        &enrollee_mac,
        &s.nonce,
    )?;
    s.keys = Some(keys);

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M2);
    msg.set(Id::ENROLLEE_NONCE, s.target.nonce.to_vec());
    msg.set(Id::REGISTRAR_NONCE, s.nonce.to_vec());
    msg.set(Id::UUID_R, s.cfg.device.uuid.to_vec());
    msg.set(Id::PUBLIC_KEY, s.pub_key.to_vec());
    write_descriptor(s, &mut msg);
    msg.set_u16(Id::DEVICE_PWD_ID, s.dev_pwd_id);
    msg.set_u32(Id::OS_VERSION, s.cfg.device.os_version);
    seal(s, &mut msg)
}

pub(crate) fn build_m2d(s: &mut Session) -> Result<Vec<u8>, Error> {
    s.nonce = fresh_nonce(s)?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M2D);
    msg.set(Id::ENROLLEE_NONCE, s.target.nonce.to_vec());
    msg.set(Id::REGISTRAR_NONCE, s.nonce.to_vec());
    msg.set(Id::UUID_R, s.cfg.device.uuid.to_vec());
    write_descriptor(s, &mut msg);
    msg.set_u32(Id::OS_VERSION, s.cfg.device.os_version);
    Ok(record_unsigned(s, &msg))
}

pub(crate) fn build_m4(s: &mut Session) -> Result<Vec<u8>, Error> {
    if s.dev_pwd.is_empty() {
        return Err(Error::NoDevicePassword);
    }
    let key = auth_key(s)?;
    let peer_key = peer_pub_key(s)?;
    let own_key = *s.pub_key;

    // Same absolute order as the Enrollee side: its key first, ours second.
    let password = s.dev_pwd.clone();
    let (half1, half2) = commitment::split_password(&password);
    let first = commitment::generate(&*s.crypto, &key, half1, &peer_key, &own_key)?;
    let second = commitment::generate(&*s.crypto, &key, half2, &peer_key, &own_key)?;
    s.psk1 = Some(first.psk);
    s.snonce1 = Some(first.secret_nonce);
    s.hash1 = Some(first.hash);
    s.psk2 = Some(second.psk);
    s.snonce2 = Some(second.secret_nonce);
    s.hash2 = Some(second.hash);

    let encrypted = encrypted_settings::build(
        &*s.crypto,
        &key,
        &key_wrap_key(s)?,
        Some((Id::R_SNONCE1, &first.secret_nonce)),
        None,
    )?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M4);
    msg.set(Id::ENROLLEE_NONCE, s.target.nonce.to_vec());
    msg.set(Id::R_HASH1, first.hash.to_vec());
    msg.set(Id::R_HASH2, second.hash.to_vec());
    msg.set(Id::ENCR_SETTINGS, encrypted);
    seal(s, &mut msg)
}

pub(crate) fn build_m6(s: &mut Session) -> Result<Vec<u8>, Error> {
    let snonce2 = s.snonce2.ok_or(Error::KeysNotEstablished)?;
    let encrypted = encrypted_settings::build(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        Some((Id::R_SNONCE2, &snonce2)),
        None,
    )?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M6);
    msg.set(Id::ENROLLEE_NONCE, s.target.nonce.to_vec());
    msg.set(Id::ENCR_SETTINGS, encrypted);
    seal(s, &mut msg)
}

pub(crate) fn build_m8(s: &mut Session) -> Result<Vec<u8>, Error> {
    let credential = s.config.clone().ok_or(Error::NoCredential)?;
    let encrypted = encrypted_settings::build(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        None,
        Some(&credential[..]),
    )?;

    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, msg_type::M8);
    msg.set(Id::ENROLLEE_NONCE, s.target.nonce.to_vec());
    msg.set(Id::ENCR_SETTINGS, encrypted);
    seal(s, &mut msg)
}

/// ACK, NACK and DONE share one shape; a NACK additionally reports the
/// configuration error.
pub(crate) fn build_special(
    s: &mut Session,
    which: u8,
    e_nonce: [u8; size::NONCE],
    r_nonce: [u8; size::NONCE],
) -> Result<Vec<u8>, Error> {
    let mut msg = Message::new();
    msg.set_u8(Id::VERSION, s.cfg.device.version);
    msg.set_u8(Id::MSG_TYPE, which);
    msg.set(Id::ENROLLEE_NONCE, e_nonce.to_vec());
    msg.set(Id::REGISTRAR_NONCE, r_nonce.to_vec());
    if which == msg_type::NACK {
        msg.set_u16(Id::CONFIG_ERROR, s.config_error);
    }
    Ok(record_unsigned(s, &msg))
}

//
// Parsers. Each operates on `s.received_msg`, already reassembled.
//

pub(crate) fn parse_m1(s: &mut Session) -> Result<(), Error> {
    let result = parse_m1_inner(s);
    if result.is_err() {
        s.clear_target_info();
    }
    result
}

fn parse_m1_inner(s: &mut Session) -> Result<(), Error> {
    s.clear_target_info();
    let msg = Message::parse(&s.received_msg)?;
    s.target.version = check_version(&msg)?;
    check_msg_type(&msg, msg_type::M1)?;

    s.target.uuid = req_fixed(&msg, Id::UUID_E)?;
    s.target.mac = Some(req_fixed(&msg, Id::MAC_ADDR)?);
    s.target.nonce = req_fixed(&msg, Id::ENROLLEE_NONCE)?;
    s.target.pub_key = Some(Box::new(req_fixed(&msg, Id::PUBLIC_KEY)?));
    s.target.auth_type_flags = req_u16(&msg, Id::AUTH_TYPE_FLAGS)?;
    s.target.encr_type_flags = req_u16(&msg, Id::ENCR_TYPE_FLAGS)?;
    s.target.conn_type_flags = req_u8(&msg, Id::CONN_TYPE_FLAGS)?;
    s.target.config_methods = req_u16(&msg, Id::CONFIG_METHODS)?;
    s.target.manufacturer = req_string(&msg, Id::MANUFACTURER)?;
    s.target.model_name = req_string(&msg, Id::MODEL_NAME)?;
    s.target.model_number = req_string(&msg, Id::MODEL_NUMBER)?;
    s.target.serial_number = req_string(&msg, Id::SERIAL_NUMBER)?;
    s.target.primary_device_type = req_fixed(&msg, Id::PRIM_DEV_TYPE)?;
    s.target.device_name = req_string(&msg, Id::DEVICE_NAME)?;
    s.target.rf_bands = req_u8(&msg, Id::RF_BANDS)?;
    s.target.assoc_state = req_u16(&msg, Id::ASSOC_STATE)?;
    s.target.dev_pwd_id = req_u16(&msg, Id::DEVICE_PWD_ID)?;
    s.target.config_error = req_u16(&msg, Id::CONFIG_ERROR)?;
    s.target.os_version = req_u32(&msg, Id::OS_VERSION)?;
    Ok(())
}

/// The common half of M2/M2D processing: descriptor fields plus the enrollee
/// nonce echo.
fn parse_m2_m2d_common(s: &mut Session, msg: &Message) -> Result<(), Error> {
    s.target.version = check_version(msg)?;
    check_nonce_echo(msg, Id::ENROLLEE_NONCE, &s.nonce)?;
    s.target.nonce = req_fixed(msg, Id::REGISTRAR_NONCE)?;
    s.target.uuid = req_fixed(msg, Id::UUID_R)?;
    read_descriptor(s, msg)?;
    s.target.os_version = req_u32(msg, Id::OS_VERSION)?;
    Ok(())
}

/// Returns true when the registrar shipped a credential inside M2 and this
/// session can complete without the PIN proof rounds.
pub(crate) fn parse_m2(s: &mut Session) -> Result<bool, Error> {
    let result = parse_m2_inner(s);
    if result.is_err() {
        s.clear_target_info();
    }
    result
}

fn parse_m2_inner(s: &mut Session) -> Result<bool, Error> {
    s.clear_target_info();
    let msg = Message::parse(&s.received_msg)?;
    check_msg_type(&msg, msg_type::M2)?;
    parse_m2_m2d_common(s, &msg)?;

    s.target.pub_key = Some(Box::new(req_fixed(&msg, Id::PUBLIC_KEY)?));
    s.target.dev_pwd_id = req_u16(&msg, Id::DEVICE_PWD_ID)?;

    // Both nonces and the peer's public key are known; run the key schedule
    // before anything secret-dependent is checked.
    let keys = key_schedule::compute_keys(
        &*s.crypto,
        s.dh_private.as_deref().ok_or(Error::KeysNotEstablished)?,
        &peer_pub_key(s)?,
        &s.nonce,
        &s.cfg.device.mac,
        &s.target.nonce,
    )?;
    s.keys = Some(keys);

    validate_authenticator(s, &msg)?;

    if let Some(encrypted) = msg.get(Id::ENCR_SETTINGS) {
        let (_, remaining) = encrypted_settings::open(
            &*s.crypto,
            &auth_key(s)?,
            &key_wrap_key(s)?,
            encrypted,
            None,
        )?;
        s.target.config = Some(remaining);
        return Ok(true);
    }
    Ok(false)
}

pub(crate) fn parse_m2d(s: &mut Session) -> Result<(), Error> {
    let result = parse_m2d_inner(s);
    if result.is_err() {
        s.clear_target_info();
    }
    result
}

fn parse_m2d_inner(s: &mut Session) -> Result<(), Error> {
    s.clear_target_info();
    let msg = Message::parse(&s.received_msg)?;
    check_msg_type(&msg, msg_type::M2D)?;
    parse_m2_m2d_common(s, &msg)
}

pub(crate) fn parse_m3(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M3)?;
    check_nonce_echo(&msg, Id::REGISTRAR_NONCE, &s.nonce)?;
    let hash1 = req_fixed(&msg, Id::E_HASH1)?;
    let hash2 = req_fixed(&msg, Id::E_HASH2)?;
    validate_authenticator(s, &msg)?;
    s.target.hash1 = Some(hash1);
    s.target.hash2 = Some(hash2);
    Ok(())
}

pub(crate) fn parse_m4(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M4)?;
    check_nonce_echo(&msg, Id::ENROLLEE_NONCE, &s.nonce)?;
    let hash1 = req_fixed(&msg, Id::R_HASH1)?;
    let hash2 = req_fixed(&msg, Id::R_HASH2)?;

    let encrypted = req_bytes(&msg, Id::ENCR_SETTINGS)?;
    let (revealed, _) = encrypted_settings::open(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        encrypted,
        Some(Id::R_SNONCE1),
    )?;
    let r_snonce1 = revealed.ok_or(Error::MissingAttribute(Id::R_SNONCE1))?;

    validate_authenticator(s, &msg)?;
    s.target.hash1 = Some(hash1);
    s.target.hash2 = Some(hash2);

    // First half proof: recompute R-Hash1 from the revealed nonce and our
    // own psk1. Enrollee public key first.
    let psk1 = s.psk1.ok_or(Error::KeysNotEstablished)?;
    let ok = commitment::validate(
        &*s.crypto,
        &auth_key(s)?,
        &hash1,
        &r_snonce1,
        &psk1,
        &s.pub_key,
        &peer_pub_key(s)?,
    )?;
    if !ok {
        return Err(Error::HashMismatch);
    }
    Ok(())
}

pub(crate) fn parse_m5(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M5)?;
    check_nonce_echo(&msg, Id::REGISTRAR_NONCE, &s.nonce)?;

    let encrypted = req_bytes(&msg, Id::ENCR_SETTINGS)?;
    let (revealed, _) = encrypted_settings::open(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        encrypted,
        Some(Id::E_SNONCE1),
    )?;
    let e_snonce1 = revealed.ok_or(Error::MissingAttribute(Id::E_SNONCE1))?;

    validate_authenticator(s, &msg)?;

    let committed = s.target.hash1.ok_or(Error::KeysNotEstablished)?;
    let psk1 = s.psk1.ok_or(Error::KeysNotEstablished)?;
    let ok = commitment::validate(
        &*s.crypto,
        &auth_key(s)?,
        &committed,
        &e_snonce1,
        &psk1,
        &peer_pub_key(s)?,
        &s.pub_key,
    )?;
    if !ok {
        return Err(Error::HashMismatch);
    }
    Ok(())
}

pub(crate) fn parse_m6(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M6)?;
    check_nonce_echo(&msg, Id::ENROLLEE_NONCE, &s.nonce)?;

    let encrypted = req_bytes(&msg, Id::ENCR_SETTINGS)?;
    let (revealed, _) = encrypted_settings::open(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        encrypted,
        Some(Id::R_SNONCE2),
    )?;
    let r_snonce2 = revealed.ok_or(Error::MissingAttribute(Id::R_SNONCE2))?;

    validate_authenticator(s, &msg)?;

    let committed = s.target.hash2.ok_or(Error::KeysNotEstablished)?;
    let psk2 = s.psk2.ok_or(Error::KeysNotEstablished)?;
    let ok = commitment::validate(
        &*s.crypto,
        &auth_key(s)?,
        &committed,
        &r_snonce2,
        &psk2,
        &s.pub_key,
        &peer_pub_key(s)?,
    )?;
    if !ok {
        return Err(Error::HashMismatch);
    }
    Ok(())
}

pub(crate) fn parse_m7(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M7)?;
    check_nonce_echo(&msg, Id::REGISTRAR_NONCE, &s.nonce)?;

    let encrypted = req_bytes(&msg, Id::ENCR_SETTINGS)?;
    let (revealed, remaining) = encrypted_settings::open(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        encrypted,
        Some(Id::E_SNONCE2),
    )?;
    let e_snonce2 = revealed.ok_or(Error::MissingAttribute(Id::E_SNONCE2))?;

    validate_authenticator(s, &msg)?;

    let committed = s.target.hash2.ok_or(Error::KeysNotEstablished)?;
    let psk2 = s.psk2.ok_or(Error::KeysNotEstablished)?;
    let ok = commitment::validate(
        &*s.crypto,
        &auth_key(s)?,
        &committed,
        &e_snonce2,
        &psk2,
        &peer_pub_key(s)?,
        &s.pub_key,
    )?;
    if !ok {
        return Err(Error::HashMismatch);
    }
    // The enrollee's current settings ride along with the second nonce.
    s.target.config = Some(remaining);
    Ok(())
}

pub(crate) fn parse_m8(s: &mut Session) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, msg_type::M8)?;
    check_nonce_echo(&msg, Id::ENROLLEE_NONCE, &s.nonce)?;

    let encrypted = req_bytes(&msg, Id::ENCR_SETTINGS)?;
    let (_, remaining) = encrypted_settings::open(
        &*s.crypto,
        &auth_key(s)?,
        &key_wrap_key(s)?,
        encrypted,
        None,
    )?;

    validate_authenticator(s, &msg)?;
    s.target.config = Some(remaining);
    Ok(())
}

pub(crate) fn parse_special(
    s: &mut Session,
    which: u8,
    e_nonce: [u8; size::NONCE],
    r_nonce: [u8; size::NONCE],
) -> Result<(), Error> {
    let msg = Message::parse(&s.received_msg)?;
    check_version(&msg)?;
    check_msg_type(&msg, which)?;
    check_nonce_echo(&msg, Id::ENROLLEE_NONCE, &e_nonce)?;
    check_nonce_echo(&msg, Id::REGISTRAR_NONCE, &r_nonce)?;
    if which == msg_type::NACK {
        s.target.config_error = req_u16(&msg, Id::CONFIG_ERROR)?;
    }
    Ok(())
}
