// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The registration protocol state machine. One transition surface, matched
//! on (role, state, message), drives both the Registrar and the Enrollee
//! paths; the proxy detour (M2D1/M2D2) is reachable only when the
//! external-registrar capability is present.
//!
//! Expected adversarial conditions (bad authenticator, failed PIN proof,
//! malformed attributes) never abort the process: the session transitions to
//! NACK, reports through the update sink, and the next build emits the NACK
//! message. Only a failing crypto primitive aborts the session outright.

use log::{debug, error, info, warn};

use crate::message;
use crate::session::{Role, Session, State, MAX_REASSEMBLED_LEN};
use crate::wsc::constants::{config_error, msg_type};
use crate::wsc::{Id, Message};
use crate::{Error, SessionUpdate, UpdateSink};

/// Operation kind of an outbound frame, mapped by the enclosing EAP method
/// onto its op-code field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Start,
    Msg,
    Ack,
    Nack,
    Done,
    /// Zero-length acknowledgment of a non-final inbound fragment.
    FragmentAck,
}

#[derive(Debug, PartialEq)]
pub struct Outbound {
    pub op: OpCode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The exchange continues; ask for the next outbound frame.
    Continue,
    /// A non-final fragment was buffered; acknowledge it.
    FragmentAck,
    /// The session reached its terminal state and can be dropped.
    Finished,
}

/// Position in the fixed message sequence, for "has the PIN been proven yet"
/// comparisons.
fn ordinal(state: State) -> u8 {
    match state {
        State::Start => 0,
        State::M1 => 1,
        State::M2 => 2,
        State::M2d1 => 3,
        State::M2d2 => 4,
        State::M3 => 5,
        State::M4 => 6,
        State::M5 => 7,
        State::M6 => 8,
        State::M7 => 9,
        State::M8 => 10,
        State::Done => 11,
        State::Ack => 12,
        State::Nack => 13,
        State::Failure => 14,
    }
}

fn peek_msg_type(bytes: &[u8]) -> Option<u8> {
    let msg = Message::parse(bytes).ok()?;
    msg.get_u8(Id::MSG_TYPE)?.ok()
}

impl Session {
    /// Feeds one received EAP payload into the session. Non-final fragments
    /// are buffered and acknowledged; the assembled message drives a state
    /// transition once complete.
    pub fn process_inbound(
        &mut self,
        update_sink: &mut UpdateSink,
        bytes: &[u8],
        more_fragments: bool,
    ) -> Result<Outcome, Error> {
        if self.state == State::Failure {
            debug!("ignoring inbound payload on finished session");
            return Ok(Outcome::Finished);
        }

        if !self.fragment_pending {
            self.fragments.clear();
        }
        if self.fragments.len() + bytes.len() > MAX_REASSEMBLED_LEN {
            self.fragments.clear();
            self.fragment_pending = false;
            return Ok(self.reject(update_sink, Error::PayloadTooLarge));
        }
        self.fragments.extend_from_slice(bytes);
        if more_fragments {
            self.fragment_pending = true;
            return Ok(Outcome::FragmentAck);
        }
        self.fragment_pending = false;
        self.received_msg = std::mem::take(&mut self.fragments);

        // A NACK can arrive in place of whatever we were waiting for. It only
        // counts towards lockout while the PIN proof is still incomplete; a
        // peer that already proved possession is not guessing.
        if peek_msg_type(&self.received_msg) == Some(msg_type::NACK)
            && self.state != State::Nack
        {
            if ordinal(self.state) < ordinal(State::M7) {
                self.policy.lock().record_failure();
            }
            self.state = State::Nack;
        }

        let result = match self.role() {
            Role::Registrar => self.process_registrar(update_sink),
            Role::Enrollee => self.process_enrollee(update_sink),
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err @ Error::Crypto(_)) => {
                self.fail_terminal(update_sink, err.to_string());
                Err(err)
            }
            Err(err) => Ok(self.reject(update_sink, err)),
        }
    }

    /// Builds the next outbound frame for the current state. The frame bytes
    /// become the stored `sent_msg`; a forced resend must replay them
    /// verbatim rather than rebuild, since the peer validates the next
    /// authenticator against exactly these bytes.
    pub fn build_outbound(&mut self, update_sink: &mut UpdateSink) -> Result<Outbound, Error> {
        if self.fragment_pending {
            return Ok(Outbound { op: OpCode::FragmentAck, payload: vec![] });
        }
        let result = match self.role() {
            Role::Registrar => self.build_registrar(update_sink),
            Role::Enrollee => self.build_enrollee(update_sink),
        };
        match result {
            Ok(out) => {
                debug!("built {:?} frame, now in state {:?}", out.op, self.state);
                Ok(out)
            }
            Err(err) => {
                error!("failed to build outbound message: {}", err);
                self.fail_terminal(update_sink, err.to_string());
                Err(err)
            }
        }
    }

    /// The transport's timeout handling; accepted from any state.
    pub fn force_timeout(&mut self, update_sink: &mut UpdateSink) {
        if self.state == State::Failure {
            return;
        }
        info!("session timed out in state {:?}", self.state);
        self.config_error = config_error::MESSAGE_TIMEOUT;
        self.fail_terminal(update_sink, Error::Timeout.to_string());
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Failure
    }

    /// Hands the session a message produced by the external registrar. Only
    /// meaningful for a proxying registrar-role session.
    pub fn supply_external_message(&mut self, reply: Vec<u8>) -> Result<(), Error> {
        if self.role() != Role::Registrar || !self.cfg.external_registrar {
            return Err(Error::NoExternalRegistrar);
        }
        self.external_reply = Some(reply);
        self.state = State::M2d2;
        Ok(())
    }

    fn process_registrar(&mut self, update_sink: &mut UpdateSink) -> Result<Outcome, Error> {
        match self.state {
            State::M1 => {
                message::parse_m1(self)?;
                if self.cfg.external_registrar {
                    update_sink
                        .push(SessionUpdate::ProxyToExternalRegistrar(self.received_msg.clone()));
                    self.state = State::M2d1;
                } else if !self.dev_pwd.is_empty() {
                    self.state = State::M2;
                } else {
                    // No usable secret; answer with the discovery variant.
                    self.state = State::M2d1;
                }
                Ok(Outcome::Continue)
            }
            State::M3 => {
                message::parse_m3(self)?;
                self.state = State::M4;
                Ok(Outcome::Continue)
            }
            State::M5 => {
                message::parse_m5(self)?;
                self.state = State::M6;
                Ok(Outcome::Continue)
            }
            State::M7 => {
                message::parse_m7(self)?;
                self.state = State::M8;
                Ok(Outcome::Continue)
            }
            State::Done => {
                let e_nonce = self.target.nonce;
                let r_nonce = self.nonce;
                message::parse_special(self, msg_type::DONE, e_nonce, r_nonce)?;
                self.success_clear();
                update_sink.push(SessionUpdate::Success);
                if self.autoconfig {
                    if let Some(config) = self.config.clone() {
                        update_sink.push(SessionUpdate::SelfConfigure(config));
                    }
                }
                // The registration succeeded; the EAP conversation still
                // terminates as failure, so the terminal state is shared.
                self.clear_key_material();
                self.state = State::Failure;
                Ok(Outcome::Finished)
            }
            State::Ack => {
                let e_nonce = self.target.nonce;
                let r_nonce = self.nonce;
                match message::parse_special(self, msg_type::ACK, e_nonce, r_nonce) {
                    Ok(()) if self.cfg.external_registrar => {
                        // The peer acknowledged our relayed M2D; return to the
                        // discovery state until the registrar answers.
                        info!("M2D acknowledged, awaiting external registrar");
                        self.state = State::M2d1;
                        Ok(Outcome::Continue)
                    }
                    Ok(()) => {
                        self.fail_terminal(
                            update_sink,
                            "session ended after M2D discovery".to_string(),
                        );
                        Ok(Outcome::Finished)
                    }
                    Err(err) => {
                        warn!("malformed ACK: {}", err);
                        self.fail_terminal(update_sink, err.to_string());
                        Ok(Outcome::Finished)
                    }
                }
            }
            State::Nack => {
                let e_nonce = self.target.nonce;
                let r_nonce = self.nonce;
                let reason =
                    match message::parse_special(self, msg_type::NACK, e_nonce, r_nonce) {
                        Ok(()) => format!(
                            "peer NACK, configuration error {}",
                            self.target.config_error
                        ),
                        Err(err) => format!("malformed NACK: {}", err),
                    };
                self.fail_terminal(update_sink, reason);
                Ok(Outcome::Finished)
            }
            state => {
                // Most likely a resend of a message we already answered, e.g.
                // an impatient enrollee repeating M1 while we wait for the
                // external registrar. No harm in ignoring it.
                debug!("registrar ignoring inbound message in state {:?}", state);
                Ok(Outcome::Continue)
            }
        }
    }

    fn process_enrollee(&mut self, update_sink: &mut UpdateSink) -> Result<Outcome, Error> {
        match self.state {
            State::M2 => {
                match message::parse_m2(self) {
                    Ok(with_config) => {
                        if with_config {
                            // The registrar shipped the credential inside M2;
                            // skip the proof rounds and confirm.
                            self.success_clear();
                            self.state = State::Done;
                        } else {
                            self.state = State::M3;
                        }
                        Ok(Outcome::Continue)
                    }
                    Err(Error::UnexpectedMessageType { got: msg_type::M2D, .. }) => {
                        message::parse_m2d(self)?;
                        // Discovery answer only; not a failed secret proof.
                        info!("received M2D, no registrar holds our password");
                        self.state = State::Nack;
                        Ok(Outcome::Continue)
                    }
                    Err(err) => Err(err),
                }
            }
            State::M4 => {
                message::parse_m4(self)?;
                self.state = State::M5;
                Ok(Outcome::Continue)
            }
            State::M6 => {
                message::parse_m6(self)?;
                self.state = State::M7;
                Ok(Outcome::Continue)
            }
            State::M8 => {
                message::parse_m8(self)?;
                if self.may_reconfigure() {
                    self.success_clear();
                    self.state = State::Done;
                } else {
                    warn!("received new configuration but applying it is disallowed");
                    self.state = State::Nack;
                }
                Ok(Outcome::Continue)
            }
            State::Ack => {
                let e_nonce = self.nonce;
                let r_nonce = self.target.nonce;
                match message::parse_special(self, msg_type::ACK, e_nonce, r_nonce) {
                    Ok(()) => {
                        match self.target.config.take() {
                            Some(config) if self.may_reconfigure() => {
                                update_sink.push(SessionUpdate::ApplyConfig(config));
                                update_sink.push(SessionUpdate::Success);
                                self.success_clear();
                            }
                            Some(_) => {
                                update_sink.push(SessionUpdate::Failed {
                                    reason: "self-configuration disallowed".to_string(),
                                });
                            }
                            None => {
                                update_sink.push(SessionUpdate::Failed {
                                    reason: "no configuration received".to_string(),
                                });
                            }
                        }
                        self.clear_key_material();
                        self.state = State::Failure;
                        Ok(Outcome::Finished)
                    }
                    Err(err) => {
                        warn!("malformed ACK: {}", err);
                        self.fail_terminal(update_sink, err.to_string());
                        Ok(Outcome::Finished)
                    }
                }
            }
            State::Nack => {
                let e_nonce = self.nonce;
                let r_nonce = self.target.nonce;
                let reason =
                    match message::parse_special(self, msg_type::NACK, e_nonce, r_nonce) {
                        Ok(()) => format!(
                            "peer NACK, configuration error {}",
                            self.target.config_error
                        ),
                        Err(err) => format!("malformed NACK: {}", err),
                    };
                self.fail_terminal(update_sink, reason);
                Ok(Outcome::Finished)
            }
            state => {
                debug!("enrollee ignoring inbound message in state {:?}", state);
                Ok(Outcome::Continue)
            }
        }
    }

    fn build_registrar(&mut self, update_sink: &mut UpdateSink) -> Result<Outbound, Error> {
        match self.state {
            State::Start => {
                self.state = State::M1;
                Ok(Outbound { op: OpCode::Start, payload: vec![] })
            }
            State::M2 => {
                let payload = message::build_m2(self)?;
                self.state = State::M3;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M2d1 => {
                let payload = message::build_m2d(self)?;
                update_sink.push(SessionUpdate::PinRequested);
                self.state = State::Ack;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M2d2 => self.build_external_reply(),
            State::M4 => {
                let payload = message::build_m4(self)?;
                self.state = State::M5;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M6 => {
                let payload = message::build_m6(self)?;
                self.state = State::M7;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M8 => {
                let payload = message::build_m8(self)?;
                // The peer holds everything it needs; a guesser never gets
                // here, so the lockout counter resets.
                self.success_clear();
                self.state = State::Done;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::Nack => {
                let e_nonce = self.target.nonce;
                let r_nonce = self.nonce;
                let payload = message::build_special(self, msg_type::NACK, e_nonce, r_nonce)?;
                Ok(Outbound { op: OpCode::Nack, payload })
            }
            state => {
                warn!("registrar has nothing to build in state {:?}, sending NACK", state);
                self.policy.lock().record_failure();
                let e_nonce = self.target.nonce;
                let r_nonce = self.nonce;
                let payload = message::build_special(self, msg_type::NACK, e_nonce, r_nonce)?;
                self.state = State::Nack;
                Ok(Outbound { op: OpCode::Nack, payload })
            }
        }
    }

    fn build_enrollee(&mut self, _update_sink: &mut UpdateSink) -> Result<Outbound, Error> {
        match self.state {
            State::Start => {
                let payload = message::build_m1(self)?;
                self.state = State::M2;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M3 => {
                let payload = message::build_m3(self)?;
                self.state = State::M4;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M5 => {
                let payload = message::build_m5(self)?;
                self.state = State::M6;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::M7 => {
                let payload = message::build_m7(self)?;
                self.state = State::M8;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            State::Done => {
                self.success_clear();
                let e_nonce = self.nonce;
                let r_nonce = self.target.nonce;
                let payload = message::build_special(self, msg_type::DONE, e_nonce, r_nonce)?;
                self.state = State::Ack;
                Ok(Outbound { op: OpCode::Done, payload })
            }
            State::Nack => {
                let e_nonce = self.nonce;
                let r_nonce = self.target.nonce;
                let payload = message::build_special(self, msg_type::NACK, e_nonce, r_nonce)?;
                Ok(Outbound { op: OpCode::Nack, payload })
            }
            state => {
                warn!("enrollee has nothing to build in state {:?}, sending NACK", state);
                self.policy.lock().record_failure();
                let e_nonce = self.nonce;
                let r_nonce = self.target.nonce;
                let payload = message::build_special(self, msg_type::NACK, e_nonce, r_nonce)?;
                self.state = State::Nack;
                Ok(Outbound { op: OpCode::Nack, payload })
            }
        }
    }

    /// Replays the message handed over by the external registrar and follows
    /// whatever it was.
    fn build_external_reply(&mut self) -> Result<Outbound, Error> {
        let payload = match self.external_reply.take() {
            Some(reply) => reply,
            // A retransmit request before a new reply arrived: replay the
            // last relayed bytes verbatim.
            None if !self.sent_msg.is_empty() => self.sent_msg.clone(),
            None => {
                self.state = State::Failure;
                return Err(Error::NoExternalRegistrar);
            }
        };
        self.sent_msg = payload.clone();
        match peek_msg_type(&payload) {
            Some(msg_type::M2) => {
                self.state = State::M3;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            Some(msg_type::M2D) => {
                self.state = State::Ack;
                Ok(Outbound { op: OpCode::Msg, payload })
            }
            Some(msg_type::NACK) => {
                self.policy.lock().record_failure();
                self.state = State::Nack;
                Ok(Outbound { op: OpCode::Nack, payload })
            }
            other => {
                warn!("external registrar produced unexpected message {:?}", other);
                self.state = State::Failure;
                Err(Error::UnexpectedMessageType { got: other.unwrap_or(0), want: msg_type::M2 })
            }
        }
    }

    /// Reject path shared by every expected adversarial condition: count the
    /// failure, report, and answer with NACK on the next build.
    fn reject(&mut self, update_sink: &mut UpdateSink, err: Error) -> Outcome {
        warn!("rejecting message in state {:?}: {}", self.state, err);
        if let Error::HashMismatch = err {
            self.config_error = config_error::DEVICE_PASSWORD_AUTH_FAILURE;
        }
        self.policy.lock().record_failure();
        update_sink.push(SessionUpdate::Failed { reason: err.to_string() });
        self.state = State::Nack;
        Outcome::Continue
    }

    /// Terminal failure: report, zero key material, stop.
    fn fail_terminal(&mut self, update_sink: &mut UpdateSink, reason: String) {
        update_sink.push(SessionUpdate::Failed { reason });
        self.clear_key_material();
        self.state = State::Failure;
    }

    fn may_reconfigure(&self) -> bool {
        self.cfg.allow_reconfiguration
            || self.cfg.provisioning_state == crate::device::ProvisioningState::Unconfigured
    }

    /// Successful (sub)completion: the failure counter and the push-button
    /// sighting for this peer reset.
    fn success_clear(&mut self) {
        self.policy.lock().clear();
        if let Some(addr) = self.peer_addr {
            self.pbc.lock().clear(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::software::SoftwareCrypto;
    use crate::device::{
        AuthTypeFlags, ConfigMethods, DeviceInfo, DevicePassword, EncrTypeFlags,
        ProvisioningState, SessionConfig,
    };
    use crate::wsc::constants::VERSION;
    use crate::{pbc, policy};
    use assert_matches::assert_matches;
    use std::time::Instant;

    const PIN: &[u8] = b"12345670";
    const OTHER_PIN: &[u8] = b"00000018";
    const ENROLLEE_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const REGISTRAR_MAC: [u8; 6] = [0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB];

    fn device_info(mac: [u8; 6], name: &str) -> DeviceInfo {
        DeviceInfo {
            version: VERSION,
            uuid: [0xAB; 16],
            mac,
            auth_type_flags: AuthTypeFlags::OPEN | AuthTypeFlags::WPA2_PSK,
            encr_type_flags: EncrTypeFlags::NONE | EncrTypeFlags::AES,
            conn_type_flags: 0x01,
            config_methods: ConfigMethods::LABEL | ConfigMethods::PUSH_BUTTON,
            manufacturer: "test vendor".to_string(),
            model_name: name.to_string(),
            model_number: "1".to_string(),
            serial_number: "0001".to_string(),
            primary_device_type: [0x00, 0x06, 0x00, 0x50, 0xF2, 0x04, 0x00, 0x01],
            device_name: name.to_string(),
            rf_bands: 0x01,
            os_version: 0x8000_0000,
        }
    }

    fn credential_blob() -> Vec<u8> {
        let mut inner = Message::new();
        inner.set(Id::SSID, b"test-network".to_vec());
        inner.set(Id::NW_KEY, b"hunter2hunter2".to_vec());
        let mut outer = Message::new();
        outer.set(Id::CREDENTIAL, inner.write());
        outer.write()
    }

    struct Pair {
        enrollee: Session,
        registrar: Session,
        policy: policy::SharedLockoutPolicy,
    }

    fn make_pair(enrollee_pin: &[u8], registrar_pin: Option<&[u8]>) -> Pair {
        let shared_policy = policy::new_shared();
        let tracker = pbc::new_shared();
        let mut sink = vec![];

        let enrollee_cfg = SessionConfig {
            role: Role::Enrollee,
            device: device_info(ENROLLEE_MAC, "enrollee"),
            password: Some(DevicePassword::pin(enrollee_pin.to_vec())),
            credential: None,
            provisioning_state: ProvisioningState::Unconfigured,
            allow_reconfiguration: true,
            external_registrar: false,
        };
        let registrar_cfg = SessionConfig {
            role: Role::Registrar,
            device: device_info(REGISTRAR_MAC, "registrar"),
            password: registrar_pin.map(|pin| DevicePassword::pin(pin.to_vec())),
            credential: Some(credential_blob()),
            provisioning_state: ProvisioningState::Configured,
            allow_reconfiguration: false,
            external_registrar: false,
        };

        let enrollee = Session::new(
            enrollee_cfg,
            Box::new(SoftwareCrypto::new()),
            shared_policy.clone(),
            tracker.clone(),
            Some(REGISTRAR_MAC),
            Instant::now(),
            &mut sink,
        )
        .expect("enrollee session");
        let registrar = Session::new(
            registrar_cfg,
            Box::new(SoftwareCrypto::new()),
            shared_policy.clone(),
            tracker,
            Some(ENROLLEE_MAC),
            Instant::now(),
            &mut sink,
        )
        .expect("registrar session");
        Pair { enrollee, registrar, policy: shared_policy }
    }

    /// Pumps messages between the two sessions until the registrar finishes
    /// or `max_rounds` passes elapse. Returns both sinks.
    fn pump(pair: &mut Pair, max_rounds: usize) -> (UpdateSink, UpdateSink) {
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        // The registrar's EAP method opens the conversation with Start.
        let start = pair.registrar.build_outbound(&mut r_sink).expect("start frame");
        assert_eq!(start.op, OpCode::Start);

        for _ in 0..max_rounds {
            let from_enrollee = match pair.enrollee.build_outbound(&mut e_sink) {
                Ok(out) => out,
                Err(_) => break,
            };
            let outcome = pair
                .registrar
                .process_inbound(&mut r_sink, &from_enrollee.payload, false)
                .expect("registrar process");
            if outcome == Outcome::Finished {
                break;
            }
            let from_registrar = match pair.registrar.build_outbound(&mut r_sink) {
                Ok(out) => out,
                Err(_) => break,
            };
            let outcome = pair
                .enrollee
                .process_inbound(&mut e_sink, &from_registrar.payload, false)
                .expect("enrollee process");
            if outcome == Outcome::Finished {
                break;
            }
        }
        (e_sink, r_sink)
    }

    /// Hand-crafts the registrar-side ACK of the enrollee's DONE.
    fn ack_for(enrollee: &Session) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_u8(Id::VERSION, VERSION);
        msg.set_u8(Id::MSG_TYPE, msg_type::ACK);
        msg.set(Id::ENROLLEE_NONCE, enrollee.nonce.to_vec());
        msg.set(Id::REGISTRAR_NONCE, enrollee.target.nonce.to_vec());
        msg.write()
    }

    #[test]
    fn matching_pins_complete_and_deliver_the_credential() {
        let mut pair = make_pair(PIN, Some(PIN));
        let (mut e_sink, r_sink) = pump(&mut pair, 16);

        assert!(pair.registrar.is_done());
        assert!(r_sink.contains(&SessionUpdate::Success), "registrar updates: {:?}", r_sink);

        // The enrollee decrypted the credential out of M8 and sits in ACK
        // wait; the delivered bytes equal the injected configuration exactly.
        assert_eq!(pair.enrollee.state(), State::Ack);
        assert_eq!(pair.enrollee.target.config.as_deref(), Some(&credential_blob()[..]));

        // Registrar-side ACK releases the credential for application.
        let ack = ack_for(&pair.enrollee);
        let outcome =
            pair.enrollee.process_inbound(&mut e_sink, &ack, false).expect("process ack");
        assert_eq!(outcome, Outcome::Finished);
        assert!(e_sink.contains(&SessionUpdate::ApplyConfig(credential_blob())));
        assert!(e_sink.contains(&SessionUpdate::Success));
        assert_eq!(pair.policy.lock().failures(), 0);
    }

    #[test]
    fn wrong_pin_fails_before_any_m8() {
        let mut pair = make_pair(PIN, Some(OTHER_PIN));
        let (_, r_sink) = pump(&mut pair, 16);

        assert!(!r_sink.contains(&SessionUpdate::Success));
        assert!(r_sink
            .iter()
            .any(|update| matches!(update, SessionUpdate::Failed { .. })));
        // Neither side ever reached the credential states.
        assert_ne!(pair.registrar.state(), State::Done);
        assert!(pair.policy.lock().failures() > 0);
    }

    #[test]
    fn tampered_e_hash_forces_failure_without_m8() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        let start = pair.registrar.build_outbound(&mut r_sink).unwrap();
        assert_eq!(start.op, OpCode::Start);
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();
        let m2 = pair.registrar.build_outbound(&mut r_sink).unwrap();
        pair.enrollee.process_inbound(&mut e_sink, &m2.payload, false).unwrap();
        let m3 = pair.enrollee.build_outbound(&mut e_sink).unwrap();

        // Flip a single bit inside the E-Hash1 attribute value.
        let mut tampered = m3.payload.clone();
        let parsed = Message::parse(&tampered).unwrap();
        let hash = parsed.get(Id::E_HASH1).unwrap().to_vec();
        let offset = tampered
            .windows(hash.len())
            .position(|window| window == &hash[..])
            .expect("hash bytes present");
        tampered[offset] ^= 0x01;

        pair.registrar.process_inbound(&mut r_sink, &tampered, false).unwrap();
        assert_eq!(pair.registrar.state(), State::Nack);
        let nack = pair.registrar.build_outbound(&mut r_sink).unwrap();
        assert_eq!(nack.op, OpCode::Nack);
        assert!(r_sink.iter().any(|update| matches!(update, SessionUpdate::Failed { .. })));

        // The NACK travels back and both sides end in FAILURE; no valid M8
        // was ever produced on this session.
        let outcome =
            pair.enrollee.process_inbound(&mut e_sink, &nack.payload, false).unwrap();
        assert_eq!(outcome, Outcome::Finished);
        assert!(pair.enrollee.is_done());
        assert_ne!(pair.registrar.state(), State::M8);
        assert_ne!(pair.registrar.state(), State::Done);
    }

    #[test]
    fn version_mismatch_never_advances_state() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut r_sink = vec![];
        pair.registrar.build_outbound(&mut r_sink).unwrap(); // Start -> M1

        let mut msg = Message::new();
        msg.set_u8(Id::VERSION, 0x30);
        msg.set_u8(Id::MSG_TYPE, msg_type::M1);
        let outcome =
            pair.registrar.process_inbound(&mut r_sink, &msg.write(), false).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(pair.registrar.state(), State::Nack);
    }

    #[test]
    fn resent_message_is_ignored_without_state_change() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        pair.registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();
        assert_eq!(pair.registrar.state(), State::M2);

        // The enrollee got impatient and resent M1 before we answered.
        let outcome =
            pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(pair.registrar.state(), State::M2);
        assert!(r_sink.is_empty());
    }

    #[test]
    fn identically_resent_bytes_validate_again() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        pair.registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();
        let m2 = pair.registrar.build_outbound(&mut r_sink).unwrap();
        pair.enrollee.process_inbound(&mut e_sink, &m2.payload, false).unwrap();
        let m3 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m3.payload, false).unwrap();
        assert_eq!(pair.registrar.state(), State::M4);

        // Re-parse the identical bytes against the same stored sent_msg: the
        // authenticator must verify exactly as it did on first delivery.
        pair.registrar.state = State::M3;
        pair.registrar.received_msg = m3.payload.clone();
        crate::message::parse_m3(&mut pair.registrar).expect("resent M3 must validate");
    }

    #[test]
    fn m2d_flow_requests_pin_and_ends_without_counting() {
        let mut pair = make_pair(PIN, None);
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        pair.registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();
        assert_eq!(pair.registrar.state(), State::M2d1);

        let m2d = pair.registrar.build_outbound(&mut r_sink).unwrap();
        assert!(r_sink.contains(&SessionUpdate::PinRequested));
        pair.enrollee.process_inbound(&mut e_sink, &m2d.payload, false).unwrap();
        assert_eq!(pair.enrollee.state(), State::Nack);

        let nack = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        assert_eq!(nack.op, OpCode::Nack);
        let outcome =
            pair.registrar.process_inbound(&mut r_sink, &nack.payload, false).unwrap();
        assert_eq!(outcome, Outcome::Finished);
        assert!(pair.registrar.is_done());
        // A discovery-only exchange is not a PIN guess.
        assert_eq!(pair.policy.lock().failures(), 0);
    }

    #[test]
    fn lockout_refuses_new_sessions_and_clears_on_success() {
        let mut pair = make_pair(PIN, Some(PIN));
        for _ in 0..21 {
            pair.policy.lock().record_failure();
        }

        let mut sink = vec![];
        let refused = Session::new(
            SessionConfig {
                role: Role::Registrar,
                device: device_info(REGISTRAR_MAC, "registrar"),
                password: Some(DevicePassword::pin(PIN.to_vec())),
                credential: Some(credential_blob()),
                provisioning_state: ProvisioningState::Configured,
                allow_reconfiguration: false,
                external_registrar: false,
            },
            Box::new(SoftwareCrypto::new()),
            pair.policy.clone(),
            pbc::new_shared(),
            Some(ENROLLEE_MAC),
            Instant::now(),
            &mut sink,
        );
        assert_matches!(refused.err(), Some(Error::Locked));

        // A successful run on the existing pair clears the counter.
        let (_, r_sink) = pump(&mut pair, 16);
        assert!(r_sink.contains(&SessionUpdate::Success));
        assert_eq!(pair.policy.lock().failures(), 0);
        assert!(!pair.policy.lock().locked());
    }

    #[test]
    fn fragments_reassemble_and_are_acknowledged() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        pair.registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();

        let (head, tail) = m1.payload.split_at(m1.payload.len() / 2);
        let outcome = pair.registrar.process_inbound(&mut r_sink, head, true).unwrap();
        assert_eq!(outcome, Outcome::FragmentAck);
        let ack = pair.registrar.build_outbound(&mut r_sink).unwrap();
        assert_eq!(ack.op, OpCode::FragmentAck);
        assert!(ack.payload.is_empty());

        let outcome = pair.registrar.process_inbound(&mut r_sink, tail, false).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(pair.registrar.state(), State::M2);
    }

    #[test]
    fn force_timeout_fails_from_any_state() {
        let mut pair = make_pair(PIN, Some(PIN));
        let mut e_sink = vec![];
        let mut r_sink = vec![];

        pair.registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        pair.registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();

        pair.registrar.force_timeout(&mut r_sink);
        assert!(pair.registrar.is_done());
        assert!(r_sink.iter().any(|update| matches!(update, SessionUpdate::Failed { .. })));
        // Key material is gone.
        assert!(pair.registrar.dh_private.is_none());
        assert!(pair.registrar.keys.is_none());
    }

    #[test]
    fn external_registrar_gates_the_proxy_states() {
        let mut pair = make_pair(PIN, Some(PIN));
        // Proxy states are unreachable without the capability flag.
        assert_matches!(
            pair.registrar.supply_external_message(vec![]).err(),
            Some(Error::NoExternalRegistrar)
        );

        let mut sink = vec![];
        let mut registrar = Session::new(
            SessionConfig {
                role: Role::Registrar,
                device: device_info(REGISTRAR_MAC, "registrar"),
                password: Some(DevicePassword::pin(PIN.to_vec())),
                credential: Some(credential_blob()),
                provisioning_state: ProvisioningState::Configured,
                allow_reconfiguration: false,
                external_registrar: true,
            },
            Box::new(SoftwareCrypto::new()),
            policy::new_shared(),
            pbc::new_shared(),
            Some(ENROLLEE_MAC),
            Instant::now(),
            &mut sink,
        )
        .expect("registrar session");

        let mut e_sink = vec![];
        let mut r_sink = vec![];
        registrar.build_outbound(&mut r_sink).unwrap();
        let m1 = pair.enrollee.build_outbound(&mut e_sink).unwrap();
        registrar.process_inbound(&mut r_sink, &m1.payload, false).unwrap();

        // With an external registrar present, M1 is handed off even though a
        // local PIN exists.
        assert_eq!(registrar.state(), State::M2d1);
        assert!(r_sink
            .iter()
            .any(|update| matches!(update, SessionUpdate::ProxyToExternalRegistrar(_))));

        // The external registrar answers with an M2D; the session relays it
        // and waits for the peer's ACK.
        let mut m2d = Message::new();
        m2d.set_u8(Id::VERSION, VERSION);
        m2d.set_u8(Id::MSG_TYPE, msg_type::M2D);
        registrar.supply_external_message(m2d.write()).expect("supply proxy reply");
        assert_eq!(registrar.state(), State::M2d2);
        let relayed = registrar.build_outbound(&mut r_sink).unwrap();
        assert_eq!(relayed.op, OpCode::Msg);
        assert_eq!(relayed.payload, m2d.write());
        assert_eq!(registrar.state(), State::Ack);
    }

    #[test]
    fn pbc_conflict_refuses_session_start() {
        let shared_policy = policy::new_shared();
        let tracker = pbc::new_shared();
        let now = Instant::now();
        tracker.lock().note([9; 6], now);

        let mut sink = vec![];
        let refused = Session::new(
            SessionConfig {
                role: Role::Registrar,
                device: device_info(REGISTRAR_MAC, "registrar"),
                password: Some(DevicePassword::push_button()),
                credential: Some(credential_blob()),
                provisioning_state: ProvisioningState::Configured,
                allow_reconfiguration: false,
                external_registrar: false,
            },
            Box::new(SoftwareCrypto::new()),
            shared_policy,
            tracker,
            Some(ENROLLEE_MAC),
            now,
            &mut sink,
        );
        assert_matches!(refused.err(), Some(Error::PushButtonConflict));
        assert!(sink.contains(&SessionUpdate::PushButtonConflict));
        assert!(!sink.contains(&SessionUpdate::Ready));
    }
}
