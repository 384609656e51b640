// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Push-button-configuration conflict tracking. The push-button method has no
//! secret, so Wi-Fi Simple Configuration requires refusing a session when
//! probe requests from two different stations indicated the push-button
//! method within the monitor window; otherwise a bystander could race the
//! button press.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;

use crate::wsc::constants::{dev_pwd_id, size};
use crate::wsc::{Id, Message};

/// Fixed table size; sightings beyond this evict the oldest entry.
const TRACKED_STATIONS: usize = 8;

/// Two PBC stations within this window of each other are a conflict.
const MONITOR_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy)]
struct Sighting {
    addr: [u8; size::MAC_ADDR],
    seen: Instant,
}

/// Bounded table of recent push-button probe sightings.
#[derive(Debug, Default)]
pub struct PbcTracker {
    entries: [Option<Sighting>; TRACKED_STATIONS],
}

impl PbcTracker {
    pub fn new() -> Self {
        PbcTracker { entries: [None; TRACKED_STATIONS] }
    }

    /// Records a push-button probe sighting, refreshing an existing entry for
    /// the same station or evicting the least recently seen slot.
    pub fn note(&mut self, addr: [u8; size::MAC_ADDR], now: Instant) {
        if let Some(entry) =
            self.entries.iter_mut().flatten().find(|sighting| sighting.addr == addr)
        {
            entry.seen = now;
            return;
        }
        let slot = self
            .entries
            .iter_mut()
            .min_by_key(|entry| entry.map(|sighting| sighting.seen))
            .unwrap();
        *slot = Some(Sighting { addr, seen: now });
    }

    /// True if any *other* station was sighted within the monitor window.
    /// Consulted once, at push-button session start.
    pub fn conflicts(&self, addr: [u8; size::MAC_ADDR], now: Instant) -> bool {
        let mut conflict = false;
        let mut seen_self = false;
        for sighting in self.entries.iter().flatten() {
            if now.saturating_duration_since(sighting.seen) > MONITOR_WINDOW {
                continue;
            }
            if sighting.addr == addr {
                seen_self = true;
            } else {
                warn!("push button overlap with station {:02x?}", sighting.addr);
                conflict = true;
            }
        }
        if !seen_self {
            info!("no prior push-button probe seen from {:02x?}", addr);
        }
        conflict
    }

    /// Forgets a station after its session completed, allowing another
    /// station to configure right away.
    pub fn clear(&mut self, addr: [u8; size::MAC_ADDR]) {
        for entry in self.entries.iter_mut() {
            if matches!(entry, Some(sighting) if sighting.addr == addr) {
                *entry = None;
            }
        }
    }
}

pub type SharedPbcTracker = Arc<Mutex<PbcTracker>>;

pub fn new_shared() -> SharedPbcTracker {
    Arc::new(Mutex::new(PbcTracker::new()))
}

/// Scans the WSC information-element bytes of a probe request and records a
/// sighting when the station indicated the push-button method.
pub fn note_probe(
    tracker: &SharedPbcTracker,
    addr: [u8; size::MAC_ADDR],
    wsc_ie: &[u8],
    now: Instant,
) {
    let msg = match Message::parse(wsc_ie) {
        Ok(msg) => msg,
        Err(_) => return,
    };
    match msg.get_u16(Id::DEVICE_PWD_ID) {
        Some(Ok(dev_pwd_id::PUSH_BUTTON)) => tracker.lock().note(addr, now),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [u8; 6] = [1, 1, 1, 1, 1, 1];
    const B: [u8; 6] = [2, 2, 2, 2, 2, 2];

    #[test]
    fn same_station_is_not_a_conflict() {
        let mut tracker = PbcTracker::new();
        let now = Instant::now();
        tracker.note(A, now);
        assert!(!tracker.conflicts(A, now + Duration::from_secs(5)));
    }

    #[test]
    fn second_station_inside_window_conflicts() {
        let mut tracker = PbcTracker::new();
        let now = Instant::now();
        tracker.note(B, now);
        assert!(tracker.conflicts(A, now + Duration::from_secs(30)));
    }

    #[test]
    fn stale_sightings_expire() {
        let mut tracker = PbcTracker::new();
        let now = Instant::now();
        tracker.note(B, now);
        assert!(!tracker.conflicts(A, now + Duration::from_secs(121)));
    }

    #[test]
    fn clear_removes_station() {
        let mut tracker = PbcTracker::new();
        let now = Instant::now();
        tracker.note(B, now);
        tracker.clear(B);
        assert!(!tracker.conflicts(A, now + Duration::from_secs(1)));
    }

    #[test]
    fn table_evicts_oldest_when_full() {
        let mut tracker = PbcTracker::new();
        let base = Instant::now();
        for i in 0..TRACKED_STATIONS {
            tracker.note([i as u8; 6], base + Duration::from_secs(i as u64));
        }
        // One more sighting evicts the oldest ([0; 6]), keeping the rest.
        let later = base + Duration::from_secs(60);
        tracker.note([0xEE; 6], later);
        tracker.clear([0xEE; 6]);
        for i in 1..TRACKED_STATIONS {
            tracker.clear([i as u8; 6]);
        }
        assert!(!tracker.conflicts(A, later + Duration::from_secs(1)));
    }

    #[test]
    fn probe_scan_tracks_only_push_button() {
        let tracker = new_shared();
        let now = Instant::now();

        let mut pbc_probe = Message::new();
        pbc_probe.set_u16(Id::DEVICE_PWD_ID, dev_pwd_id::PUSH_BUTTON);
        note_probe(&tracker, B, &pbc_probe.write(), now);

        let mut pin_probe = Message::new();
        pin_probe.set_u16(Id::DEVICE_PWD_ID, dev_pwd_id::DEFAULT_PIN);
        note_probe(&tracker, A, &pin_probe.write(), now);

        let tracker = tracker.lock();
        assert!(tracker.conflicts(A, now + Duration::from_secs(1)));
        assert!(!tracker.conflicts(B, now + Duration::from_secs(1)));
    }
}
