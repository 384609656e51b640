// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide lockout policy. Someone repeatedly failing the handshake may
//! be guessing the PIN, so after too many rejected attempts the configuration
//! target locks and refuses further secret-dependent work until an explicit
//! operator reset or a successful run.
//!
//! The store is an explicit object shared behind a single lock rather than a
//! mutable global; sessions for different peers consult the same instance.

use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

/// Rejected attempts tolerated before the lock raises.
const FAILURE_LIMIT: u32 = 20;

#[derive(Debug)]
pub struct LockoutPolicy {
    failures: u32,
    locked: bool,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LockoutPolicy {
    pub fn new() -> Self {
        LockoutPolicy { failures: 0, locked: false }
    }

    /// Counts one rejected session or message. Never decrements.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.failures > FAILURE_LIMIT && !self.locked {
            self.locked = true;
            warn!(
                "locking WPS configuration after {} failed attempts; \
                 reset or a successful run is required to unlock",
                self.failures
            );
        }
    }

    /// Checked at session start, before any crypto work.
    pub fn locked(&mut self) -> bool {
        if self.failures > FAILURE_LIMIT {
            self.locked = true;
        }
        self.locked
    }

    /// Explicit operator reset or successful completion.
    pub fn clear(&mut self) {
        self.failures = 0;
        self.locked = false;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

pub type SharedLockoutPolicy = Arc<Mutex<LockoutPolicy>>;

pub fn new_shared() -> SharedLockoutPolicy {
    Arc::new(Mutex::new(LockoutPolicy::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_only_past_the_limit() {
        let mut policy = LockoutPolicy::new();
        for _ in 0..FAILURE_LIMIT {
            policy.record_failure();
        }
        assert!(!policy.locked());
        policy.record_failure();
        assert!(policy.locked());
    }

    #[test]
    fn clear_resets_counter_and_lock() {
        let mut policy = LockoutPolicy::new();
        for _ in 0..=FAILURE_LIMIT {
            policy.record_failure();
        }
        assert!(policy.locked());
        policy.clear();
        assert!(!policy.locked());
        assert_eq!(policy.failures(), 0);
    }
}
