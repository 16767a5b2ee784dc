// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! An alert receiver that latches what it saw.
//!
//! A [`Checkpoint`] stands in for an [`Alert`] anywhere one is expected; on
//! wake it records `signaled` plus the carried reason and forwards the wake
//! downstream (by default to the thread that created it). Because the wake of
//! a bare mailbox is consumed by whichever sleep happens to be running,
//! checkpoints are how a thread distinguishes — and does not lose — alerts
//! arriving from several sources. Clones share one latch.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::alert::{Alert, AlertTarget};
use crate::dispatch;
use crate::timeout::Timeout;

#[derive(Default)]
struct Latch {
    signaled: bool,
    reason: usize,
}

struct CheckpointState {
    forward: Alert,
    latch: Mutex<Latch>,
}

impl AlertTarget for CheckpointState {
    fn wake(&self, reason: Option<usize>) {
        {
            let mut latch = self.latch.lock();
            latch.signaled = true;
            if let Some(r) = reason {
                latch.reason = r;
            }
        }
        match reason {
            Some(r) => self.forward.wake_with(r),
            None => self.forward.wake(),
        }
    }
}

/// A latching, forwarding alert.
#[derive(Clone)]
pub struct Checkpoint {
    state: Arc<CheckpointState>,
}

impl Checkpoint {
    /// Catch alerts and forward them to the constructing thread.
    pub fn new() -> Self {
        Self::forward_to(Alert::this_thread())
    }

    /// Catch alerts and forward them to `target`.
    pub fn forward_to(target: Alert) -> Self {
        Self {
            state: Arc::new(CheckpointState {
                forward: target,
                latch: Mutex::new(Latch::default()),
            }),
        }
    }

    /// This checkpoint as a plain [`Alert`] handle.
    pub fn alert(&self) -> Alert {
        Alert::from_target(self.state.clone())
    }

    pub fn is_signaled(&self) -> bool {
        self.state.latch.lock().signaled
    }

    /// The reason carried by the latched alert; zero when none was supplied.
    pub fn reason(&self) -> usize {
        self.state.latch.lock().reason
    }

    /// Clear the latch so the checkpoint can be reused.
    pub fn reset(&self) {
        let mut latch = self.state.latch.lock();
        latch.signaled = false;
        latch.reason = 0;
    }

    /// Park the calling thread until the checkpoint is signaled.
    pub fn wait(&self) {
        while !self.is_signaled() {
            crate::alert::halt();
        }
    }

    /// Park until signaled or `tm` expires. Returns false on expiry.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        while !self.is_signaled() {
            if crate::alert::sleep(tm).is_none() {
                return self.is_signaled();
            }
        }
        true
    }

    /// Like [`wait`](Self::wait), draining the calling thread's dispatcher
    /// while parked.
    pub fn dispatch_wait(&self) {
        while !self.is_signaled() {
            dispatch::halt_and_dispatch();
        }
    }

    /// Like [`wait_timeout`](Self::wait_timeout), draining the calling
    /// thread's dispatcher while parked.
    pub fn dispatch_wait_timeout(&self, tm: Timeout) -> bool {
        while !self.is_signaled() {
            if dispatch::sleep_and_dispatch(tm).is_none() {
                return self.is_signaled();
            }
        }
        true
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn latches_signal_and_reason() {
        let cp = Checkpoint::new();
        assert!(!cp.is_signaled());
        cp.alert().wake_with(42);
        assert!(cp.is_signaled());
        assert_eq!(cp.reason(), 42);
        // the latch survives further waits; reset clears it
        cp.reset();
        assert!(!cp.is_signaled());
        assert_eq!(cp.reason(), 0);
    }

    #[test]
    fn clones_share_the_latch() {
        let cp = Checkpoint::new();
        let copy = cp.clone();
        copy.alert().wake();
        assert!(cp.is_signaled());
    }

    #[test]
    fn wait_crosses_threads() {
        let cp = Checkpoint::new();
        let alert = cp.alert();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            alert.wake_with(7);
        });
        cp.wait();
        assert_eq!(cp.reason(), 7);
        t.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_unsignaled() {
        let cp = Checkpoint::new();
        assert!(!cp.wait_timeout(Timeout::after_ms(10)));
    }

    #[test]
    fn forwards_to_custom_target() {
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let hits2 = hits.clone();
        let cp = Checkpoint::forward_to(Alert::call_fn(move |_| {
            hits2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        cp.alert().wake();
        cp.alert().wake();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(cp.is_signaled());
    }
}
