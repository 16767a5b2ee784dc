// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-thread wake-up mailbox and the [`Alert`] handle.
//!
//! Every blocking primitive in this crate bottoms out here: a thread parks by
//! calling [`sleep`] or [`halt`] on its own mailbox, and any other party wakes
//! it through an [`Alert`] handle. The mailbox carries an optional integer
//! *reason* whose delivery is best-effort — a second wake before the first is
//! consumed overwrites the stored reason. Callers that need lossless transport
//! use a [`Checkpoint`](crate::sync::Checkpoint) or a
//! [`Future`](crate::future::Future).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::timeout::Timeout;

/// A wakeable object. Implemented by the per-thread mailbox, by checkpoints
/// and by callback adapters; anything holding an [`Alert`] can wake it.
pub trait AlertTarget: Send + Sync {
    /// Deliver a wake-up, optionally carrying a reason.
    ///
    /// Must finish quickly; in most implementations this releases a waiting
    /// thread or records a flag. Long-running work belongs in a dispatcher.
    fn wake(&self, reason: Option<usize>);
}

/// A cloneable handle used to wake a sleeping thread or any other
/// [`AlertTarget`]. Equality is identity: two alerts are equal when they
/// refer to the same target.
#[derive(Clone)]
pub struct Alert {
    target: Arc<dyn AlertTarget>,
}

impl Alert {
    /// The alert that wakes the calling thread's mailbox. The handle can be
    /// passed to and fired from any other thread.
    pub fn this_thread() -> Alert {
        Alert {
            target: current_sandman(),
        }
    }

    /// An alert that invokes `f` with the carried reason. The function runs
    /// in the context of whichever thread fires the alert; route it through a
    /// dispatcher to execute it elsewhere.
    pub fn call_fn<F>(f: F) -> Alert
    where
        F: Fn(Option<usize>) + Send + Sync + 'static,
    {
        struct CallFn<F>(F);
        impl<F> AlertTarget for CallFn<F>
        where
            F: Fn(Option<usize>) + Send + Sync,
        {
            fn wake(&self, reason: Option<usize>) {
                (self.0)(reason);
            }
        }
        Alert {
            target: Arc::new(CallFn(f)),
        }
    }

    pub(crate) fn from_target(target: Arc<dyn AlertTarget>) -> Alert {
        Alert { target }
    }

    /// Wake the target without a reason.
    pub fn wake(&self) {
        self.target.wake(None);
    }

    /// Wake the target carrying `reason`. Delivery of the reason is
    /// best-effort; an unconsumed earlier reason is overwritten.
    pub fn wake_with(&self, reason: usize) {
        self.target.wake(Some(reason));
    }
}

impl PartialEq for Alert {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }
}

impl Eq for Alert {}

impl std::fmt::Debug for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Alert({:p})", Arc::as_ptr(&self.target))
    }
}

#[derive(Default)]
struct Mailbox {
    alerted: bool,
    reason: usize,
}

/// The per-thread mailbox. One exists lazily per thread and is released when
/// the thread exits; handles obtained through [`Alert::this_thread`] keep it
/// alive past that point, they just wake nobody.
pub(crate) struct Sandman {
    state: Mutex<Mailbox>,
    condvar: Condvar,
}

impl Sandman {
    fn new() -> Self {
        Self {
            state: Mutex::new(Mailbox::default()),
            condvar: Condvar::new(),
        }
    }

    /// Park until alerted or until the deadline. `None` means the deadline
    /// expired; `Some(reason)` means an alert arrived and both the alerted
    /// flag and the stored reason were consumed.
    fn sleep(&self, tm: Timeout) -> Option<usize> {
        let mut mb = self.state.lock();
        while !mb.alerted {
            match tm.deadline() {
                None => self.condvar.wait(&mut mb),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut mb, deadline).timed_out() {
                        return None;
                    }
                }
            }
        }
        let reason = std::mem::take(&mut mb.reason);
        mb.alerted = false;
        Some(reason)
    }
}

impl AlertTarget for Sandman {
    fn wake(&self, reason: Option<usize>) {
        let mut mb = self.state.lock();
        mb.alerted = true;
        if let Some(r) = reason {
            mb.reason = r;
        }
        self.condvar.notify_all();
    }
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_SANDMAN: Arc<Sandman> = Arc::new(Sandman::new());
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_sandman() -> Arc<Sandman> {
    CURRENT_SANDMAN.with(Arc::clone)
}

/// Park the calling thread until an alert arrives or `tm` expires.
///
/// Returns `None` on deadline expiry and `Some(reason)` when alerted (the
/// reason is zero when the waker did not supply one). A wake that arrived
/// before the call returns immediately.
pub fn sleep(tm: Timeout) -> Option<usize> {
    current_sandman().sleep(tm)
}

/// Park the calling thread until an alert arrives; returns the carried reason.
pub fn halt() -> usize {
    // an infinite sleep only returns by alert
    sleep(Timeout::never()).unwrap_or_default()
}

/// An opaque nonzero identifier, stable for the lifetime of the calling
/// thread.
pub fn this_thread_id() -> usize {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_before_sleep_is_consumed() {
        let alert = Alert::this_thread();
        alert.wake_with(42);
        assert_eq!(sleep(Timeout::never()), Some(42));
        // flag and reason were both consumed
        assert_eq!(sleep(Timeout::now()), None);
    }

    #[test]
    fn sleep_times_out_without_alert() {
        assert_eq!(sleep(Timeout::after_ms(10)), None);
    }

    #[test]
    fn cross_thread_reason() {
        let alert = Alert::this_thread();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            alert.wake_with(42);
        });
        let mut reason = None;
        while reason.is_none() {
            reason = sleep(Timeout::never());
        }
        assert_eq!(reason, Some(42));
        t.join().unwrap();
    }

    #[test]
    fn second_wake_overwrites_reason() {
        let alert = Alert::this_thread();
        alert.wake_with(1);
        alert.wake_with(2);
        assert_eq!(sleep(Timeout::never()), Some(2));
    }

    #[test]
    fn call_fn_runs_in_caller_context() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let alert = Alert::call_fn(move |reason| {
            seen2.store(reason.unwrap_or(999), Ordering::SeqCst);
        });
        alert.wake_with(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn thread_ids_are_stable_and_distinct() {
        let mine = this_thread_id();
        assert_ne!(mine, 0);
        assert_eq!(mine, this_thread_id());
        let other = thread::spawn(this_thread_id).join().unwrap();
        assert_ne!(mine, other);
    }

    #[test]
    fn alert_equality_is_identity() {
        let a = Alert::this_thread();
        let b = Alert::this_thread();
        assert_eq!(a, b);
        let c = Alert::call_fn(|_| {});
        assert_ne!(a, c);
    }
}
