// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A condition variable over the wait queue.
//!
//! Waiters that already hold a [`FastMutex`] guard use the
//! [`unlock_and_wait`](CondVar::unlock_and_wait) protocol: the ticket is
//! subscribed while the caller's lock is still held, the lock is released for
//! the duration of the wait and re-acquired on return — so no notification
//! sent between release and sleep can be lost.

use crate::alert::Alert;
use crate::queue::{QueueMode, Signoff, Ticket, TicketState, TicketTag, WaitQueue};
use crate::sync::fast_mutex::{FastMutex, FastMutexGuard};
use crate::timeout::Timeout;

use std::sync::Arc;

pub struct CondVar {
    inner: FastMutex<WaitQueue>,
}

impl CondVar {
    /// A condition variable waking waiters in subscription order.
    pub fn new() -> Self {
        Self::with_mode(QueueMode::Fifo)
    }

    /// A LIFO condition variable: the most recent waiter wakes first. Used
    /// for worker triggers, where the newest worker has the warmest cache.
    pub fn new_lifo() -> Self {
        Self::with_mode(QueueMode::Lifo)
    }

    fn with_mode(mode: QueueMode) -> Self {
        Self {
            inner: FastMutex::new(WaitQueue::new(mode)),
        }
    }

    /// Wake one waiter. Returns false when none was queued.
    pub fn notify_one(&self) -> bool {
        self.inner.lock().alert_one()
    }

    /// Wake every waiter. Returns false when none was queued.
    pub fn notify_all(&self) -> bool {
        self.inner.lock().alert_all()
    }

    /// Inspect the head waiter under the lock and wake it only if `pred`
    /// approves. The predicate runs holding the lock — keep it short.
    pub fn notify_one_if<F>(&self, pred: F) -> bool
    where
        F: FnOnce(&TicketState) -> bool,
    {
        let mut q = self.inner.lock();
        let approved = match q.front() {
            Some(head) => pred(head),
            None => return false,
        };
        if approved {
            q.alert_one()
        } else {
            false
        }
    }

    /// Subscribe the calling thread. The returned ticket signs off on drop.
    pub fn ticket(&self) -> Ticket<'_> {
        self.ticket_with(Alert::this_thread())
    }

    /// Subscribe with a custom alert target.
    pub fn ticket_with(&self, alert: Alert) -> Ticket<'_> {
        let state = TicketState::new(alert, TicketTag::Exclusive);
        self.inner.lock().push(state.clone());
        Ticket::new(state, self)
    }

    /// Wait for a notification.
    pub fn wait(&self) {
        self.ticket().wait();
    }

    /// Wait for a notification within `tm`. Returns false on expiry.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        self.ticket().wait_timeout(tm)
    }

    /// Release `guard` for the duration of the wait and re-acquire it.
    pub fn unlock_and_wait<'m, T>(&self, guard: FastMutexGuard<'m, T>) -> FastMutexGuard<'m, T> {
        let ticket = self.ticket();
        let mutex = guard.mutex();
        drop(guard);
        ticket.wait();
        drop(ticket);
        mutex.lock()
    }

    /// Release `guard` for the duration of a bounded wait and re-acquire it.
    /// The flag is true when a notification arrived, false on expiry.
    pub fn unlock_and_wait_timeout<'m, T>(
        &self,
        tm: Timeout,
        guard: FastMutexGuard<'m, T>,
    ) -> (bool, FastMutexGuard<'m, T>) {
        let ticket = self.ticket();
        let mutex = guard.mutex();
        drop(guard);
        let notified = ticket.wait_timeout(tm);
        drop(ticket);
        (notified, mutex.lock())
    }
}

impl Signoff for CondVar {
    fn signoff(&self, ticket: &Arc<TicketState>) {
        self.inner.lock().remove(ticket);
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_one_wakes_a_single_waiter() {
        let cv = Arc::new(CondVar::new());
        let woken = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let cv = cv.clone();
            let woken = woken.clone();
            handles.push(thread::spawn(move || {
                cv.wait();
                woken.fetch_add(1, Ordering::SeqCst);
            }));
        }
        thread::sleep(Duration::from_millis(30));
        assert!(cv.notify_one());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        cv.notify_all();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn notify_without_waiters_reports_false() {
        let cv = CondVar::new();
        assert!(!cv.notify_one());
        assert!(!cv.notify_all());
    }

    #[test]
    fn wait_timeout_expires() {
        let cv = CondVar::new();
        assert!(!cv.wait_timeout(Timeout::after_ms(10)));
    }

    #[test]
    fn unlock_and_wait_releases_the_callers_lock() {
        let data = Arc::new(FastMutex::new(0u32));
        let cv = Arc::new(CondVar::new());
        let data2 = data.clone();
        let cv2 = cv.clone();
        let t = thread::spawn(move || {
            let mut g = data2.lock();
            while *g == 0 {
                g = cv2.unlock_and_wait(g);
            }
            *g
        });
        thread::sleep(Duration::from_millis(20));
        // the waiter must have released the lock
        *data.lock() = 7;
        cv.notify_one();
        assert_eq!(t.join().unwrap(), 7);
    }

    #[test]
    fn predicate_gates_notification() {
        let cv = Arc::new(CondVar::new());
        let cv2 = cv.clone();
        let t = thread::spawn(move || cv2.wait());
        thread::sleep(Duration::from_millis(20));
        assert!(!cv.notify_one_if(|_| false));
        assert!(cv.notify_one_if(|t| !t.is_shared()));
        t.join().unwrap();
    }
}
