// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A counting semaphore over the wait queue.
//!
//! A permit is either credited to the counter or handed directly to a waiting
//! ticket, never both; that keeps the count exact across release/subscribe
//! races. Because releasing from a different thread is allowed, the semaphore
//! doubles as an event object: `set_permits(1)` releases exactly one waiter,
//! or lets the first future arrival pass.

use crate::alert::Alert;
use crate::queue::{QueueMode, Signoff, Ticket, TicketState, TicketTag, WaitQueue};
use crate::sync::fast_mutex::FastMutex;
use crate::timeout::Timeout;

use std::sync::Arc;

struct SemState {
    permits: usize,
    queue: WaitQueue,
}

pub struct Semaphore {
    inner: FastMutex<SemState>,
}

impl Semaphore {
    /// A semaphore holding `permits` permits; zero constructs it closed.
    pub fn new(permits: usize) -> Self {
        Self {
            inner: FastMutex::new(SemState {
                permits,
                queue: WaitQueue::new(QueueMode::Fifo),
            }),
        }
    }

    /// Take a permit, waiting until one is available.
    pub fn acquire(&self) {
        self.subscribe().wait();
    }

    /// Take a permit within `tm`. Returns false on deadline expiry.
    pub fn acquire_timeout(&self, tm: Timeout) -> bool {
        self.subscribe().wait_timeout(tm)
    }

    /// Take a permit only if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut st = self.inner.lock();
        if st.permits > 0 {
            st.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Return a permit: hand it to the next waiter, or credit the counter.
    pub fn release(&self) {
        let mut st = self.inner.lock();
        Self::release_locked(&mut st);
    }

    /// Install a new permit count, then hand permits to waiting tickets while
    /// both remain. The final count may differ from `permits` accordingly.
    pub fn set_permits(&self, permits: usize) {
        let mut st = self.inner.lock();
        st.permits = permits;
        while st.permits > 0 && st.queue.alert_one() {
            st.permits -= 1;
        }
    }

    pub fn permits(&self) -> usize {
        self.inner.lock().permits
    }

    fn release_locked(st: &mut SemState) {
        if !st.queue.alert_one() {
            st.permits += 1;
        }
    }

    fn subscribe(&self) -> Ticket<'_> {
        let state = TicketState::new(Alert::this_thread(), TicketTag::Exclusive);
        let mut st = self.inner.lock();
        if st.permits > 0 {
            st.permits -= 1;
            WaitQueue::grant(&state);
        } else {
            st.queue.push(state.clone());
        }
        drop(st);
        Ticket::new(state, self)
    }
}

impl Signoff for Semaphore {
    fn signoff(&self, ticket: &Arc<TicketState>) {
        let mut st = self.inner.lock();
        st.queue.remove(ticket);
        if ticket.alerted() {
            // the ticket won a permit nobody will consume; re-award it
            Self::release_locked(&mut st);
        }
    }
}
