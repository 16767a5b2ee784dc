// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A reader/writer mutex with tagged tickets.
//!
//! One signed counter encodes the whole state: positive — that many shared
//! holders; negative — one exclusive holder; zero — free. Waiters carry a
//! shared/exclusive tag; release grants a batch of readers from the queue
//! head, or one writer once the counter drains to zero. The shared fast path
//! refuses while an exclusive ticket waits at the head, so a steady stream of
//! readers cannot starve a writer.

use crate::alert::Alert;
use crate::queue::{QueueMode, Signoff, Ticket, TicketState, TicketTag, WaitQueue};
use crate::sync::fast_mutex::FastMutex;
use crate::timeout::Timeout;

use std::sync::Arc;

struct RwState {
    /// > 0: shared holders; < 0: exclusive; 0: free.
    readers: isize,
    queue: WaitQueue,
}

pub struct RwMutex {
    inner: FastMutex<RwState>,
}

impl RwMutex {
    pub fn new() -> Self {
        Self {
            inner: FastMutex::new(RwState {
                readers: 0,
                queue: WaitQueue::new(QueueMode::Fifo),
            }),
        }
    }

    /// Acquire exclusively, waiting for every current holder to release.
    pub fn lock(&self) {
        self.subscribe(TicketTag::Exclusive).wait();
    }

    /// Acquire exclusively within `tm`. Returns false on deadline expiry.
    pub fn lock_timeout(&self, tm: Timeout) -> bool {
        self.subscribe(TicketTag::Exclusive).wait_timeout(tm)
    }

    /// Acquire exclusively only if the lock is free.
    pub fn try_lock(&self) -> bool {
        let mut st = self.inner.lock();
        if st.readers == 0 {
            st.readers = -1;
            true
        } else {
            false
        }
    }

    /// Release the exclusive hold.
    pub fn unlock(&self) {
        let mut st = self.inner.lock();
        if st.readers < 0 {
            st.readers = 0;
            Self::grant_waiters(&mut st);
        }
    }

    /// Acquire shared, waiting while a writer holds or waits at the head.
    pub fn lock_shared(&self) {
        self.subscribe(TicketTag::Shared).wait();
    }

    /// Acquire shared within `tm`. Returns false on deadline expiry.
    pub fn lock_shared_timeout(&self, tm: Timeout) -> bool {
        self.subscribe(TicketTag::Shared).wait_timeout(tm)
    }

    /// Acquire shared only if no writer holds or waits.
    pub fn try_lock_shared(&self) -> bool {
        let mut st = self.inner.lock();
        if st.readers >= 0 && !Self::writer_at_head(&st) {
            st.readers += 1;
            true
        } else {
            false
        }
    }

    /// Release one shared hold.
    pub fn unlock_shared(&self) {
        let mut st = self.inner.lock();
        if st.readers > 0 {
            st.readers -= 1;
            if st.readers == 0 {
                Self::grant_waiters(&mut st);
            }
        }
    }

    fn writer_at_head(st: &RwState) -> bool {
        st.queue.front().map(|t| !t.is_shared()).unwrap_or(false)
    }

    /// Grant a run of shared tickets from the head, or one exclusive ticket
    /// once the counter reaches zero. State is updated before each alert so
    /// the woken waiter's view is consistent.
    fn grant_waiters(st: &mut RwState) {
        loop {
            let head_shared = st.queue.front().map(|t| t.is_shared());
            match head_shared {
                Some(true) => {
                    st.readers += 1;
                    st.queue.alert_one();
                }
                Some(false) if st.readers == 0 => {
                    st.readers = -1;
                    st.queue.alert_one();
                    return;
                }
                _ => return,
            }
        }
    }

    fn subscribe(&self, tag: TicketTag) -> Ticket<'_> {
        let state = TicketState::new(Alert::this_thread(), tag);
        let mut st = self.inner.lock();
        let granted = match tag {
            TicketTag::Shared => {
                if st.readers >= 0 && !Self::writer_at_head(&st) {
                    st.readers += 1;
                    true
                } else {
                    false
                }
            }
            TicketTag::Exclusive => {
                if st.readers == 0 && st.queue.is_empty() {
                    st.readers = -1;
                    true
                } else {
                    false
                }
            }
        };
        if granted {
            WaitQueue::grant(&state);
        } else {
            st.queue.push(state.clone());
        }
        drop(st);
        Ticket::new(state, self)
    }
}

impl Signoff for RwMutex {
    fn signoff(&self, ticket: &Arc<TicketState>) {
        let mut st = self.inner.lock();
        st.queue.remove(ticket);
        if ticket.alerted() {
            // the mode was granted but nobody will use it; release it here
            if ticket.is_shared() {
                if st.readers > 0 {
                    st.readers -= 1;
                    if st.readers == 0 {
                        Self::grant_waiters(&mut st);
                    }
                }
            } else if st.readers < 0 {
                st.readers = 0;
                Self::grant_waiters(&mut st);
            }
        }
    }
}

impl Default for RwMutex {
    fn default() -> Self {
        Self::new()
    }
}
