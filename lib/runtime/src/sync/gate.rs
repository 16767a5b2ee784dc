// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Binary and counting gates over the wait queue.
//!
//! A [`Gate`] is either open — threads pass through freely — or closed,
//! holding arrivals until it opens (or pulses). A [`CountGate`] opens once a
//! given number of arrivals has been recorded and stays open until re-armed;
//! the usual way to join a set of workers.

use crate::alert::Alert;
use crate::queue::{QueueMode, Signoff, Ticket, TicketState, TicketTag, WaitQueue};
use crate::sync::fast_mutex::FastMutex;
use crate::timeout::Timeout;

use std::sync::Arc;

struct GateState {
    opened: bool,
    queue: WaitQueue,
}

/// A gate threads can pass when open and wait at when closed.
pub struct Gate {
    inner: FastMutex<GateState>,
}

impl Gate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::with_state(false)
    }

    /// A gate in the given initial state.
    pub fn with_state(opened: bool) -> Self {
        Self {
            inner: FastMutex::new(GateState {
                opened,
                queue: WaitQueue::new(QueueMode::Fifo),
            }),
        }
    }

    /// Open the gate, releasing every waiter. Stays open.
    pub fn open(&self) {
        let mut st = self.inner.lock();
        if !st.opened {
            st.opened = true;
            st.queue.alert_all();
        }
    }

    /// Close the gate; subsequent arrivals wait.
    pub fn close(&self) {
        self.inner.lock().opened = false;
    }

    /// Release current waiters while keeping the gate closed.
    pub fn pulse(&self) {
        self.inner.lock().queue.alert_all();
    }

    pub fn set_state(&self, opened: bool) {
        if opened {
            self.open();
        } else {
            self.close();
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().opened
    }

    /// Pass through the gate, waiting while it is closed.
    pub fn wait(&self) {
        self.subscribe().wait();
    }

    /// Pass through the gate within `tm`. Returns false on deadline expiry.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        self.subscribe().wait_timeout(tm)
    }

    fn subscribe(&self) -> Ticket<'_> {
        let state = TicketState::new(Alert::this_thread(), TicketTag::Exclusive);
        let mut st = self.inner.lock();
        if st.opened {
            WaitQueue::grant(&state);
        } else {
            st.queue.push(state.clone());
        }
        drop(st);
        Ticket::new(state, self)
    }
}

impl Signoff for Gate {
    fn signoff(&self, ticket: &Arc<TicketState>) {
        self.inner.lock().queue.remove(ticket);
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

struct CountGateState {
    count: usize,
    queue: WaitQueue,
}

/// A gate that opens when its counter reaches zero and stays open.
pub struct CountGate {
    inner: FastMutex<CountGateState>,
}

impl CountGate {
    /// Arm the gate for `count` arrivals; zero constructs it open.
    pub fn new(count: usize) -> Self {
        Self {
            inner: FastMutex::new(CountGateState {
                count,
                queue: WaitQueue::new(QueueMode::Fifo),
            }),
        }
    }

    /// Record one arrival; opens the gate when the counter reaches zero.
    /// Arrivals at an open gate are ignored (the counter clamps at zero).
    pub fn arrive(&self) {
        let mut st = self.inner.lock();
        if st.count > 0 {
            st.count -= 1;
        }
        if st.count == 0 {
            st.queue.alert_all();
        }
    }

    /// Re-arm with a new counter; a zero count opens the gate immediately.
    pub fn reset(&self, count: usize) {
        let mut st = self.inner.lock();
        st.count = count;
        if count == 0 {
            st.queue.alert_all();
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Wait until the counter reaches zero.
    pub fn wait(&self) {
        self.subscribe().wait();
    }

    /// Wait until the counter reaches zero or `tm` expires.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        self.subscribe().wait_timeout(tm)
    }

    fn subscribe(&self) -> Ticket<'_> {
        let state = TicketState::new(Alert::this_thread(), TicketTag::Exclusive);
        let mut st = self.inner.lock();
        if st.count == 0 {
            WaitQueue::grant(&state);
        } else {
            st.queue.push(state.clone());
        }
        drop(st);
        Ticket::new(state, self)
    }
}

impl Signoff for CountGate {
    fn signoff(&self, ticket: &Arc<TicketState>) {
        self.inner.lock().queue.remove(ticket);
    }
}
