// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The wait-queue discipline shared by every blocking primitive.
//!
//! A waiter subscribes by creating a [`Ticket`]; the owning primitive either
//! alerts it immediately (predicate already satisfied) or links it into its
//! [`WaitQueue`]. Dropping a ticket that was neither alerted nor removed signs
//! it off, giving the primitive a chance to unlink it — and, when the ticket
//! lost a race and was alerted anyway, to re-award the permit it carried.
//!
//! The queue itself is not thread-safe; each primitive wraps it with its own
//! lock and performs all queue mutation under that lock. Alerting happens
//! under the same lock, *after* the primitive updated its state, so a woken
//! waiter's predicate recheck always succeeds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::alert::{self, Alert};
use crate::timeout::Timeout;

/// Wake order of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Wake in subscription order.
    Fifo,
    /// Wake the most recent subscriber first. Used for worker triggers, where
    /// the newest worker has the warmest cache.
    Lifo,
}

/// Access mode a ticket asks for. Only the reader/writer mutex distinguishes
/// the two; every other primitive subscribes [`TicketTag::Exclusive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketTag {
    Exclusive,
    Shared,
}

/// Shared state of one waiter's queue membership.
///
/// `pending → alerted` and `pending → removed` are terminal transitions and
/// never both happen: an alerted ticket owns whatever permit the primitive
/// granted, a removed ticket owns nothing.
pub struct TicketState {
    alert: Alert,
    alerted: AtomicBool,
    removed: AtomicBool,
    tag: TicketTag,
}

impl TicketState {
    pub(crate) fn new(alert: Alert, tag: TicketTag) -> Arc<Self> {
        Arc::new(Self {
            alert,
            alerted: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            tag,
        })
    }

    /// True once the primitive granted this waiter its permit.
    pub fn alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    pub(crate) fn removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// True for tickets subscribed for shared (read) access.
    pub fn is_shared(&self) -> bool {
        self.tag == TicketTag::Shared
    }
}

/// Implemented by each primitive: unlink a dropped ticket under the
/// primitive's lock, re-awarding its permit if it had already been granted.
pub(crate) trait Signoff {
    fn signoff(&self, ticket: &Arc<TicketState>);
}

/// A waiter's membership token. Lives on the waiter's stack; dropping it
/// before being alerted signs off from the owning primitive.
pub struct Ticket<'a> {
    state: Arc<TicketState>,
    owner: &'a dyn Signoff,
}

impl<'a> Ticket<'a> {
    pub(crate) fn new(state: Arc<TicketState>, owner: &'a dyn Signoff) -> Self {
        Self { state, owner }
    }

    /// True once the owning primitive granted the waiter's request.
    pub fn alerted(&self) -> bool {
        self.state.alerted()
    }

    /// Park until the ticket is alerted, absorbing unrelated wake-ups.
    pub fn wait(&self) {
        while !self.alerted() {
            alert::halt();
        }
    }

    /// Park until the ticket is alerted or `tm` expires. Returns true when
    /// the permit was granted — also when the grant raced with the deadline,
    /// so a granted permit is never silently abandoned on the timeout path.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        while !self.alerted() {
            if alert::sleep(tm).is_none() {
                return self.alerted();
            }
        }
        true
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.state.alerted() && !self.state.removed() {
            self.owner.signoff(&self.state);
        }
    }
}

/// Queue of pending tickets. All methods require the owning primitive's lock.
pub(crate) struct WaitQueue {
    mode: QueueMode,
    items: VecDeque<Arc<TicketState>>,
}

impl WaitQueue {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            items: VecDeque::new(),
        }
    }

    /// Link a pending ticket according to the queue mode.
    pub fn push(&mut self, ticket: Arc<TicketState>) {
        match self.mode {
            QueueMode::Fifo => self.items.push_back(ticket),
            QueueMode::Lifo => self.items.push_front(ticket),
        }
    }

    /// Unlink a ticket. Tickets that were alerted or removed in the meantime
    /// are left untouched; the caller inspects the ticket state afterwards.
    pub fn remove(&mut self, ticket: &Arc<TicketState>) -> bool {
        if ticket.alerted() || ticket.removed() {
            return false;
        }
        if let Some(pos) = self
            .items
            .iter()
            .position(|t| Arc::ptr_eq(t, ticket))
        {
            self.items.remove(pos);
            ticket.removed.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Grant the head ticket. Returns false on an empty queue.
    pub fn alert_one(&mut self) -> bool {
        match self.items.pop_front() {
            Some(t) => {
                Self::grant(&t);
                true
            }
            None => false,
        }
    }

    /// Grant every queued ticket. Returns false when none was queued.
    pub fn alert_all(&mut self) -> bool {
        let mut any = false;
        while self.alert_one() {
            any = true;
        }
        any
    }

    /// Grant a ticket that is not (or no longer) linked — the subscription
    /// fast path when the primitive's predicate already holds.
    pub fn grant(ticket: &TicketState) {
        ticket.alerted.store(true, Ordering::Release);
        ticket.alert.wake();
    }

    /// The ticket that `alert_one` would grant next.
    pub fn front(&self) -> Option<&Arc<TicketState>> {
        self.items.front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(tag: TicketTag) -> Arc<TicketState> {
        TicketState::new(Alert::call_fn(|_| {}), tag)
    }

    #[test]
    fn fifo_grants_in_subscription_order() {
        let mut q = WaitQueue::new(QueueMode::Fifo);
        let a = ticket(TicketTag::Exclusive);
        let b = ticket(TicketTag::Exclusive);
        q.push(a.clone());
        q.push(b.clone());
        assert!(q.alert_one());
        assert!(a.alerted());
        assert!(!b.alerted());
    }

    #[test]
    fn lifo_grants_newest_first() {
        let mut q = WaitQueue::new(QueueMode::Lifo);
        let a = ticket(TicketTag::Exclusive);
        let b = ticket(TicketTag::Exclusive);
        q.push(a.clone());
        q.push(b.clone());
        assert!(q.alert_one());
        assert!(b.alerted());
        assert!(!a.alerted());
    }

    #[test]
    fn remove_skips_alerted_tickets() {
        let mut q = WaitQueue::new(QueueMode::Fifo);
        let a = ticket(TicketTag::Exclusive);
        q.push(a.clone());
        assert!(q.alert_one());
        assert!(!q.remove(&a));
        // alerted and removed are mutually exclusive, always
        assert!(a.alerted() && !a.removed());
    }

    #[test]
    fn removed_ticket_owns_nothing() {
        let mut q = WaitQueue::new(QueueMode::Fifo);
        let a = ticket(TicketTag::Exclusive);
        q.push(a.clone());
        assert!(q.remove(&a));
        assert!(a.removed() && !a.alerted());
        assert!(!q.alert_one());
    }

    #[test]
    fn alert_all_drains() {
        let mut q = WaitQueue::new(QueueMode::Fifo);
        let tickets: Vec<_> = (0..4).map(|_| ticket(TicketTag::Exclusive)).collect();
        for t in &tickets {
            q.push(t.clone());
        }
        assert!(q.alert_all());
        assert!(tickets.iter().all(|t| t.alerted()));
        assert!(!q.alert_all());
    }
}
