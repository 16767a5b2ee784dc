// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deadline-ordered dispatch slots driven by a single timer thread.
//!
//! [`Scheduler::schedule`] hands out a [`DispatchFn`] representing "a slot at
//! this deadline". Dispatching onto the slot arms it; dispatching again
//! before it fires replaces the task (dispatch a no-op to cancel); once fired
//! the slot refuses. The worker thread exists only while slots are pending
//! and runs them in deadline order, ties broken by arming order.
//!
//! The process-wide instance is reached through [`at`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;

use crate::alert::{self, Alert};
use crate::dispatch::{DispatchFn, Dispatcher, Task};
use crate::sync::FastMutex;
use crate::timeout::Timeout;

/// Schedule a task on the process-wide scheduler: `at(tm).dispatch(f)` runs
/// `f` on the timer thread once `tm` expires.
pub fn at(tm: Timeout) -> DispatchFn {
    static GLOBAL: Lazy<Scheduler> = Lazy::new(Scheduler::new);
    GLOBAL.schedule(tm)
}

pub struct Scheduler {
    inner: Arc<SchedulerImpl>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new_cyclic(|weak_self| SchedulerImpl {
                state: FastMutex::new(SchedState {
                    heap: BinaryHeap::new(),
                    seq: 0,
                    running: false,
                    worker_alert: None,
                }),
                weak_self: weak_self.clone(),
            }),
        }
    }

    /// A dispatch slot bound to `tm`. The slot is armed by its first
    /// dispatch and executes on the scheduler's thread — immediately, if the
    /// deadline has already passed.
    pub fn schedule(&self, tm: Timeout) -> DispatchFn {
        let slot = Arc::new_cyclic(|weak_self| ScheduledSlot {
            sched: self.inner.clone(),
            deadline: tm,
            state: FastMutex::new(SlotInner {
                state: SlotState::Initializing,
                task: None,
            }),
            weak_self: weak_self.clone(),
        });
        DispatchFn::from_dispatcher(slot)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Initializing,
    Queued,
    Fired,
}

struct SlotInner {
    state: SlotState,
    task: Option<Task>,
}

struct ScheduledSlot {
    sched: Arc<SchedulerImpl>,
    deadline: Timeout,
    state: FastMutex<SlotInner>,
    weak_self: Weak<ScheduledSlot>,
}

impl ScheduledSlot {
    fn fire(&self) {
        let task = {
            let mut st = self.state.lock();
            st.state = SlotState::Fired;
            st.task.take()
        };
        if let Some(task) = task {
            task.run();
        }
    }
}

impl Dispatcher for ScheduledSlot {
    fn submit(&self, task: Task) -> Result<(), Task> {
        let mut st = self.state.lock();
        match st.state {
            SlotState::Initializing => {
                st.task = Some(task);
                st.state = SlotState::Queued;
                drop(st);
                if let Some(me) = self.weak_self.upgrade() {
                    self.sched.enqueue(me);
                }
                Ok(())
            }
            // replacing the task before the deadline is the cancellation
            // mechanism: dispatch a no-op to cancel
            SlotState::Queued => {
                st.task = Some(task);
                Ok(())
            }
            SlotState::Fired => Err(task),
        }
    }
}

struct HeapEntry {
    deadline: Timeout,
    seq: u64,
    slot: Arc<ScheduledSlot>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: invert so the earliest deadline (and,
        // within a deadline, the earliest arming) pops first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct SchedState {
    heap: BinaryHeap<HeapEntry>,
    seq: u64,
    running: bool,
    worker_alert: Option<Alert>,
}

struct SchedulerImpl {
    state: FastMutex<SchedState>,
    weak_self: Weak<SchedulerImpl>,
}

impl SchedulerImpl {
    fn enqueue(&self, slot: Arc<ScheduledSlot>) {
        let mut st = self.state.lock();
        st.seq += 1;
        let entry = HeapEntry {
            deadline: slot.deadline,
            seq: st.seq,
            slot,
        };
        st.heap.push(entry);
        if !st.running {
            let Some(me) = self.weak_self.upgrade() else {
                return;
            };
            st.running = true;
            if let Err(e) = std::thread::Builder::new()
                .name("slumber-scheduler".into())
                .spawn(move || me.run_worker())
            {
                st.running = false;
                tracing::error!(error = %e, "failed to start scheduler thread");
            }
        } else if let Some(a) = &st.worker_alert {
            // an earlier deadline may now be at the top; interrupt the sleep
            a.wake();
        }
    }

    fn run_worker(self: Arc<Self>) {
        tracing::trace!("scheduler worker started");
        let mut st = self.state.lock();
        st.worker_alert = Some(Alert::this_thread());
        loop {
            let next = match st.heap.peek() {
                Some(entry) => entry.deadline,
                None => break,
            };
            if next.expired() {
                if let Some(entry) = st.heap.pop() {
                    drop(st);
                    entry.slot.fire();
                    st = self.state.lock();
                }
            } else {
                drop(st);
                alert::sleep(next);
                st = self.state.lock();
            }
        }
        st.worker_alert = None;
        st.running = false;
        drop(st);
        tracing::trace!("scheduler worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[test]
    fn slot_fires_after_deadline() {
        let sched = Scheduler::new();
        let cp = crate::sync::Checkpoint::new();
        let alert = cp.alert();
        let start = Instant::now();
        let slot = sched.schedule(Timeout::after_ms(50));
        assert!(slot.dispatch(move || alert.wake()));
        cp.wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn deadline_order_with_insertion_tiebreak() {
        let sched = Scheduler::new();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(crate::sync::CountGate::new(4));
        let deadline = Timeout::after_ms(40);
        for (i, tm) in [(0u32, Timeout::after_ms(80)), (1, deadline), (2, deadline), (3, Timeout::after_ms(10))] {
            let log = log.clone();
            let done = done.clone();
            assert!(sched.schedule(tm).dispatch(move || {
                log.lock().push(i);
                done.arrive();
            }));
        }
        done.wait();
        assert_eq!(*log.lock(), vec![3, 1, 2, 0]);
    }

    #[test]
    fn past_deadline_fires_immediately() {
        let sched = Scheduler::new();
        let cp = crate::sync::Checkpoint::new();
        let alert = cp.alert();
        let slot = sched.schedule(Timeout::now());
        assert!(slot.dispatch(move || alert.wake()));
        assert!(cp.wait_timeout(Timeout::after_ms(1000)));
    }

    #[test]
    fn redispatch_replaces_task_before_firing() {
        let sched = Scheduler::new();
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let cp = crate::sync::Checkpoint::new();
        let alert = cp.alert();
        let slot = sched.schedule(Timeout::after_ms(60));
        let log1 = log.clone();
        assert!(slot.dispatch(move || log1.lock().push("first")));
        let log2 = log.clone();
        assert!(slot.dispatch(move || {
            log2.lock().push("second");
            alert.wake();
        }));
        cp.wait();
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn fired_slot_refuses() {
        let sched = Scheduler::new();
        let cp = crate::sync::Checkpoint::new();
        let alert = cp.alert();
        let slot = sched.schedule(Timeout::after_ms(10));
        assert!(slot.dispatch(move || alert.wake()));
        cp.wait();
        // fired slots reject further work
        assert!(!slot.dispatch(|| {}));
    }

    #[test]
    fn earlier_slot_preempts_sleeping_worker() {
        let sched = Scheduler::new();
        let cp = crate::sync::Checkpoint::new();
        let late_cp = crate::sync::Checkpoint::new();
        let late_alert = late_cp.alert();
        let start = Instant::now();
        assert!(sched
            .schedule(Timeout::after_ms(500))
            .dispatch(move || late_alert.wake()));
        // the worker is now asleep until +500ms; an earlier slot interrupts
        let alert = cp.alert();
        assert!(sched
            .schedule(Timeout::after_ms(30))
            .dispatch(move || alert.wake()));
        cp.wait();
        assert!(start.elapsed() < Duration::from_millis(400));
        late_cp.wait();
    }
}
