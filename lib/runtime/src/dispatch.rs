// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-thread function queues and the [`DispatchFn`] handle.
//!
//! A dispatcher is a FIFO of deferred tasks consumed by its owning thread
//! whenever that thread parks through [`halt_and_dispatch`] or
//! [`sleep_and_dispatch`]. Submitting to a thread whose dispatcher has closed
//! (the thread exited) is reported by a `false` return, never an error — the
//! task is simply dropped, which cancels any promise it carried.
//!
//! Dispatchers compose: [`DispatchFn::route`] turns a dispatcher plus an
//! alert into an alert that fires in the dispatcher's thread, and
//! [`DispatchFn::chain`] forwards through one dispatcher into another with a
//! fallback when the far end is gone.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::alert::{self, Alert};
use crate::sync::FastMutex;
use crate::timeout::Timeout;

/// A unit of deferred work: a boxed closure, or the clear-queue command
/// understood by queue-bearing dispatchers (the thread pool in particular).
pub struct Task(TaskKind);

enum TaskKind {
    Run(Box<dyn FnOnce() + Send>),
    ClearQueue,
}

impl Task {
    pub fn new<F>(f: F) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        Task(TaskKind::Run(Box::new(f)))
    }

    /// The sentinel that clears a dispatcher's pending queue instead of
    /// queueing behind it.
    pub fn clear_queue() -> Task {
        Task(TaskKind::ClearQueue)
    }

    pub(crate) fn is_clear_queue(&self) -> bool {
        matches!(self.0, TaskKind::ClearQueue)
    }

    pub(crate) fn run(self) {
        if let TaskKind::Run(f) = self.0 {
            f();
        }
    }
}

/// A task sink. `submit` hands the task back on refusal so composed
/// dispatchers can fall back to running it elsewhere.
pub trait Dispatcher: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), Task>;
}

/// A cloneable handle to a dispatcher. Equality is identity.
#[derive(Clone)]
pub struct DispatchFn {
    inner: Arc<dyn Dispatcher>,
}

impl DispatchFn {
    /// The calling thread's dispatcher. Inside a pool worker this is the
    /// pool itself, so work submitted "to this thread" lands on the pool.
    pub fn this_thread() -> DispatchFn {
        let ctl = QUEUE_CONTROL.with(|c| c.borrow().clone());
        if let Some(ctl) = ctl {
            return ctl.dispatch_fn();
        }
        DispatchFn {
            inner: current_dispatcher(),
        }
    }

    /// A dispatcher that starts a fresh detached OS thread per task.
    pub fn new_thread() -> DispatchFn {
        static NEW_THREAD: Lazy<DispatchFn> = Lazy::new(|| DispatchFn {
            inner: Arc::new(NewThreadDispatcher),
        });
        NEW_THREAD.clone()
    }

    /// A private dispatch thread: a single-thread pool with an unbounded
    /// queue and no idle timeout. The thread stops when the last handle
    /// drops.
    pub fn new_dispatch_thread() -> DispatchFn {
        crate::pool::ThreadPool::new()
            .max_threads(1)
            .max_queue(usize::MAX)
            .idle_timeout_ms(0)
            .queue_timeout_ms(0)
            .start()
    }

    pub(crate) fn from_dispatcher(inner: Arc<dyn Dispatcher>) -> DispatchFn {
        DispatchFn { inner }
    }

    /// Submit a closure. Returns false when the target refused it (thread
    /// gone, slot already fired, or submission timed out).
    pub fn dispatch<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit(Task::new(f)).is_ok()
    }

    /// Submit a prebuilt [`Task`], including the clear-queue sentinel.
    pub fn dispatch_task(&self, task: Task) -> bool {
        self.inner.submit(task).is_ok()
    }

    pub(crate) fn submit_task(&self, task: Task) -> Result<(), Task> {
        self.inner.submit(task)
    }

    /// An alert that, when fired, dispatches a task on this dispatcher which
    /// wakes `target` with the captured reason — the way to move an alert
    /// into another thread's context.
    pub fn route(&self, target: Alert) -> Alert {
        let dispatcher = self.clone();
        Alert::call_fn(move |reason| {
            let target = target.clone();
            dispatcher.dispatch(move || match reason {
                Some(r) => target.wake_with(r),
                None => target.wake(),
            });
        })
    }

    /// A dispatcher that forwards through `self` into `second`. When the far
    /// end refuses (its thread is gone), the task runs in `self`'s context
    /// instead of being lost.
    pub fn chain(&self, second: &DispatchFn) -> DispatchFn {
        DispatchFn {
            inner: Arc::new(CombinedDispatcher {
                first: self.clone(),
                second: second.clone(),
            }),
        }
    }

    /// Shorthand for chaining into [`DispatchFn::new_thread`].
    pub fn to_new_thread(&self) -> DispatchFn {
        self.chain(&DispatchFn::new_thread())
    }

    /// Shorthand for chaining back into the calling thread's dispatcher.
    pub fn to_this_thread(&self) -> DispatchFn {
        self.chain(&DispatchFn::this_thread())
    }
}

impl PartialEq for DispatchFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DispatchFn {}

struct DispatchState {
    queue: VecDeque<Task>,
    opened: bool,
}

/// The queue owned by one thread, drained during that thread's parked time.
pub(crate) struct ThreadDispatcher {
    state: FastMutex<DispatchState>,
    alert: Alert,
}

impl ThreadDispatcher {
    fn new(alert: Alert) -> Self {
        Self {
            state: FastMutex::new(DispatchState {
                queue: VecDeque::new(),
                opened: true,
            }),
            alert,
        }
    }

    /// Park up to `tm` waiting for an alert or a task, then run at most one
    /// task outside the lock. `None` reports deadline expiry.
    fn sleep_dispatch(&self, tm: Timeout) -> Option<usize> {
        let mut st = self.state.lock();
        let mut reason = 0;
        if st.queue.is_empty() {
            drop(st);
            match alert::sleep(tm) {
                None => return None,
                Some(r) => reason = r,
            }
            st = self.state.lock();
        }
        let task = st.queue.pop_front();
        drop(st);
        if let Some(task) = task {
            task.run();
        }
        Some(reason)
    }

    fn close(&self) {
        let mut st = self.state.lock();
        st.opened = false;
        let dropped = st.queue.len();
        st.queue.clear();
        if dropped > 0 {
            tracing::trace!(dropped, "thread dispatcher closed with pending tasks");
        }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn submit(&self, task: Task) -> Result<(), Task> {
        let mut st = self.state.lock();
        if !st.opened {
            return Err(task);
        }
        if task.is_clear_queue() {
            st.queue.clear();
            return Ok(());
        }
        let was_empty = st.queue.is_empty();
        st.queue.push_back(task);
        if was_empty {
            self.alert.wake();
        }
        Ok(())
    }
}

/// Closes the thread's dispatcher when the thread exits: pending tasks are
/// dropped and later submissions are refused.
struct DispatcherSlot {
    cell: RefCell<Option<Arc<ThreadDispatcher>>>,
}

impl Drop for DispatcherSlot {
    fn drop(&mut self) {
        if let Some(d) = self.cell.borrow_mut().take() {
            d.close();
        }
    }
}

thread_local! {
    static CURRENT_DISPATCHER: DispatcherSlot = DispatcherSlot {
        cell: RefCell::new(None),
    };
}

fn current_dispatcher() -> Arc<ThreadDispatcher> {
    CURRENT_DISPATCHER.with(|slot| {
        slot.cell
            .borrow_mut()
            .get_or_insert_with(|| Arc::new(ThreadDispatcher::new(Alert::this_thread())))
            .clone()
    })
}

/// Park up to `tm` waiting for an alert or a dispatched task; runs at most
/// one task. `None` reports deadline expiry, `Some(reason)` any wake-up.
/// Call in a loop to drain multiple tasks.
pub fn sleep_and_dispatch(tm: Timeout) -> Option<usize> {
    current_dispatcher().sleep_dispatch(tm)
}

/// Park until an alert or a dispatched task arrives; runs at most one task
/// and returns the alert reason (zero when woken for a task).
pub fn halt_and_dispatch() -> usize {
    current_dispatcher()
        .sleep_dispatch(Timeout::never())
        .unwrap_or_default()
}

/// Worker-thread hook installed by the thread pool: lets a task execute one
/// queued pool task inline and routes [`DispatchFn::this_thread`] back to
/// the pool.
pub(crate) trait QueueControl {
    fn yield_one(&self) -> bool;
    fn dispatch_fn(&self) -> DispatchFn;
}

thread_local! {
    static QUEUE_CONTROL: RefCell<Option<Rc<dyn QueueControl>>> = RefCell::new(None);
}

pub(crate) fn set_queue_control(ctl: Option<Rc<dyn QueueControl>>) {
    QUEUE_CONTROL.with(|c| *c.borrow_mut() = ctl);
}

/// From inside a pool task: execute one queued pool task inline. Bounded by
/// the pool's `max_yield_recursion`; returns false outside a pool worker,
/// on an empty queue, or at the recursion cap.
pub fn yield_now() -> bool {
    let ctl = QUEUE_CONTROL.with(|c| c.borrow().clone());
    match ctl {
        Some(ctl) => ctl.yield_one(),
        None => false,
    }
}

struct NewThreadDispatcher;

impl Dispatcher for NewThreadDispatcher {
    fn submit(&self, task: Task) -> Result<(), Task> {
        if task.is_clear_queue() {
            return Ok(());
        }
        // a failed spawn drops the task, canceling any promise it carries
        if let Err(e) = std::thread::Builder::new()
            .name("slumber-task".into())
            .spawn(move || task.run())
        {
            tracing::error!(error = %e, "failed to spawn task thread");
        }
        Ok(())
    }
}

struct CombinedDispatcher {
    first: DispatchFn,
    second: DispatchFn,
}

impl Dispatcher for CombinedDispatcher {
    fn submit(&self, task: Task) -> Result<(), Task> {
        let second = self.second.clone();
        self.first.submit_task(Task::new(move || {
            if let Err(task) = second.submit_task(task) {
                task.run();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::thread;

    fn drain_until<F: Fn() -> bool>(done: F) {
        while !done() {
            sleep_and_dispatch(Timeout::after_ms(1000));
        }
    }

    #[test]
    fn fifo_order_on_owner_thread() {
        let d = DispatchFn::this_thread();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            assert!(d.dispatch(move || log.lock().push(i)));
        }
        drain_until(|| log.lock().len() == 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn closed_dispatcher_refuses() {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            tx.send(DispatchFn::this_thread()).unwrap();
        })
        .join()
        .unwrap();
        let dead = rx.recv().unwrap();
        assert!(!dead.dispatch(|| {}));
    }

    #[test]
    fn route_fires_alert_in_dispatcher_thread() {
        let cp = crate::sync::Checkpoint::new();
        let routed = DispatchFn::this_thread().route(cp.alert());
        let t = thread::spawn(move || routed.wake_with(9));
        t.join().unwrap();
        // the wake is parked in our queue until we dispatch
        assert!(!cp.is_signaled());
        assert!(cp.dispatch_wait_timeout(Timeout::after_ms(1000)));
        assert_eq!(cp.reason(), 9);
    }

    #[test]
    fn chain_falls_back_when_target_closed() {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            tx.send(DispatchFn::this_thread()).unwrap();
        })
        .join()
        .unwrap();
        let dead = rx.recv().unwrap();

        let ran = Arc::new(Mutex::new(false));
        let ran2 = ran.clone();
        let chained = DispatchFn::this_thread().chain(&dead);
        assert!(chained.dispatch(move || *ran2.lock() = true));
        drain_until(|| *ran.lock());
    }

    #[test]
    fn clear_queue_drops_pending() {
        let d = DispatchFn::this_thread();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            d.dispatch(move || log.lock().push(i));
        }
        assert!(d.dispatch_task(Task::clear_queue()));
        let log2 = log.clone();
        d.dispatch(move || log2.lock().push(99));
        drain_until(|| !log.lock().is_empty());
        assert_eq!(*log.lock(), vec![99]);
    }

    #[test]
    fn yield_outside_pool_is_refused() {
        assert!(!yield_now());
    }

    #[test]
    fn new_thread_runs_elsewhere() {
        let here = alert::this_thread_id();
        let (tx, rx) = mpsc::channel();
        assert!(DispatchFn::new_thread().dispatch(move || {
            tx.send(alert::this_thread_id()).unwrap();
        }));
        let there = rx.recv().unwrap();
        assert_ne!(here, there);
    }
}
