// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! An elastic, queue-bounded thread pool.
//!
//! [`ThreadPool`] is the configuration: a builder whose [`start`] call brings
//! the pool to life and returns a [`DispatchFn`] for submitting work. Workers
//! are started on demand up to `max_threads` and retire after `idle_timeout`;
//! the submission queue holds at most `max_queue` tasks and pushes back on
//! submitters (optionally letting them drain their own dispatcher while they
//! wait). Dropping the last handle finishes the pool in the background: the
//! workers drain the queue, stop, and the `final_stop` alert fires when the
//! last of them is gone.
//!
//! [`start`]: ThreadPool::start

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use crate::alert::{self, Alert};
use crate::config::RuntimeConfig;
use crate::dispatch::{self, DispatchFn, Dispatcher, QueueControl, Task};
use crate::sync::{CondVar, FastMutex};
use crate::timeout::Timeout;

/// Thread pool configuration. Every setter returns the builder; settings are
/// frozen by [`ThreadPool::start`].
#[derive(Clone)]
pub struct ThreadPool {
    max_threads: usize,
    max_queue: usize,
    idle_timeout_ms: u64,
    queue_timeout_ms: u64,
    dispatch_on_wait: bool,
    max_yield_recursion: u32,
    thread_start: Option<Alert>,
    thread_stop: Option<Alert>,
    final_stop: Option<Alert>,
}

impl ThreadPool {
    /// Defaults: one worker per hardware thread, queue depth 1, one-second
    /// idle timeout, unbounded submission wait.
    pub fn new() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_queue: 1,
            idle_timeout_ms: 1000,
            queue_timeout_ms: 0,
            dispatch_on_wait: false,
            max_yield_recursion: 4,
            thread_start: None,
            thread_stop: None,
            final_stop: None,
        }
    }

    /// A builder seeded from the environment-layered [`RuntimeConfig`].
    pub fn from_settings() -> anyhow::Result<Self> {
        let cfg = RuntimeConfig::from_settings()?;
        cfg.validate()?;
        let mut pool = Self::new();
        if let Some(n) = cfg.max_threads {
            pool = pool.max_threads(n);
        }
        Ok(pool
            .max_queue(cfg.max_queue)
            .idle_timeout_ms(cfg.idle_timeout_ms)
            .queue_timeout_ms(cfg.queue_timeout_ms)
            .dispatch_on_wait(cfg.dispatch_on_wait)
            .max_yield_recursion(cfg.max_yield_recursion))
    }

    /// Upper bound on concurrent workers. Clamped to at least 1.
    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n.max(1);
        self
    }

    /// Maximum queued tasks before submitters block. Clamped to at least 1.
    pub fn max_queue(mut self, n: usize) -> Self {
        self.max_queue = n.max(1);
        self
    }

    /// How long an idle worker lingers before retiring; 0 means forever.
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// How long a submitter waits on a full queue before the submission is
    /// refused; 0 (the default) means wait forever.
    pub fn queue_timeout_ms(mut self, ms: u64) -> Self {
        self.queue_timeout_ms = ms;
        self
    }

    /// Let a submitter blocked on a full queue drain its own dispatcher,
    /// which avoids deadlocks when pool tasks call back into the submitter.
    pub fn dispatch_on_wait(mut self, enabled: bool) -> Self {
        self.dispatch_on_wait = enabled;
        self
    }

    /// Bound on [`yield_now`](crate::dispatch::yield_now) nesting inside
    /// pool tasks, limiting stack growth.
    pub fn max_yield_recursion(mut self, n: u32) -> Self {
        self.max_yield_recursion = n;
        self
    }

    /// Alert fired from each worker thread as it starts — a hook for
    /// per-thread initialization or monitoring.
    pub fn thread_start(mut self, alert: Alert) -> Self {
        self.thread_start = Some(alert);
        self
    }

    /// Alert fired from each worker thread as it exits.
    pub fn thread_stop(mut self, alert: Alert) -> Self {
        self.thread_stop = Some(alert);
        self
    }

    /// Alert fired once the pool is fully stopped: every handle dropped,
    /// every task finished, every worker gone. The way to join a pool.
    pub fn final_stop(mut self, alert: Alert) -> Self {
        self.final_stop = Some(alert);
        self
    }

    /// Start the pool. The returned handle submits tasks; dropping its last
    /// clone lets the pool drain and stop in the background.
    pub fn start(self) -> DispatchFn {
        let pool = PoolImpl::new(self);
        DispatchFn::from_dispatcher(Arc::new(PoolControl { pool }))
    }

    /// The task that clears the pending queue instead of queueing behind it.
    /// Running tasks are unaffected.
    pub fn clear_queue() -> Task {
        Task::clear_queue()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolState {
    queue: VecDeque<Task>,
    thread_count: usize,
    finishing: bool,
}

struct PoolImpl {
    cfg: ThreadPool,
    state: FastMutex<PoolState>,
    /// LIFO: the most recently idled worker has the warmest cache.
    worker_trigger: CondVar,
    /// FIFO: submitters blocked on a full queue are served in order.
    queue_trigger: CondVar,
    weak_self: Weak<PoolImpl>,
}

impl PoolImpl {
    fn new(cfg: ThreadPool) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            cfg,
            state: FastMutex::new(PoolState {
                queue: VecDeque::new(),
                thread_count: 0,
                finishing: false,
            }),
            worker_trigger: CondVar::new_lifo(),
            queue_trigger: CondVar::new(),
            weak_self: weak_self.clone(),
        })
    }

    fn submit(&self, task: Task) -> Result<(), Task> {
        let mut st = self.state.lock();
        if task.is_clear_queue() {
            st.queue.clear();
            return Ok(());
        }

        if st.queue.len() >= self.cfg.max_queue {
            let tm = if self.cfg.queue_timeout_ms == 0 {
                Timeout::never()
            } else {
                Timeout::after_ms(self.cfg.queue_timeout_ms)
            };
            let mut timed_out = false;
            while st.queue.len() >= self.cfg.max_queue && !timed_out {
                let ticket = self.queue_trigger.ticket();
                drop(st);
                while !ticket.alerted() && !timed_out {
                    timed_out = if self.cfg.dispatch_on_wait {
                        dispatch::sleep_and_dispatch(tm).is_none()
                    } else {
                        alert::sleep(tm).is_none()
                    };
                }
                drop(ticket);
                st = self.state.lock();
            }
            if st.queue.len() >= self.cfg.max_queue {
                tracing::debug!("pool submission timed out on a full queue");
                return Err(task);
            }
        }

        st.queue.push_back(task);
        // wake an idle worker; if none takes it and there is headroom,
        // grow the pool
        if !self.worker_trigger.notify_one() && st.thread_count < self.cfg.max_threads {
            st.thread_count += 1;
            if !self.spawn_worker() {
                st.thread_count -= 1;
            }
        }
        Ok(())
    }

    fn spawn_worker(&self) -> bool {
        let Some(me) = self.weak_self.upgrade() else {
            return false;
        };
        let spawned = std::thread::Builder::new()
            .name("slumber-pool-worker".into())
            .spawn(move || me.run_worker());
        match spawned {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to start pool worker");
                false
            }
        }
    }

    fn run_worker(self: Arc<Self>) {
        tracing::trace!("pool worker started");
        let ctl: Rc<dyn QueueControl> = Rc::new(WorkerQueueControl {
            pool: self.clone(),
            recursion: std::cell::Cell::new(0),
        });
        dispatch::set_queue_control(Some(ctl));

        if let Some(a) = &self.cfg.thread_start {
            a.wake();
        }
        self.worker_cycle();
        if let Some(a) = &self.cfg.thread_stop {
            a.wake();
        }

        dispatch::set_queue_control(None);
        tracing::trace!("pool worker stopped");
    }

    fn worker_cycle(&self) {
        loop {
            let mut st = self.state.lock();
            if st.queue.is_empty() && !st.finishing {
                let tm = if self.cfg.idle_timeout_ms == 0 {
                    Timeout::never()
                } else {
                    Timeout::after_ms(self.cfg.idle_timeout_ms)
                };
                while st.queue.is_empty() && !st.finishing {
                    let (notified, guard) = self.worker_trigger.unlock_and_wait_timeout(tm, st);
                    st = guard;
                    if !notified {
                        break;
                    }
                }
            }
            // reached with work available, on finish, or on idle timeout
            if let Some(task) = st.queue.pop_front() {
                self.queue_trigger.notify_one();
                drop(st);
                task.run();
            } else {
                st.thread_count -= 1;
                return;
            }
        }
    }

    /// Run one queued task inline on the calling worker.
    fn yield_one(&self, recursion: u32) -> bool {
        if recursion > self.cfg.max_yield_recursion {
            return false;
        }
        let mut st = self.state.lock();
        match st.queue.pop_front() {
            Some(task) => {
                self.queue_trigger.notify_one();
                drop(st);
                task.run();
                true
            }
            None => false,
        }
    }

    fn finish(&self) {
        tracing::debug!("pool finishing");
        let mut st = self.state.lock();
        st.finishing = true;
        drop(st);
        self.worker_trigger.notify_all();
    }
}

impl Drop for PoolImpl {
    fn drop(&mut self) {
        if let Some(a) = &self.cfg.final_stop {
            a.wake();
        }
    }
}

impl Dispatcher for PoolImpl {
    fn submit(&self, task: Task) -> Result<(), Task> {
        PoolImpl::submit(self, task)
    }
}

/// The user-facing handle. Dropping the last clone finishes the pool.
struct PoolControl {
    pool: Arc<PoolImpl>,
}

impl Dispatcher for PoolControl {
    fn submit(&self, task: Task) -> Result<(), Task> {
        self.pool.submit(task)
    }
}

impl Drop for PoolControl {
    fn drop(&mut self) {
        self.pool.finish();
    }
}

struct WorkerQueueControl {
    pool: Arc<PoolImpl>,
    recursion: std::cell::Cell<u32>,
}

impl QueueControl for WorkerQueueControl {
    fn yield_one(&self) -> bool {
        self.recursion.set(self.recursion.get() + 1);
        let ran = self.pool.yield_one(self.recursion.get());
        self.recursion.set(self.recursion.get() - 1);
        ran
    }

    fn dispatch_fn(&self) -> DispatchFn {
        DispatchFn::from_dispatcher(self.pool.clone())
    }
}
