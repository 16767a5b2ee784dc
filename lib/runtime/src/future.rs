// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared-state futures with observer chains.
//!
//! A [`Future`] and its [`Promise`]s share one internal: a value-or-failure
//! slot, an ordered observer list and a state machine
//! `Unresolved → Resolving → Resolved`. Observers fire exactly once each, in
//! insertion order, on the thread that resolves the promise; an observer
//! added after resolution fires immediately. Continuations built with
//! [`then`](Future::then) and friends are just observers resolving a
//! downstream future.
//!
//! Dropping the last [`Promise`] of an unresolved future resolves it with
//! [`Canceled`](crate::error::Canceled) — cancellation needs no extra
//! plumbing, it falls out of ownership. To run continuations on another
//! thread, route the chain through a dispatcher with [`Future::via`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::alert::{self, Alert};
use crate::error::{self, Failure};
use crate::sync::{Checkpoint, FastMutex};
use crate::timeout::Timeout;

/// A one-shot resolution callback. Exactly one of the two methods is invoked,
/// exactly once, without any internal lock held.
pub trait Observer<T>: Send {
    fn on_value(self: Box<Self>, value: &T);
    fn on_failure(self: Box<Self>, failure: &Failure);
}

struct FnObserver<T, F> {
    f: F,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, F> Observer<T> for FnObserver<T, F>
where
    F: FnOnce(Result<&T, &Failure>) + Send,
{
    fn on_value(self: Box<Self>, value: &T) {
        (self.f)(Ok(value));
    }

    fn on_failure(self: Box<Self>, failure: &Failure) {
        (self.f)(Err(failure));
    }
}

struct AlertObserver {
    alert: Alert,
    fired: Arc<AtomicBool>,
}

impl<T> Observer<T> for AlertObserver {
    fn on_value(self: Box<Self>, _: &T) {
        self.fired.store(true, Ordering::Release);
        self.alert.wake();
    }

    fn on_failure(self: Box<Self>, _: &Failure) {
        self.fired.store(true, Ordering::Release);
        self.alert.wake();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FutureState {
    Unresolved,
    /// Observers are being called; the value is not yet readable.
    Resolving,
    Resolved,
}

struct FutureInner<T> {
    state: FutureState,
    value: Option<T>,
    failure: Option<Failure>,
    observers: VecDeque<(u64, Box<dyn Observer<T>>)>,
    next_token: u64,
    /// All live handles, futures and promises together.
    fcnt: usize,
    /// Live promise handles; `pcnt <= fcnt`.
    pcnt: usize,
}

struct Shared<T> {
    inner: FastMutex<FutureInner<T>>,
}

impl<T> Shared<T> {
    fn resolve_value(&self, value: T)
    where
        T: Clone,
    {
        let mut inner = self.inner.lock();
        if inner.state != FutureState::Unresolved {
            return;
        }
        inner.state = FutureState::Resolving;
        if inner.fcnt > inner.pcnt {
            // a non-promise reader exists; keep the value for later reads
            inner.value = Some(value.clone());
        }
        loop {
            let observer = match inner.observers.pop_front() {
                Some((_, o)) => o,
                None => break,
            };
            drop(inner);
            observer.on_value(&value);
            inner = self.inner.lock();
        }
        inner.state = FutureState::Resolved;
    }

    fn resolve_failure(&self, failure: Failure) {
        let mut inner = self.inner.lock();
        if inner.state != FutureState::Unresolved {
            return;
        }
        inner.state = FutureState::Resolving;
        inner.failure = Some(failure.clone());
        loop {
            let observer = match inner.observers.pop_front() {
                Some((_, o)) => o,
                None => break,
            };
            drop(inner);
            observer.on_failure(&failure);
            inner = self.inner.lock();
        }
        inner.state = FutureState::Resolved;
    }

    /// Cancel instantly: no observer still in the list fires after this
    /// returns, unlike `resolve_failure(canceled())` which walks them.
    fn cancel(&self) {
        let failure = error::canceled();
        let drained = {
            let mut inner = self.inner.lock();
            if inner.state == FutureState::Resolved {
                return;
            }
            inner.state = FutureState::Resolved;
            inner.value = None;
            inner.failure = Some(failure.clone());
            std::mem::take(&mut inner.observers)
        };
        for (_, observer) in drained {
            observer.on_failure(&failure);
        }
    }

    /// Fire `observer` immediately when resolved. Requires the lock to be
    /// dropped around the callback, so the resolution is cloned out first.
    fn fire_resolved(&self, observer: Box<dyn Observer<T>>)
    where
        T: Clone,
    {
        let (value, failure) = {
            let inner = self.inner.lock();
            (inner.value.clone(), inner.failure.clone())
        };
        match (failure, value) {
            (Some(f), _) => observer.on_failure(&f),
            (None, Some(v)) => observer.on_value(&v),
            // resolved without a stored value: nothing to report but the
            // cancellation
            (None, None) => observer.on_failure(&error::canceled()),
        }
    }

    fn add_observer(&self, observer: Box<dyn Observer<T>>) -> u64
    where
        T: Clone,
    {
        let mut inner = self.inner.lock();
        if inner.state == FutureState::Resolved {
            drop(inner);
            self.fire_resolved(observer);
            return 0;
        }
        inner.next_token += 1;
        let token = inner.next_token;
        inner.observers.push_back((token, observer));
        token
    }
}

/// A handle to a shared eventual value. Clones share the same internal;
/// equality is identity.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

/// The resolving side of a [`Future`]. Dropping the last promise of an
/// unresolved future cancels it.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Future<T> {
    /// An unresolved future. Pair it with [`Future::get_promise`].
    pub fn new() -> Self {
        Future {
            shared: Arc::new(Shared {
                inner: FastMutex::new(FutureInner {
                    state: FutureState::Unresolved,
                    value: None,
                    failure: None,
                    observers: VecDeque::new(),
                    next_token: 0,
                    fcnt: 1,
                    pcnt: 0,
                }),
            }),
        }
    }

    /// A promise resolving this future. May be called repeatedly; promises
    /// are also cloneable.
    pub fn get_promise(&self) -> Promise<T> {
        let mut inner = self.shared.inner.lock();
        inner.fcnt += 1;
        inner.pcnt += 1;
        drop(inner);
        Promise {
            shared: self.shared.clone(),
        }
    }

    /// True when a promise exists or the future is already resolved — i.e.
    /// waiting on it can terminate.
    pub fn has_promise(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.pcnt > 0 || inner.state != FutureState::Unresolved
    }

    /// True while a resolution is still outstanding.
    pub fn is_pending(&self) -> bool {
        let inner = self.shared.inner.lock();
        (inner.pcnt > 0 || inner.state != FutureState::Unresolved)
            && inner.state != FutureState::Resolved
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.inner.lock().state == FutureState::Resolved
    }

    /// The failure of a failed future; `None` while pending or on success.
    pub fn error(&self) -> Option<Failure> {
        self.shared.inner.lock().failure.clone()
    }
}

impl<T: Send + Clone + 'static> Future<T> {
    /// An already-resolved future.
    pub fn ready(value: T) -> Self {
        let f = Future::new();
        f.get_promise().set_value(value);
        f
    }

    /// A future resolved with the given error.
    pub fn from_error(err: impl Into<anyhow::Error>) -> Self {
        let f = Future::new();
        f.get_promise().set_error(err);
        f
    }

    /// The stored value of a successfully resolved future, if any.
    pub fn try_value(&self) -> Option<T> {
        self.shared.inner.lock().value.clone()
    }

    /// Add a resolution observer; returns a token for
    /// [`remove_observer`](Self::remove_observer). A resolved future fires
    /// the observer immediately (token 0).
    pub fn add_observer<O>(&self, observer: O) -> u64
    where
        O: Observer<T> + 'static,
    {
        self.shared.add_observer(Box::new(observer))
    }

    /// Add an observer only while unresolved, guaranteeing it will not run
    /// in the calling thread. Returns false on a resolved future.
    pub fn add_observer_if_pending<O>(&self, observer: O) -> bool
    where
        O: Observer<T> + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state == FutureState::Resolved {
            return false;
        }
        inner.next_token += 1;
        let token = inner.next_token;
        inner.observers.push_back((token, Box::new(observer)));
        true
    }

    /// Fire `observer` only if already resolved. Returns false otherwise.
    pub fn call_observer<O>(&self, observer: O) -> bool
    where
        O: Observer<T> + 'static,
    {
        {
            let inner = self.shared.inner.lock();
            if inner.state != FutureState::Resolved {
                return false;
            }
        }
        self.shared.fire_resolved(Box::new(observer));
        true
    }

    /// Unlink a not-yet-fired observer by its token.
    pub fn remove_observer(&self, token: u64) -> bool {
        let mut inner = self.shared.inner.lock();
        match inner.observers.iter().position(|(t, _)| *t == token) {
            Some(pos) => {
                inner.observers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Observe with a closure receiving the resolution.
    pub fn observe<F>(&self, f: F) -> u64
    where
        F: FnOnce(Result<&T, &Failure>) + Send + 'static,
    {
        self.shared.add_observer(Box::new(FnObserver {
            f,
            _marker: std::marker::PhantomData,
        }))
    }

    /// Park the calling thread until the future resolves.
    pub fn wait(&self) {
        if self.is_resolved() {
            return;
        }
        let fired = Arc::new(AtomicBool::new(false));
        self.add_observer(AlertObserver {
            alert: Alert::this_thread(),
            fired: fired.clone(),
        });
        while !fired.load(Ordering::Acquire) {
            alert::halt();
        }
    }

    /// Park until resolution or `tm`. Returns false on deadline expiry.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        if self.is_resolved() {
            return true;
        }
        let fired = Arc::new(AtomicBool::new(false));
        let token = self.add_observer(AlertObserver {
            alert: Alert::this_thread(),
            fired: fired.clone(),
        });
        while !fired.load(Ordering::Acquire) {
            if alert::sleep(tm).is_none() {
                self.remove_observer(token);
                return fired.load(Ordering::Acquire) || self.is_resolved();
            }
        }
        true
    }

    /// Wait for resolution and return the value, or the failure. A future
    /// canceled without a stored value reports
    /// [`Canceled`](crate::error::Canceled).
    pub fn get(&self) -> Result<T, Failure> {
        self.wait();
        let inner = self.shared.inner.lock();
        if let Some(f) = &inner.failure {
            return Err(f.clone());
        }
        if let Some(v) = &inner.value {
            return Ok(v.clone());
        }
        Err(error::canceled())
    }

    /// A new future mirroring this one, with its own observer list and
    /// resolution state — canceling the isolate leaves the original alone.
    pub fn isolate(&self) -> Future<T> {
        let out = Future::new();
        out.get_promise().set_future(self);
        out
    }

    /// Resolve immediately with [`Canceled`](crate::error::Canceled),
    /// atomically discarding pending observers: none that was still listed
    /// fires after this returns. Contrast with resolving through
    /// [`Promise::set_error`], which walks the observers in order.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Continue on the value path; failures propagate past `f` untouched.
    pub fn then<U, F>(&self, f: F) -> Future<U>
    where
        U: Send + Clone + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let out = Future::new();
        let promise = out.get_promise();
        self.observe(move |res| match res {
            Ok(v) => promise.set_value(f(v.clone())),
            Err(e) => promise.set_failure(e.clone()),
        });
        out
    }

    /// Like [`then`](Self::then) for fallible continuations: an `Err` fails
    /// the downstream future.
    pub fn then_try<U, F>(&self, f: F) -> Future<U>
    where
        U: Send + Clone + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        let out = Future::new();
        let promise = out.get_promise();
        self.observe(move |res| match res {
            Ok(v) => match f(v.clone()) {
                Ok(u) => promise.set_value(u),
                Err(e) => promise.set_error(e),
            },
            Err(e) => promise.set_failure(e.clone()),
        });
        out
    }

    /// Continue with a future-returning function; the downstream future
    /// adopts the returned future's eventual resolution.
    pub fn then_future<U, F>(&self, f: F) -> Future<U>
    where
        U: Send + Clone + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let out = Future::new();
        let promise = out.get_promise();
        self.observe(move |res| match res {
            Ok(v) => promise.set_future(&f(v.clone())),
            Err(e) => promise.set_failure(e.clone()),
        });
        out
    }

    /// Recover from a failure into a value of the same type; values pass
    /// through untouched.
    pub fn on_error<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(&Failure) -> anyhow::Result<T> + Send + 'static,
    {
        let out = Future::new();
        let promise = out.get_promise();
        self.observe(move |res| match res {
            Ok(v) => promise.set_value(v.clone()),
            Err(e) => match f(e) {
                Ok(v) => promise.set_value(v),
                Err(e2) => promise.set_error(e2),
            },
        });
        out
    }

    /// Observe the value without consuming it; the returned future is this
    /// one. Failures skip `f`.
    pub fn inspect<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.observe(move |res| {
            if let Ok(v) = res {
                f(v);
            }
        });
        self.clone()
    }

    /// Run `f` on either resolution path, discarding the outcome; the
    /// returned future is this one.
    pub fn on_settle<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.observe(move |_| f());
        self.clone()
    }

    /// Fire `alert` when the future resolves, either way.
    pub fn notify(&self, alert: Alert) -> Future<T> {
        self.on_settle(move || alert.wake())
    }

    /// Signal `checkpoint` when the future resolves, either way.
    pub fn notify_checkpoint(&self, checkpoint: &Checkpoint) -> Future<T> {
        self.notify(checkpoint.alert())
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        self.shared.inner.lock().fcnt += 1;
        Future {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        self.shared.inner.lock().fcnt -= 1;
    }
}

impl<T> PartialEq for Future<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Eq for Future<T> {}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Clone + 'static> Promise<T> {
    /// Resolve with a value. A no-op once the future left the unresolved
    /// state; resolution is first-writer-wins.
    pub fn set_value(&self, value: T) {
        self.shared.resolve_value(value);
    }

    /// Resolve with whatever `source` eventually resolves to.
    pub fn set_future(&self, source: &Future<T>) {
        let me = self.clone();
        source.observe(move |res| match res {
            Ok(v) => me.set_value(v.clone()),
            Err(e) => me.set_failure(e.clone()),
        });
    }

    /// Resolve with an error.
    pub fn set_error(&self, err: impl Into<anyhow::Error>) {
        self.shared.resolve_failure(error::failure(err));
    }

    /// Resolve with an existing (possibly shared) failure.
    pub fn set_failure(&self, failure: Failure) {
        self.shared.resolve_failure(failure);
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        let mut inner = self.shared.inner.lock();
        inner.fcnt += 1;
        inner.pcnt += 1;
        drop(inner);
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let cancel = {
            let mut inner = self.shared.inner.lock();
            inner.pcnt -= 1;
            inner.fcnt -= 1;
            inner.pcnt == 0 && inner.state == FutureState::Unresolved
        };
        if cancel {
            tracing::trace!("last promise dropped unresolved, canceling the future");
            self.shared.resolve_failure(error::canceled());
        }
    }
}

impl<T> PartialEq for Promise<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Eq for Promise<T> {}

/// Run `f` on a fresh detached thread; the returned future resolves with its
/// result. A panic in `f` unwinds the promise and cancels the future.
pub fn spawn<R, F>(f: F) -> Future<R>
where
    R: Send + Clone + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let fut = Future::new();
    let promise = fut.get_promise();
    if let Err(e) = std::thread::Builder::new()
        .name("slumber-spawn".into())
        .spawn(move || promise.set_value(f()))
    {
        // the promise died with the closure; the future is already canceled
        tracing::error!(error = %e, "failed to spawn future thread");
    }
    fut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_canceled;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn ready_value_round_trip() {
        let f = Future::ready(42u32);
        assert!(f.is_resolved());
        assert_eq!(f.get().unwrap(), 42);
        // repeat reads see the stored value
        assert_eq!(f.get().unwrap(), 42);
        assert_eq!(f.try_value(), Some(42));
    }

    #[test]
    fn error_round_trip() {
        let f = Future::<u32>::from_error(anyhow::anyhow!("boom"));
        let err = f.get().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(f.try_value().is_none());
        assert!(f.error().is_some());
    }

    #[test]
    fn resolve_after_observers_and_waiters() {
        let f = Future::<u32>::new();
        let p = f.get_promise();
        let f2 = f.clone();
        let t = thread::spawn(move || f2.get().unwrap());
        thread::sleep(std::time::Duration::from_millis(20));
        p.set_value(7);
        assert_eq!(t.join().unwrap(), 7);
        // late reads still succeed
        assert_eq!(f.get().unwrap(), 7);
    }

    #[test]
    fn observers_fire_in_insertion_order() {
        let f = Future::<u32>::new();
        let p = f.get_promise();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = log.clone();
            f.observe(move |_| log.lock().push(i));
        }
        p.set_value(0);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn late_observer_fires_immediately() {
        let f = Future::ready(5u32);
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        f.observe(move |res| log2.lock().push(*res.unwrap()));
        assert_eq!(*log.lock(), vec![5]);
    }

    #[test]
    fn dropping_last_promise_cancels() {
        let f = Future::<u32>::new();
        {
            let _p = f.get_promise();
            assert!(f.is_pending());
        }
        assert!(f.is_resolved());
        assert!(is_canceled(&f.get().unwrap_err()));
    }

    #[test]
    fn cancel_discards_pending_observers() {
        let f = Future::<u32>::new();
        let _p = f.get_promise();
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        f.observe(move |res| {
            log2.lock().push(if res.is_ok() { "value" } else { "failure" });
        });
        f.cancel();
        assert_eq!(*log.lock(), vec!["failure"]);
        assert!(is_canceled(&f.get().unwrap_err()));
        // the promise can no longer interfere
        _p.set_value(1);
        assert!(is_canceled(&f.get().unwrap_err()));
    }

    #[test]
    fn removed_observer_never_fires() {
        let f = Future::<u32>::new();
        let p = f.get_promise();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let token = f.observe(move |_| log2.lock().push(1));
        assert!(f.remove_observer(token));
        p.set_value(0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn then_transforms_and_propagates_failure() {
        let doubled = Future::ready(21u32).then(|v| v * 2);
        assert_eq!(doubled.get().unwrap(), 42);

        let skipped = Future::<u32>::from_error(anyhow::anyhow!("bad"))
            .then(|v| v + 1);
        assert_eq!(skipped.get().unwrap_err().to_string(), "bad");
    }

    #[test]
    fn on_error_recovers() {
        let recovered = Future::<u32>::from_error(anyhow::anyhow!("bad"))
            .on_error(|_| Ok(9));
        assert_eq!(recovered.get().unwrap(), 9);

        let untouched = Future::ready(1u32).on_error(|_| Ok(9));
        assert_eq!(untouched.get().unwrap(), 1);
    }

    #[test]
    fn then_future_adopts_inner_resolution() {
        let f = Future::ready(3u32).then_future(|v| {
            let inner = Future::<u32>::new();
            let p = inner.get_promise();
            thread::spawn(move || p.set_value(v + 10));
            inner
        });
        assert_eq!(f.get().unwrap(), 13);
    }

    #[test]
    fn isolate_detaches_cancellation() {
        let f = Future::<u32>::new();
        let p = f.get_promise();
        let iso = f.isolate();
        iso.cancel();
        p.set_value(4);
        assert_eq!(f.get().unwrap(), 4);
        assert!(is_canceled(&iso.get().unwrap_err()));
    }

    #[test]
    fn wait_timeout_expires_on_pending() {
        let f = Future::<u32>::new();
        let _p = f.get_promise();
        assert!(!f.wait_timeout(Timeout::after_ms(10)));
        assert!(f.is_pending());
    }

    #[test]
    fn state_queries() {
        let bare = Future::<u32>::new();
        assert!(!bare.has_promise());
        assert!(!bare.is_pending());
        let p = bare.get_promise();
        assert!(bare.has_promise());
        assert!(bare.is_pending());
        p.set_value(1);
        assert!(bare.has_promise());
        assert!(!bare.is_pending());
        assert!(bare.is_resolved());
    }

    #[test]
    fn spawn_resolves_from_thread() {
        let f = spawn(|| 6 * 7);
        assert_eq!(f.get().unwrap(), 42);
    }

    #[test]
    fn set_error_walks_observers_in_order() {
        let f = Future::<u32>::new();
        let p = f.get_promise();
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            f.observe(move |res| {
                assert!(res.is_err());
                log.lock().push(i);
            });
        }
        p.set_error(anyhow::anyhow!("down"));
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }
}
