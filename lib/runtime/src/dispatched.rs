// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Future chains routed through a dispatcher.
//!
//! [`Future::via`] opens a [`DispatchedFuture`] builder: every continuation
//! added to it extends a chain that will run in the dispatcher's thread, not
//! the resolver's. The builder attaches a *single* observer to the source
//! future — on first use as a future, or at drop — which submits a task
//! carrying the resolution; the task resolves the chain head inside the
//! dispatcher. Even an already-resolved source therefore never runs the
//! chain synchronously in the caller.
//!
//! The submitted task owns the head promise. If the dispatcher refuses or is
//! closed before the task runs, the task is dropped and the whole chain
//! resolves with [`Canceled`](crate::error::Canceled).

use crate::dispatch::DispatchFn;
use crate::error::Failure;
use crate::future::{Future, Observer};
use crate::timeout::Timeout;

struct Link<T: Send + Clone + 'static> {
    source: Future<T>,
    head: Future<T>,
    dispatcher: DispatchFn,
}

impl<T: Send + Clone + 'static> Link<T> {
    /// Attach the source observer once. Idempotence rides on the head's
    /// promise count: the first connect takes the head promise, after which
    /// `has_promise` reports true.
    fn connect(&self) {
        if self.head.has_promise() {
            return;
        }
        let promise = self.head.get_promise();
        let dispatcher = self.dispatcher.clone();
        self.source.observe(move |res| match res {
            Ok(value) => {
                let value = value.clone();
                dispatcher.dispatch(move || promise.set_value(value));
            }
            Err(failure) => {
                let failure = failure.clone();
                dispatcher.dispatch(move || promise.set_failure(failure));
            }
        });
    }
}

impl<T: Send + Clone + 'static> Drop for Link<T> {
    fn drop(&mut self) {
        self.connect();
    }
}

/// A pending chain destined for a dispatcher; built by [`Future::via`].
///
/// `T` is the source future's type, `U` the chain's current end type. The
/// chain is not yet attached to the source while being built; it attaches on
/// [`future`](DispatchedFuture::future), [`wait`](DispatchedFuture::wait),
/// [`get`](DispatchedFuture::get) or drop.
pub struct DispatchedFuture<T: Send + Clone + 'static, U = T> {
    link: Link<T>,
    tail: Future<U>,
}

impl<T: Send + Clone + 'static> Future<T> {
    /// Route this future's continuations through `dispatcher`.
    pub fn via(&self, dispatcher: DispatchFn) -> DispatchedFuture<T> {
        let head = Future::new();
        DispatchedFuture {
            tail: head.clone(),
            link: Link {
                source: self.clone(),
                head,
                dispatcher,
            },
        }
    }
}

impl<T, U> DispatchedFuture<T, U>
where
    T: Send + Clone + 'static,
    U: Send + Clone + 'static,
{
    /// Extend the chain on the value path.
    pub fn then<V, F>(self, f: F) -> DispatchedFuture<T, V>
    where
        V: Send + Clone + 'static,
        F: FnOnce(U) -> V + Send + 'static,
    {
        let tail = self.tail.then(f);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Extend the chain with a fallible continuation.
    pub fn then_try<V, F>(self, f: F) -> DispatchedFuture<T, V>
    where
        V: Send + Clone + 'static,
        F: FnOnce(U) -> anyhow::Result<V> + Send + 'static,
    {
        let tail = self.tail.then_try(f);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Extend the chain with a recovery stage.
    pub fn on_error<F>(self, f: F) -> DispatchedFuture<T, U>
    where
        F: FnOnce(&Failure) -> anyhow::Result<U> + Send + 'static,
    {
        let tail = self.tail.on_error(f);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Observe the chain value in the dispatcher's thread.
    pub fn inspect<F>(self, f: F) -> DispatchedFuture<T, U>
    where
        F: FnOnce(&U) + Send + 'static,
    {
        let tail = self.tail.inspect(f);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Run `f` in the dispatcher's thread on either resolution path.
    pub fn on_settle<F>(self, f: F) -> DispatchedFuture<T, U>
    where
        F: FnOnce() + Send + 'static,
    {
        let tail = self.tail.on_settle(f);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Fire `alert` from the dispatcher's thread when the chain settles.
    pub fn notify(self, alert: crate::alert::Alert) -> DispatchedFuture<T, U> {
        let tail = self.tail.notify(alert);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Signal `checkpoint` from the dispatcher's thread when the chain
    /// settles.
    pub fn notify_checkpoint(
        self,
        checkpoint: &crate::sync::Checkpoint,
    ) -> DispatchedFuture<T, U> {
        let tail = self.tail.notify_checkpoint(checkpoint);
        DispatchedFuture {
            link: self.link,
            tail,
        }
    }

    /// Close the builder: connect to the source and return the chain's end.
    pub fn future(self) -> Future<U> {
        self.link.connect();
        self.tail.clone()
    }

    /// Connect and wait for the chain to settle.
    pub fn wait(&self) {
        self.link.connect();
        self.tail.wait();
    }

    /// Connect and wait up to `tm`. Returns false on deadline expiry.
    pub fn wait_timeout(&self, tm: Timeout) -> bool {
        self.link.connect();
        self.tail.wait_timeout(tm)
    }

    /// Connect, wait, and return the chain's resolution.
    pub fn get(&self) -> Result<U, Failure> {
        self.link.connect();
        self.tail.get()
    }

    /// Connect and add an observer on the chain's end.
    pub fn add_observer<O>(&self, observer: O) -> u64
    where
        O: Observer<U> + 'static,
    {
        self.link.connect();
        self.tail.add_observer(observer)
    }

    pub fn is_resolved(&self) -> bool {
        self.tail.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert;
    use crate::dispatch::DispatchFn;
    use crate::error::is_canceled;
    use crate::sync::Checkpoint;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::mpsc;

    #[test]
    fn chain_runs_in_dispatcher_thread() {
        let caller = alert::this_thread_id();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let seen3 = seen.clone();
        // the source is already resolved; the chain must still hop threads
        let out = Future::ready(42u32)
            .via(DispatchFn::new_dispatch_thread())
            .then(move |v| {
                seen2.lock().push(alert::this_thread_id());
                v + 1
            })
            .then(move |v| {
                seen3.lock().push(alert::this_thread_id());
                v + 1
            })
            .future();
        assert_eq!(out.get().unwrap(), 44);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], caller);
        // both stages ran on the same dispatcher thread
        assert_eq!(seen[0], seen[1]);
    }

    #[test]
    fn resolved_source_never_runs_chain_synchronously() {
        let ran_inline = Arc::new(Mutex::new(false));
        let ran2 = ran_inline.clone();
        let d = DispatchFn::this_thread();
        let chained = Future::ready(1u32).via(d).then(move |v| {
            *ran2.lock() = true;
            v
        });
        // not connected yet, and once connected the task only runs when this
        // thread dispatches
        let fut = chained.future();
        assert!(!*ran_inline.lock());
        while !fut.is_resolved() {
            crate::dispatch::sleep_and_dispatch(Timeout::after_ms(1000));
        }
        assert!(*ran_inline.lock());
    }

    #[test]
    fn closed_dispatcher_cancels_the_chain() {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            tx.send(DispatchFn::this_thread()).unwrap();
        })
        .join()
        .unwrap();
        let dead = rx.recv().unwrap();
        let out = Future::ready(5u32).via(dead).then(|v| v).future();
        assert!(is_canceled(&out.get().unwrap_err()));
    }

    #[test]
    fn drop_connects_the_chain() {
        let cp = Checkpoint::new();
        let fut = Future::<u32>::new();
        let p = fut.get_promise();
        {
            let _builder = fut
                .via(DispatchFn::new_dispatch_thread())
                .notify_checkpoint(&cp);
            // builder dropped here: chain connected
        }
        p.set_value(3);
        assert!(cp.wait_timeout(Timeout::after_ms(2000)));
    }

    #[test]
    fn failure_travels_through_the_dispatcher() {
        let out = Future::<u32>::from_error(anyhow::anyhow!("nope"))
            .via(DispatchFn::new_dispatch_thread())
            .on_error(|e| {
                assert_eq!(e.to_string(), "nope");
                Ok(8)
            })
            .future();
        assert_eq!(out.get().unwrap(), 8);
    }
}
