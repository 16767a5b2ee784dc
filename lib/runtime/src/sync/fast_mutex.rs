// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A user-space mutex built on the alert primitive.
//!
//! The lock is a Treiber-style stack of waiter slots: acquisition pushes a
//! slot carrying the waiter's [`Alert`]; release walks the stack to find the
//! next owner and wakes it. Idle, the lock is two null pointers — no kernel
//! object exists until there is contention, and even then the only system
//! interaction is the mailbox sleep.
//!
//! [`RawFastMutex`] exposes the bare lock/unlock protocol (the internal
//! building block of [`RecursiveMutex`](crate::sync::RecursiveMutex));
//! [`FastMutex`] wraps it around data with RAII guards.
//!
//! Fairness is LIFO with respect to queue insertion: the design privileges
//! throughput over strict FIFO.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::alert::{self, Alert};

struct Slot {
    next: *mut Slot,
    alert: Option<Alert>,
}

/// The raw lock. `unlock` without holding the lock is undefined; prefer
/// [`FastMutex`] unless you are building a primitive on top of this one.
pub struct RawFastMutex {
    /// Top of the waiter stack. Null iff unlocked.
    queue: AtomicPtr<Slot>,
    /// The slot that currently owns the lock; always the stack tail. Never
    /// dereferenced — the owning waiter may have left the slot's frame — only
    /// compared against.
    owner: AtomicPtr<Slot>,
}

unsafe impl Send for RawFastMutex {}
unsafe impl Sync for RawFastMutex {}

impl RawFastMutex {
    pub const fn new() -> Self {
        Self {
            queue: AtomicPtr::new(ptr::null_mut()),
            owner: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Acquire without waiting. Fails when any owner or waiter exists.
    pub fn try_lock(&self) -> bool {
        // the slot is only ever compared against, so its lifetime may end
        // with this frame
        let mut slot = Slot {
            next: ptr::null_mut(),
            alert: None,
        };
        let me: *mut Slot = &mut slot;
        if self
            .queue
            .compare_exchange(ptr::null_mut(), me, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.owner.store(me, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Acquire, sleeping through the alert mailbox under contention.
    pub fn lock(&self) {
        if !self.queue.load(Ordering::Acquire).is_null() || !self.try_lock() {
            self.lock_slow();
        }
    }

    fn lock_slow(&self) {
        let mut slot = Slot {
            next: ptr::null_mut(),
            alert: Some(Alert::this_thread()),
        };
        let me: *mut Slot = &mut slot;
        if self.push(me) {
            // the loop absorbs alerts aimed at other waits on this thread
            while self.owner.load(Ordering::Acquire) != me {
                alert::halt();
            }
        } else {
            self.owner.store(me, Ordering::Release);
        }
    }

    /// Push a slot; returns true when the stack was non-empty (the caller
    /// must wait for ownership), false when the push took an idle lock.
    fn push(&self, slot: *mut Slot) -> bool {
        let mut top = self.queue.load(Ordering::Acquire);
        loop {
            unsafe {
                (*slot).next = top;
            }
            match self
                .queue
                .compare_exchange_weak(top, slot, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return !top.is_null(),
                Err(current) => top = current,
            }
        }
    }

    /// Release. Must only be called by the current owner.
    pub fn unlock(&self) {
        let owner = self.owner.load(Ordering::Acquire);
        self.owner.store(ptr::null_mut(), Ordering::Release);
        if self
            .queue
            .compare_exchange(owner, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Waiters exist. The slot whose `next` is the old owner becomes
            // the new owner. The walk needs no lock: the stack grows only at
            // the top and the tail is stable until republished here. Waiter
            // slots stay alive while their threads spin, and the old owner
            // slot itself is never dereferenced.
            unsafe {
                let mut p = self.queue.load(Ordering::Acquire);
                while (*p).next != owner {
                    p = (*p).next;
                }
                // clone before publishing: ownership transfer may end the
                // slot's lifetime
                let notify = (*p).alert.clone();
                self.owner.store(p, Ordering::Release);
                if let Some(a) = notify {
                    a.wake();
                }
            }
        }
    }
}

impl Default for RawFastMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Data protected by a [`RawFastMutex`], accessed through RAII guards.
pub struct FastMutex<T = ()> {
    raw: RawFastMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for FastMutex<T> {}
unsafe impl<T: Send> Sync for FastMutex<T> {}

impl<T> FastMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawFastMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> FastMutexGuard<'_, T> {
        self.raw.lock();
        FastMutexGuard {
            lock: self,
            slot: None,
        }
    }

    pub fn try_lock(&self) -> Option<FastMutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(FastMutexGuard {
                lock: self,
                slot: None,
            })
        } else {
            None
        }
    }

    /// Queue for the lock and return immediately. The caller may do other
    /// work; ownership is guaranteed once the returned [`AsyncLock`] is
    /// converted into a guard (or by the time it is dropped).
    pub fn lock_async(&self) -> AsyncLock<'_, T> {
        let mut slot = Box::new(Slot {
            next: ptr::null_mut(),
            alert: Some(Alert::this_thread()),
        });
        let me: *mut Slot = &mut *slot;
        if !self.raw.push(me) {
            self.raw.owner.store(me, Ordering::Release);
        }
        AsyncLock {
            lock: self,
            slot: Some(slot),
            me,
        }
    }
}

impl<T: Default> Default for FastMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct FastMutexGuard<'a, T> {
    lock: &'a FastMutex<T>,
    /// Keeps an async acquisition's slot alive past the unlock: the slot
    /// address stays published in the lock until then, and a freed slot
    /// address could be reused by another thread's acquisition.
    slot: Option<Box<Slot>>,
}

impl<'a, T> FastMutexGuard<'a, T> {
    /// The mutex this guard locks; used to re-acquire after a release, e.g.
    /// by [`CondVar::unlock_and_wait`](crate::sync::CondVar::unlock_and_wait).
    pub fn mutex(&self) -> &'a FastMutex<T> {
        self.lock
    }
}

impl<T> Deref for FastMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FastMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for FastMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}

/// An in-flight queued acquisition started by [`FastMutex::lock_async`].
///
/// Queue membership cannot be withdrawn: dropping the handle waits for
/// ownership and then releases it immediately. Call [`AsyncLock::into_guard`]
/// to keep the lock.
pub struct AsyncLock<'a, T> {
    lock: &'a FastMutex<T>,
    slot: Option<Box<Slot>>,
    me: *mut Slot,
}

impl<'a, T> AsyncLock<'a, T> {
    /// True once ownership has been granted.
    pub fn is_acquired(&self) -> bool {
        self.lock.raw.owner.load(Ordering::Acquire) == self.me
    }

    fn wait_acquired(&self) {
        while !self.is_acquired() {
            alert::halt();
        }
    }

    /// Wait for ownership (if not yet granted) and keep the lock.
    pub fn into_guard(mut self) -> FastMutexGuard<'a, T> {
        self.wait_acquired();
        let lock = self.lock;
        let slot = self.slot.take();
        std::mem::forget(self);
        FastMutexGuard { lock, slot }
    }
}

impl<T> Drop for AsyncLock<'_, T> {
    fn drop(&mut self) {
        self.wait_acquired();
        self.lock.raw.unlock();
        // the boxed slot is freed after the unlock unpublished its address
    }
}
