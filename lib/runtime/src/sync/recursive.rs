// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A recursive mutex over [`RawFastMutex`] with explicit ownership transfer.
//!
//! The lock tracks its owner by the opaque per-thread id, so re-entry by the
//! owner increments a counter instead of deadlocking. Ownership can be handed
//! to another thread with [`RecursiveMutex::set_owner`]; the recursion count
//! can be parked and restored across a full release with
//! [`RecursiveMutex::unlock_save_recursion`] /
//! [`RecursiveMutex::lock_restore_recursion`].

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::alert;
use crate::sync::fast_mutex::RawFastMutex;

/// Opaque identity of a thread, as assigned by
/// [`this_thread_id`](crate::alert::this_thread_id). Nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The calling thread's identity.
    pub fn current() -> Self {
        Self(alert::this_thread_id())
    }
}

pub struct RecursiveMutex {
    raw: RawFastMutex,
    /// Owner's thread id; 0 when unowned.
    owner: AtomicUsize,
    recursion: AtomicU32,
}

impl RecursiveMutex {
    pub const fn new() -> Self {
        Self {
            raw: RawFastMutex::new(),
            owner: AtomicUsize::new(0),
            recursion: AtomicU32::new(0),
        }
    }

    /// Acquire, counting re-entry by the owning thread.
    pub fn lock(&self) {
        let me = alert::this_thread_id();
        if self.raw.try_lock() {
            self.claim(me);
            return;
        }
        if self.owner.load(Ordering::Acquire) == me {
            // only the owner mutates the counter while the lock is held
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.raw.lock();
        self.claim(me);
    }

    /// Acquire without waiting. Re-entry by the owner succeeds and counts.
    pub fn try_lock(&self) -> bool {
        let me = alert::this_thread_id();
        if self.raw.try_lock() {
            self.claim(me);
            return true;
        }
        if self.owner.load(Ordering::Acquire) == me {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Release one level. The lock is freed when unlocks match the locks.
    /// A call from a non-owner (or with no recursion outstanding) is ignored.
    pub fn unlock(&self) {
        let me = alert::this_thread_id();
        if self.owner.load(Ordering::Acquire) != me
            || self.recursion.load(Ordering::Acquire) == 0
        {
            return;
        }
        if self.recursion.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.store(0, Ordering::Release);
            self.raw.unlock();
        }
    }

    /// Fully release regardless of depth, returning the recursion count for a
    /// later [`Self::lock_restore_recursion`]. Returns 0 (and does nothing)
    /// when the caller is not the owner.
    pub fn unlock_save_recursion(&self) -> u32 {
        let me = alert::this_thread_id();
        if self.owner.load(Ordering::Acquire) != me {
            return 0;
        }
        let saved = self.recursion.load(Ordering::Acquire);
        self.recursion.store(0, Ordering::Release);
        self.owner.store(0, Ordering::Release);
        self.raw.unlock();
        saved
    }

    /// Re-acquire and restore a saved recursion count.
    ///
    /// With `try_only` the underlying lock is try-acquired and failure (the
    /// lock is owned, by anyone) returns false. Without it the call blocks;
    /// it still fails when the calling thread already held the lock, since
    /// the saved count cannot then be restored.
    pub fn lock_restore_recursion(&self, count: u32, try_only: bool) -> bool {
        if count == 0 {
            return true;
        }
        let me = alert::this_thread_id();
        if try_only {
            if !self.raw.try_lock() {
                return false;
            }
            self.owner.store(me, Ordering::Release);
            self.recursion.store(count, Ordering::Release);
            return true;
        }
        self.lock();
        if self.recursion.load(Ordering::Acquire) != 1 {
            self.unlock();
            return false;
        }
        self.recursion.store(count, Ordering::Release);
        true
    }

    /// Reassign ownership without touching the underlying lock. The new owner
    /// owes the same number of unlocks. Fails when the caller is not the
    /// current owner.
    pub fn set_owner(&self, new_owner: ThreadId) -> bool {
        let me = alert::this_thread_id();
        if self.owner.load(Ordering::Acquire) != me {
            return false;
        }
        self.owner.store(new_owner.0, Ordering::Release);
        true
    }

    fn claim(&self, me: usize) {
        self.owner.store(me, Ordering::Release);
        self.recursion.store(1, Ordering::Release);
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
