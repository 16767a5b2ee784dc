// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Blocking synchronization primitives built on the alert mailbox and the
//! wait-queue discipline.

mod checkpoint;
mod condvar;
mod fast_mutex;
mod gate;
mod recursive;
mod rwmutex;
mod semaphore;

pub use checkpoint::Checkpoint;
pub use condvar::CondVar;
pub use fast_mutex::{AsyncLock, FastMutex, FastMutexGuard, RawFastMutex};
pub use gate::{CountGate, Gate};
pub use recursive::{RecursiveMutex, ThreadId};
pub use rwmutex::RwMutex;
pub use semaphore::Semaphore;
