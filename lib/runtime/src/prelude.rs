// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Convenience re-exports for applications building on the crate.

pub use crate::alert::{halt, sleep, this_thread_id, Alert};
pub use crate::dispatch::{halt_and_dispatch, sleep_and_dispatch, yield_now, DispatchFn, Task};
pub use crate::dispatched::DispatchedFuture;
pub use crate::error::{failure, is_canceled, Canceled, Failure};
pub use crate::future::{spawn, Future, Promise};
pub use crate::pool::ThreadPool;
pub use crate::scheduler::{at, Scheduler};
pub use crate::sync::{
    Checkpoint, CondVar, CountGate, FastMutex, Gate, RecursiveMutex, RwMutex, Semaphore,
};
pub use crate::timeout::Timeout;
