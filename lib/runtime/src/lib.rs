// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Slumber
//!
//! Cooperative concurrency primitives for native threads, built on a single
//! abstraction: the per-thread wake-up mailbox (the [`Alert`]). On top of it
//! sit user-space blocking primitives ([`sync`]), per-thread function queues
//! and their composition ([`dispatch`]), an elastic thread [`pool`], a
//! deadline [`scheduler`], and a [`future`]/promise layer whose continuation
//! chains can be routed into any dispatcher
//! ([`Future::via`](future::Future::via)).
//!
//! Everything runs on preemptive OS threads — there is no event loop and no
//! green-thread runtime. Callbacks and observers execute on the thread that
//! resolves the promise or services the dispatcher. Waits are parameterized
//! by [`Timeout`]; timeouts and refusals are reported as values, never as
//! panics.

pub use anyhow::{Error, Result};

pub mod alert;
pub mod config;
pub mod dispatch;
pub mod dispatched;
pub mod error;
pub mod future;
pub mod logging;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod timeout;

pub use alert::{halt, sleep, this_thread_id, Alert};
pub use config::RuntimeConfig;
pub use dispatch::{halt_and_dispatch, sleep_and_dispatch, yield_now, DispatchFn, Task};
pub use dispatched::DispatchedFuture;
pub use error::{failure, is_canceled, Canceled, Failure};
pub use future::{spawn, Future, Promise};
pub use pool::ThreadPool;
pub use scheduler::{at, Scheduler};
pub use timeout::Timeout;
