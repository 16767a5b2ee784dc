// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types shared across the crate.
//!
//! Timeouts and refusals are reported through return values (`Option`/`bool`),
//! never through panics; the only typed error a user observes from a future is
//! [`Canceled`], carried inside a [`Failure`].

use std::sync::Arc;

use thiserror::Error;

/// The failure payload of a resolved future.
///
/// Shared and cloneable so a single failure can be streamed through every
/// observer of a future and through every downstream chain stage.
pub type Failure = Arc<anyhow::Error>;

/// A promise was dropped before resolution, a future was canceled, or a
/// dispatched continuation was discarded because its target thread was gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise has been canceled")]
pub struct Canceled;

/// Wrap any error into a [`Failure`].
pub fn failure(err: impl Into<anyhow::Error>) -> Failure {
    Arc::new(err.into())
}

/// The [`Failure`] every cancellation path resolves with.
pub(crate) fn canceled() -> Failure {
    failure(Canceled)
}

/// True when a failure is a cancellation rather than a user error.
pub fn is_canceled(failure: &Failure) -> bool {
    failure.downcast_ref::<Canceled>().is_some()
}
