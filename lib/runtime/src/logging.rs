// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup.
//!
//! Filters come from the `SLUMBER_LOG` environment variable (standard
//! `tracing_subscriber::EnvFilter` syntax, e.g.
//! `SLUMBER_LOG=slumber_runtime=trace`); the default level is `info`.
//! Initialization is idempotent and never panics when another subscriber is
//! already installed, so tests and embedding applications can both call it
//! freely.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter
const FILTER_ENV: &str = "SLUMBER_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

static INIT: Once = Once::new();

/// Install the global tracing subscriber once.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        tracing::debug!("logging initialized twice without panicking");
    }
}
