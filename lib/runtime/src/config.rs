// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment-layered runtime settings.
//!
//! [`RuntimeConfig::from_settings`] layers `SLUMBER_`-prefixed environment
//! variables over the defaults, e.g. `SLUMBER_MAX_THREADS=8` or
//! `SLUMBER_DISPATCH_ON_WAIT=true`. The config seeds
//! [`ThreadPool::from_settings`](crate::pool::ThreadPool::from_settings).

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Tunables for the execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker ceiling for pools; `None` means hardware parallelism.
    pub max_threads: Option<usize>,
    /// Pending-task bound for pools (minimum 1).
    pub max_queue: usize,
    /// Idle worker lifetime in milliseconds; 0 keeps workers forever.
    pub idle_timeout_ms: u64,
    /// Submission wait bound in milliseconds; 0 waits forever.
    pub queue_timeout_ms: u64,
    /// Let blocked submitters drain their own dispatcher.
    pub dispatch_on_wait: bool,
    /// Nesting bound for inline yields inside pool tasks.
    pub max_yield_recursion: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            max_queue: 1,
            idle_timeout_ms: 1000,
            queue_timeout_ms: 0,
            dispatch_on_wait: false,
            max_yield_recursion: 4,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `SLUMBER_*` environment variables.
    pub fn from_settings() -> anyhow::Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("SLUMBER_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("invalid runtime settings: {e}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_threads == Some(0) {
            anyhow::bail!("max_threads cannot be 0; omit it to use hardware parallelism");
        }
        if self.max_queue == 0 {
            anyhow::bail!("max_queue cannot be 0; the queue needs room for one task");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_queue, 1);
        assert_eq!(cfg.idle_timeout_ms, 1000);
        assert!(!cfg.dispatch_on_wait);
    }

    #[test]
    fn zero_thread_count_is_rejected() {
        let cfg = RuntimeConfig {
            max_threads: Some(0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_queue_is_rejected() {
        let cfg = RuntimeConfig {
            max_queue: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
