// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Reconnect backoff (spec.md §4.6 "reconnect_wait"): an unbounded,
//! jittered exponential backoff capped at a maximum interval, since unlike
//! a bounded retry count for a single command, reconnection keeps trying
//! for the lifetime of the connection runner.
//!
//! Grounded on `glide-core`'s `retry_strategies.rs`, generalized from a
//! fixed `number_of_retries` to an unbounded iterator capped by
//! `max_interval` instead, since there is no connection-count analogue to
//! a command retry budget.

use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};

pub(crate) const DEFAULT_BASE_MILLIS: u64 = 100;
pub(crate) const DEFAULT_FACTOR: u64 = 2;
pub(crate) const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Produces successive reconnect wait durations, jittered and capped.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base_millis: u64,
    factor: u64,
    max_interval: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        ReconnectBackoff {
            base_millis: DEFAULT_BASE_MILLIS,
            factor: DEFAULT_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max_interval: Duration) -> ReconnectBackoff {
        ReconnectBackoff {
            base_millis: base.as_millis().max(1) as u64,
            factor: DEFAULT_FACTOR,
            max_interval,
        }
    }

    /// An unbounded, jittered, capped exponential sequence. The caller
    /// (the connection runner's `reconnect_wait` state) pulls one duration
    /// per attempt and sleeps for it.
    pub fn iter(&self) -> impl Iterator<Item = Duration> + '_ {
        ExponentialBackoff::from_millis(self.base_millis)
            .factor(self.factor)
            .max_delay(self.max_interval)
            .map(jitter)
    }
}
