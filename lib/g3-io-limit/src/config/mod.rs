/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::time::Duration;

#[cfg(feature = "yaml")]
mod yaml;

const DEFAULT_DISCARD_YIELD_COUNT: usize = 64;
const MINIMAL_WAIT_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitWrapConfig {
    wait_timeout: Option<Duration>,
    discard_yield_count: usize,
}

impl Default for RateLimitWrapConfig {
    fn default() -> Self {
        RateLimitWrapConfig {
            wait_timeout: None,
            discard_yield_count: DEFAULT_DISCARD_YIELD_COUNT,
        }
    }
}

impl RateLimitWrapConfig {
    /// Set the max time a single pacing wait may take. Zero means no limit.
    pub fn set_wait_timeout(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            self.wait_timeout = None;
        } else {
            self.wait_timeout = Some(timeout.max(MINIMAL_WAIT_TIMEOUT));
        }
    }

    #[inline]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    /// Set how many datagrams a single receive poll may discard before yielding.
    pub fn set_discard_yield_count(&mut self, count: usize) {
        self.discard_yield_count = count.max(1);
    }

    #[inline]
    pub fn discard_yield_count(&self) -> usize {
        self.discard_yield_count
    }
}
