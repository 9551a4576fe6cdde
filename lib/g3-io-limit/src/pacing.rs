/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{LimitWrapError, Limiter, RateLimitWrapConfig};

pub(crate) type PacingWait = Pin<Box<dyn Future<Output = Result<usize, LimitWrapError>> + Send>>;

/// Bind limiter waits to a cancellation token and an optional timeout.
///
/// Each wrapped connection gets its own child pacer, so cancelling a parent pacer unblocks the
/// pending waits of all connections created from it.
#[derive(Clone, Debug)]
pub struct Pacer {
    wait_timeout: Option<Duration>,
    discard_yield: usize,
    cancel: CancellationToken,
}

impl Default for Pacer {
    fn default() -> Self {
        Pacer::new(&RateLimitWrapConfig::default())
    }
}

impl Pacer {
    pub fn new(config: &RateLimitWrapConfig) -> Self {
        Pacer::with_cancel_token(config, CancellationToken::new())
    }

    pub fn with_cancel_token(config: &RateLimitWrapConfig, cancel: CancellationToken) -> Self {
        Pacer {
            wait_timeout: config.wait_timeout(),
            discard_yield: config.discard_yield_count(),
            cancel,
        }
    }

    /// Create a pacer that will be cancelled together with this one.
    pub fn child(&self) -> Self {
        Pacer {
            wait_timeout: self.wait_timeout,
            discard_yield: self.discard_yield,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[inline]
    pub(crate) fn discard_yield(&self) -> usize {
        self.discard_yield
    }

    pub(crate) fn wait(&self, limiter: &dyn Limiter, requested: usize) -> PacingWait {
        let cancel = self.cancel.clone();
        let wait_timeout = self.wait_timeout;
        let wait = limiter.wait(requested);
        Box::pin(async move {
            let paced = async move {
                match wait_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, wait)
                        .await
                        .map_err(|_| LimitWrapError::WaitTimeout(timeout)),
                    None => Ok(wait.await),
                }
            };
            tokio::select! {
                biased;

                _ = cancel.cancelled() => Err(LimitWrapError::WaitCancelled),
                r = paced => r.map(|granted| granted.min(requested)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedGrant, PendingLimiter};

    #[tokio::test]
    async fn clamp_grant() {
        let pacer = Pacer::default();
        let limiter = FixedGrant::new(100);
        assert_eq!(pacer.wait(&limiter, 10).await.unwrap(), 10);

        let limiter = FixedGrant::new(4);
        assert_eq!(pacer.wait(&limiter, 10).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn cancel_child() {
        let pacer = Pacer::default();
        let child = pacer.child();
        let wait = child.wait(&PendingLimiter, 10);
        pacer.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(wait.await, Err(LimitWrapError::WaitCancelled)));
    }

    #[tokio::test]
    async fn cancel_not_propagate_up() {
        let pacer = Pacer::default();
        let child = pacer.child();
        child.cancel();
        assert!(!pacer.is_cancelled());
        assert_eq!(pacer.wait(&FixedGrant::new(1), 1).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout() {
        let mut config = RateLimitWrapConfig::default();
        config.set_wait_timeout(Duration::from_secs(2));
        let pacer = Pacer::new(&config);
        match pacer.wait(&PendingLimiter, 10).await {
            Err(LimitWrapError::WaitTimeout(d)) => assert_eq!(d, Duration::from_secs(2)),
            r => panic!("unexpected wait result {r:?}"),
        }
    }
}
