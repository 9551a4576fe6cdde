/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

pub type LimitWait = Pin<Box<dyn Future<Output = usize> + Send>>;

/// Token source for one direction of the traffic of one remote host.
pub trait Limiter: Send + Sync {
    /// Ask for permission to pass `requested` bytes.
    ///
    /// The returned future resolves to the granted size, which should never be larger than
    /// `requested`. It may stay pending until at least one token is available, and it never
    /// fails.
    fn wait(&self, requested: usize) -> LimitWait;
}

pub type ArcLimiter = Arc<dyn Limiter>;

/// Resolve the per host limiters.
///
/// A `None` return means the traffic of that host and direction is not limited.
pub trait RateLimiter: Send + Sync {
    fn ingress(&self, host: IpAddr) -> Option<ArcLimiter>;
    fn egress(&self, host: IpAddr) -> Option<ArcLimiter>;
}

pub type ArcRateLimiter = Arc<dyn RateLimiter>;

/// Get the host key used to look up limiters for the peer at `addr`.
///
/// The port is stripped, and IPv4-mapped IPv6 addresses are converted to IPv4, so a dual stack
/// socket uses the same key as an IPv4 one.
#[inline]
pub fn host_key(addr: SocketAddr) -> IpAddr {
    addr.ip().to_canonical()
}
