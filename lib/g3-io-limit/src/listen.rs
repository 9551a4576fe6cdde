/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::{self, SocketAddr};
use std::sync::{Mutex, PoisonError};

use log::debug;
use tokio::net::{TcpListener, TcpStream};

use crate::{ArcRateLimiter, MaybeRateLimitedStream, Pacer, wrap_stream};

/// A tcp listener that wraps every accepted stream with the rate limiter.
///
/// The accepted streams share one cancellation generation, which is replaced by
/// [`RateLimitedTcpListener::cancel_pacing`]. Cancelling the pacer passed in at construction
/// cancels all generations.
pub struct RateLimitedTcpListener {
    inner: TcpListener,
    rate_limiter: Option<ArcRateLimiter>,
    pacer: Pacer,
    accepted: Mutex<Pacer>,
}

impl RateLimitedTcpListener {
    pub fn new(listener: TcpListener, rate_limiter: Option<ArcRateLimiter>, pacer: Pacer) -> Self {
        let accepted = Mutex::new(pacer.child());
        RateLimitedTcpListener {
            inner: listener,
            rate_limiter,
            pacer,
            accepted,
        }
    }

    pub fn from_std(
        listener: net::TcpListener,
        rate_limiter: Option<ArcRateLimiter>,
        pacer: Pacer,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let inner = TcpListener::from_std(listener)?;
        Ok(RateLimitedTcpListener::new(inner, rate_limiter, pacer))
    }

    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Replace the rate limiter used for the streams accepted later.
    pub fn set_rate_limiter(&mut self, rate_limiter: Option<ArcRateLimiter>) {
        self.rate_limiter = rate_limiter;
    }

    /// Cancel the pending limiter waits of all streams accepted so far.
    ///
    /// Streams accepted later are not affected.
    pub fn cancel_pacing(&self) {
        let mut accepted = self.accepted.lock().unwrap_or_else(PoisonError::into_inner);
        accepted.cancel();
        *accepted = self.pacer.child();
    }

    pub async fn accept(&self) -> io::Result<(MaybeRateLimitedStream<TcpStream>, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        if self.rate_limiter.is_some() {
            debug!("accepted rate limited connection from {peer_addr}");
        }
        let pacer = self
            .accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let stream = wrap_stream(self.rate_limiter.as_ref(), stream, peer_addr, &pacer);
        Ok((stream, peer_addr))
    }
}
