/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io::{self, IoSlice};
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::FutureExt;
use log::warn;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::staging::StagingBuffer;
use crate::pacing::PacingWait;
use crate::{ArcRateLimiter, LimitWrapError, Pacer};

pin_project! {
    /// A byte stream paced by the ingress and egress limiters of the peer host.
    ///
    /// Bytes read from the network but not yet permitted are kept in a staging buffer and
    /// delivered, in order, by the following reads. Nothing is dropped.
    pub struct RateLimitedStream<S> {
        #[pin]
        inner: S,
        host: IpAddr,
        rate_limiter: ArcRateLimiter,
        pacer: Pacer,
        staged: StagingBuffer,
        read_wait: Option<PacingWait>,
        write_wait: Option<PacingWait>,
        write_quota: usize,
        write_error: Option<io::Error>,
    }
}

impl<S> RateLimitedStream<S> {
    pub(crate) fn new(inner: S, host: IpAddr, rate_limiter: ArcRateLimiter, pacer: Pacer) -> Self {
        RateLimitedStream {
            inner,
            host,
            rate_limiter,
            pacer,
            staged: StagingBuffer::default(),
            read_wait: None,
            write_wait: None,
            write_quota: 0,
            write_error: None,
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    #[inline]
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Size of the received data that is waiting for the ingress limiter.
    #[inline]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    #[inline]
    pub fn pacing_cancel_token(&self) -> &CancellationToken {
        self.pacer.cancel_token()
    }

    /// Cancel all pending and future limiter waits of this stream.
    pub fn cancel_pacing(&self) {
        self.pacer.cancel();
    }
}

fn stage_failed(e: std::collections::TryReserveError) -> io::Error {
    warn!("failed to stage rate limited stream data: {e}");
    LimitWrapError::StagingFailed(e).into()
}

impl<S> AsyncRead for RateLimitedStream<S>
where
    S: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if let Some(wait) = this.read_wait.as_mut() {
                let r = ready!(wait.poll_unpin(cx));
                *this.read_wait = None;
                return match r {
                    Ok(0) => {
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    }
                    Ok(granted) => {
                        this.staged.drain_into(buf, granted);
                        Poll::Ready(Ok(()))
                    }
                    Err(e) => Poll::Ready(Err(e.into())),
                };
            }

            let limiter = this.rate_limiter.ingress(*this.host);

            if !this.staged.is_empty() {
                let Some(limiter) = limiter else {
                    this.staged.drain_into(buf, usize::MAX);
                    return Poll::Ready(Ok(()));
                };
                let burst = buf.remaining().min(this.staged.len());
                *this.read_wait = Some(this.pacer.wait(limiter.as_ref(), burst));
                continue;
            }

            let Some(limiter) = limiter else {
                return this.inner.poll_read(cx, buf);
            };

            let filled = buf.filled().len();
            ready!(this.inner.as_mut().poll_read(cx, buf))?;
            let nr = buf.filled().len() - filled;
            if nr == 0 {
                return Poll::Ready(Ok(()));
            }

            let mut wait = this.pacer.wait(limiter.as_ref(), nr);
            let r = wait.poll_unpin(cx);
            if let Poll::Ready(Ok(granted)) = r
                && granted > 0
            {
                if granted < nr {
                    if let Err(e) = this.staged.stage(&buf.filled()[filled + granted..]) {
                        buf.set_filled(filled);
                        return Poll::Ready(Err(stage_failed(e)));
                    }
                    buf.set_filled(filled + granted);
                }
                return Poll::Ready(Ok(()));
            }

            // nothing is released in this call, keep all for the following reads
            let staged = this.staged.stage(&buf.filled()[filled..]);
            buf.set_filled(filled);
            if let Err(e) = staged {
                return Poll::Ready(Err(stage_failed(e)));
            }
            return match r {
                Poll::Ready(Ok(_)) => {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
                Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
                Poll::Pending => {
                    *this.read_wait = Some(wait);
                    Poll::Pending
                }
            };
        }
    }
}

impl<S> AsyncWrite for RateLimitedStream<S>
where
    S: AsyncWrite,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        // reported after the bytes written before it
        if let Some(e) = this.write_error.take() {
            return Poll::Ready(Err(e));
        }
        if buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }
        let Some(limiter) = this.rate_limiter.egress(*this.host) else {
            *this.write_wait = None;
            *this.write_quota = 0;
            return this.inner.poll_write(cx, buf);
        };

        let mut written = 0usize;
        while written < buf.len() {
            let remaining = buf.len() - written;
            if *this.write_quota == 0 {
                let pacer: &Pacer = this.pacer;
                let wait = this
                    .write_wait
                    .get_or_insert_with(|| pacer.wait(limiter.as_ref(), remaining));
                let r = match wait.poll_unpin(cx) {
                    Poll::Ready(r) => {
                        *this.write_wait = None;
                        r
                    }
                    Poll::Pending => {
                        return if written > 0 {
                            Poll::Ready(Ok(written))
                        } else {
                            Poll::Pending
                        };
                    }
                };
                match r {
                    Ok(0) => {
                        if written > 0 {
                            return Poll::Ready(Ok(written));
                        }
                        cx.waker().wake_by_ref();
                        return Poll::Pending;
                    }
                    Ok(granted) => *this.write_quota = granted,
                    Err(e) => {
                        return if written > 0 {
                            *this.write_error = Some(e.into());
                            Poll::Ready(Ok(written))
                        } else {
                            Poll::Ready(Err(e.into()))
                        };
                    }
                }
            }

            let to_write = (*this.write_quota).min(remaining);
            match this
                .inner
                .as_mut()
                .poll_write(cx, &buf[written..written + to_write])
            {
                Poll::Ready(Ok(0)) => return Poll::Ready(Ok(written)),
                Poll::Ready(Ok(nw)) => {
                    *this.write_quota -= nw;
                    written += nw;
                }
                Poll::Ready(Err(e)) => {
                    return if written > 0 {
                        *this.write_error = Some(e);
                        Poll::Ready(Ok(written))
                    } else {
                        Poll::Ready(Err(e))
                    };
                }
                Poll::Pending => {
                    return if written > 0 {
                        Poll::Ready(Ok(written))
                    } else {
                        Poll::Pending
                    };
                }
            }
        }
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(e) = this.write_error.take() {
            return Poll::Ready(Err(e));
        }
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(e) = this.write_error.take() {
            return Poll::Ready(Err(e));
        }
        this.inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        if self.write_error.is_none() && self.rate_limiter.egress(self.host).is_none() {
            self.project().inner.poll_write_vectored(cx, bufs)
        } else {
            let buf = bufs
                .iter()
                .find(|b| !b.is_empty())
                .map_or(&[][..], |b| &**b);
            self.poll_write(cx, buf)
        }
    }

    fn is_write_vectored(&self) -> bool {
        if self.rate_limiter.egress(self.host).is_some() {
            false
        } else {
            self.inner.is_write_vectored()
        }
    }
}

#[cfg(unix)]
impl<S> std::os::fd::AsFd for RateLimitedStream<S>
where
    S: std::os::fd::AsFd,
{
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

#[cfg(unix)]
impl<S> std::os::fd::AsRawFd for RateLimitedStream<S>
where
    S: std::os::fd::AsRawFd,
{
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(windows)]
impl<S> std::os::windows::io::AsSocket for RateLimitedStream<S>
where
    S: std::os::windows::io::AsSocket,
{
    fn as_socket(&self) -> std::os::windows::io::BorrowedSocket<'_> {
        self.inner.as_socket()
    }
}
