/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::task::{Context, Poll, ready};

use tokio_util::either::Either;

use super::admission::{RecvAdmission, SendAdmission, SendVerdict, lock};
use super::{PacketConn, UdpRecvInfo};
use crate::{ArcRateLimiter, Pacer};

/// A packet connection with whole datagram admission in both directions.
///
/// A datagram refused by the ingress limiter is discarded and the next one is received. A
/// datagram refused by the egress limiter is dropped, and the send reports success with the full
/// length.
///
/// None of the optional capabilities of the inner connection are exposed.
pub struct RateLimitedPacketConn<P> {
    inner: P,
    rate_limiter: ArcRateLimiter,
    pacer: Pacer,
    recv: Mutex<RecvAdmission>,
    send: Mutex<SendAdmission>,
}

impl<P> RateLimitedPacketConn<P> {
    pub(crate) fn new(inner: P, rate_limiter: ArcRateLimiter, pacer: Pacer) -> Self {
        RateLimitedPacketConn {
            inner,
            rate_limiter,
            pacer,
            recv: Mutex::new(RecvAdmission::default()),
            send: Mutex::new(SendAdmission::default()),
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &P {
        &self.inner
    }

    pub fn cancel_pacing(&self) {
        self.pacer.cancel();
    }
}

impl<P: PacketConn> PacketConn for RateLimitedPacketConn<P> {
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        let mut recv = lock(&self.recv);
        let info = ready!(recv.poll_admit(
            cx,
            Some(&self.rate_limiter),
            &self.pacer,
            buf,
            &mut [],
            |cx, buf, _oob| {
                self.inner
                    .poll_recv_from(cx, buf)
                    .map_ok(|(len, source)| UdpRecvInfo {
                        len,
                        oob_len: 0,
                        flags: 0,
                        source,
                    })
            },
        ))?;
        Poll::Ready(Ok((info.len, info.source)))
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        let mut send = lock(&self.send);
        match ready!(send.poll_admit(
            cx,
            Some(&self.rate_limiter),
            &self.pacer,
            buf.len(),
            target
        ))? {
            SendVerdict::Discard => Poll::Ready(Ok(buf.len())),
            SendVerdict::Transmit => {
                let r = ready!(self.inner.poll_send_to(cx, buf, target));
                send.finish();
                Poll::Ready(r)
            }
        }
    }

    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Wrap a packet connection with whole datagram admission.
///
/// The connection is returned unchanged if there is no rate limiter.
pub fn wrap_packet_conn<P>(
    rate_limiter: Option<&ArcRateLimiter>,
    conn: P,
    pacer: &Pacer,
) -> Either<P, RateLimitedPacketConn<P>> {
    match rate_limiter {
        Some(rate_limiter) => Either::Right(RateLimitedPacketConn::new(
            conn,
            rate_limiter.clone(),
            pacer.child(),
        )),
        None => Either::Left(conn),
    }
}
