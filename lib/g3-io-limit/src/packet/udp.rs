/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::task::{Context, Poll, ready};

use super::admission::{RecvAdmission, SendAdmission, SendVerdict, lock};
use super::{
    BorrowedRawSocket, PacketConn, RawSocket, RemoteAddr, SetBufferSize, SetDscp, StreamIo,
    UdpRecvInfo, UdpRecvMsg, UdpSendMsg,
};
use crate::error::unsupported;
use crate::{ArcRateLimiter, Pacer};

/// A packet connection with whole datagram admission, which also bridges the optional
/// capabilities of the inner connection.
///
/// The capability traits are implemented for any inner connection. If the inner connection
/// lacks the capability, the call fails with an unsupported operation error, except for
/// [`SetDscp`], which is a successful no-op. The `as_*` probes return `Some` only when the inner
/// connection has the capability, so probing never reaches an unsupported call.
///
/// The receive and send variants share the admission state of their direction.
pub struct RateLimitedUdpConn<P> {
    inner: P,
    rate_limiter: Option<ArcRateLimiter>,
    pacer: Pacer,
    recv: Mutex<RecvAdmission>,
    send: Mutex<SendAdmission>,
}

impl<P> RateLimitedUdpConn<P> {
    pub(crate) fn new(inner: P, rate_limiter: Option<ArcRateLimiter>, pacer: Pacer) -> Self {
        RateLimitedUdpConn {
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

impl<P: PacketConn> RateLimitedUdpConn<P> {
    pub fn raw_socket(&self) -> io::Result<BorrowedRawSocket<'_>> {
        self.inner
            .as_raw_socket()
            .map(|s| s.raw_socket())
            .ok_or_else(unsupported)
    }

    fn poll_recv_admitted<F>(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
        recv: F,
    ) -> Poll<io::Result<UdpRecvInfo>>
    where
        F: FnMut(&mut Context<'_>, &mut [u8], &mut [u8]) -> Poll<io::Result<UdpRecvInfo>>,
    {
        lock(&self.recv).poll_admit(
            cx,
            self.rate_limiter.as_ref(),
            &self.pacer,
            buf,
            oob,
            recv,
        )
    }

    fn poll_send_admitted<F, T>(
        &self,
        cx: &mut Context<'_>,
        len: usize,
        target: SocketAddr,
        dropped: T,
        send: F,
    ) -> Poll<io::Result<T>>
    where
        F: FnOnce(&mut Context<'_>) -> Poll<io::Result<T>>,
    {
        let mut admission = lock(&self.send);
        match ready!(admission.poll_admit(
            cx,
            self.rate_limiter.as_ref(),
            &self.pacer,
            len,
            target
        ))? {
            SendVerdict::Discard => Poll::Ready(Ok(dropped)),
            SendVerdict::Transmit => {
                let r = ready!(send(cx));
                admission.finish();
                Poll::Ready(r)
            }
        }
    }
}

fn into_recv_info((len, source): (usize, SocketAddr)) -> UdpRecvInfo {
    UdpRecvInfo {
        len,
        oob_len: 0,
        flags: 0,
        source,
    }
}

impl<P: PacketConn> PacketConn for RateLimitedUdpConn<P> {
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        let info = ready!(self.poll_recv_admitted(cx, buf, &mut [], |cx, buf, _oob| {
            self.inner.poll_recv_from(cx, buf).map_ok(into_recv_info)
        }))?;
        Poll::Ready(Ok((info.len, info.source)))
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        self.poll_send_admitted(cx, buf.len(), target, buf.len(), |cx| {
            self.inner.poll_send_to(cx, buf, target)
        })
    }

    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn as_remote_addr(&self) -> Option<&dyn RemoteAddr> {
        self.inner.as_remote_addr().map(|_| self as &dyn RemoteAddr)
    }

    fn as_buffer_sizing(&self) -> Option<&dyn SetBufferSize> {
        self.inner
            .as_buffer_sizing()
            .map(|_| self as &dyn SetBufferSize)
    }

    fn as_stream_io(&self) -> Option<&dyn StreamIo> {
        self.inner.as_stream_io().map(|_| self as &dyn StreamIo)
    }

    fn as_udp_recv(&self) -> Option<&dyn UdpRecvMsg> {
        self.inner.as_udp_recv().map(|_| self as &dyn UdpRecvMsg)
    }

    fn as_udp_send(&self) -> Option<&dyn UdpSendMsg> {
        self.inner.as_udp_send().map(|_| self as &dyn UdpSendMsg)
    }

    fn as_raw_socket(&self) -> Option<&dyn RawSocket> {
        self.inner.as_raw_socket()
    }

    fn as_dscp_marking(&self) -> Option<&dyn SetDscp> {
        self.inner.as_dscp_marking().map(|_| self as &dyn SetDscp)
    }
}

impl<P: PacketConn> RemoteAddr for RateLimitedUdpConn<P> {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.as_remote_addr().and_then(|c| c.remote_addr())
    }
}

impl<P: PacketConn> SetBufferSize for RateLimitedUdpConn<P> {
    fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        match self.inner.as_buffer_sizing() {
            Some(c) => c.set_recv_buffer_size(size),
            None => Err(unsupported()),
        }
    }

    fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        match self.inner.as_buffer_sizing() {
            Some(c) => c.set_send_buffer_size(size),
            None => Err(unsupported()),
        }
    }
}

impl<P: PacketConn> StreamIo for RateLimitedUdpConn<P> {
    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        match self.inner.as_stream_io() {
            Some(c) => c.poll_recv(cx, buf),
            None => Poll::Ready(Err(unsupported())),
        }
    }

    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.inner.as_stream_io() {
            Some(c) => c.poll_send(cx, buf),
            None => Poll::Ready(Err(unsupported())),
        }
    }
}

impl<P: PacketConn> UdpRecvMsg for RateLimitedUdpConn<P> {
    fn poll_recv_from_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        let Some(udp) = self.inner.as_udp_recv() else {
            return Poll::Ready(Err(unsupported()));
        };
        let info = ready!(self.poll_recv_admitted(cx, buf, &mut [], |cx, buf, _oob| {
            udp.poll_recv_from_udp(cx, buf).map_ok(into_recv_info)
        }))?;
        Poll::Ready(Ok((info.len, info.source)))
    }

    fn poll_recv_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>> {
        let Some(udp) = self.inner.as_udp_recv() else {
            return Poll::Ready(Err(unsupported()));
        };
        self.poll_recv_admitted(cx, buf, oob, |cx, buf, oob| {
            udp.poll_recv_msg_udp(cx, buf, oob)
        })
    }
}

impl<P: PacketConn> UdpSendMsg for RateLimitedUdpConn<P> {
    fn poll_send_to_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        let Some(udp) = self.inner.as_udp_send() else {
            return Poll::Ready(Err(unsupported()));
        };
        self.poll_send_admitted(cx, buf.len(), target, buf.len(), |cx| {
            udp.poll_send_to_udp(cx, buf, target)
        })
    }

    fn poll_send_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        oob: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<(usize, usize)>> {
        let Some(udp) = self.inner.as_udp_send() else {
            return Poll::Ready(Err(unsupported()));
        };
        self.poll_send_admitted(cx, buf.len(), target, (buf.len(), 0), |cx| {
            udp.poll_send_msg_udp(cx, buf, oob, target)
        })
    }
}

impl<P: PacketConn> SetDscp for RateLimitedUdpConn<P> {
    fn set_dscp(&self, dscp: u8) -> io::Result<()> {
        match self.inner.as_dscp_marking() {
            Some(c) => c.set_dscp(dscp),
            None => Ok(()),
        }
    }
}

/// Wrap a packet connection as a UDP connection with whole datagram admission.
///
/// The connection is always wrapped, with or without a rate limiter, so the capability bridging
/// is always available.
pub fn wrap_udp_conn<P>(
    rate_limiter: Option<&ArcRateLimiter>,
    conn: P,
    pacer: &Pacer,
) -> RateLimitedUdpConn<P> {
    RateLimitedUdpConn::new(conn, rate_limiter.cloned(), pacer.child())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::str::FromStr;
    use std::sync::Arc;

    use tokio_test::{assert_ready_err, assert_ready_ok, task};

    use crate::testing::{FixedGrant, HostTable, MockPacketConn};
    use crate::{PacketCapabilities, PacketConnExt, is_unsupported};

    fn local() -> SocketAddr {
        SocketAddr::from_str("192.0.2.100:53").unwrap()
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 40000)
    }

    fn bare_conn() -> RateLimitedUdpConn<MockPacketConn> {
        let rate_limiter = HostTable::default()
            .with_ingress(peer(1).ip(), Arc::new(FixedGrant::new(0)))
            .with_egress(peer(1).ip(), Arc::new(FixedGrant::new(0)))
            .into_arc();
        wrap_udp_conn(
            Some(&rate_limiter),
            MockPacketConn::new(local()),
            &Pacer::default(),
        )
    }

    #[test]
    fn absent_capability_unsupported() {
        let conn = bare_conn();
        assert_eq!(conn.capabilities(), PacketCapabilities::empty());
        assert!(conn.remote_addr().is_none());
        assert!(is_unsupported(&conn.set_recv_buffer_size(4096).unwrap_err()));
        assert!(is_unsupported(&conn.set_send_buffer_size(4096).unwrap_err()));
        assert!(is_unsupported(&conn.raw_socket().unwrap_err()));
        conn.set_dscp(46).unwrap();

        let mut task = task::spawn(());
        task.enter(|cx, _| {
            let mut buf = [0u8; 16];
            let mut oob = [0u8; 16];
            let e = assert_ready_err!(conn.poll_recv(cx, &mut buf));
            assert!(is_unsupported(&e));
            let e = assert_ready_err!(conn.poll_send(cx, b"hello"));
            assert!(is_unsupported(&e));
            let e = assert_ready_err!(conn.poll_recv_from_udp(cx, &mut buf));
            assert!(is_unsupported(&e));
            let e = assert_ready_err!(conn.poll_recv_msg_udp(cx, &mut buf, &mut oob));
            assert!(is_unsupported(&e));
        });
    }

    #[test]
    fn absent_send_capability_before_drop() {
        let conn = bare_conn();
        let mut task = task::spawn(());
        task.enter(|cx, _| {
            // the egress limiter would drop these
            let e = assert_ready_err!(conn.poll_send_to_udp(cx, b"hello", peer(1)));
            assert!(is_unsupported(&e));
            let e = assert_ready_err!(conn.poll_send_msg_udp(cx, b"hello", &[], peer(1)));
            assert!(is_unsupported(&e));
        });
        assert!(conn.get_ref().take_sent().is_empty());
    }

    #[test]
    fn base_capability_limited() {
        let conn = bare_conn();
        conn.get_ref().push_incoming(&[0u8; 100], peer(1));
        conn.get_ref().push_incoming(&[0u8; 50], peer(2));

        let mut buf = [0u8; 1500];
        let mut recv = task::spawn(conn.recv_from(&mut buf));
        let (len, addr) = assert_ready_ok!(recv.poll());
        assert_eq!(len, 50);
        assert_eq!(addr, peer(2));
        drop(recv);

        let mut send = task::spawn(conn.send_to(&[0u8; 100], peer(1)));
        assert_eq!(assert_ready_ok!(send.poll()), 100);
        drop(send);
        assert!(conn.get_ref().take_sent().is_empty());

        let mut send = task::spawn(conn.send_to(&[0u8; 100], peer(2)));
        assert_eq!(assert_ready_ok!(send.poll()), 100);
        drop(send);
        assert_eq!(conn.get_ref().take_sent().len(), 1);
    }

    #[test]
    fn no_rate_limiter() {
        let conn = wrap_udp_conn(None, MockPacketConn::new(local()), &Pacer::default());
        conn.get_ref().push_incoming(&[0u8; 100], peer(1));
        assert_eq!(conn.local_addr().unwrap(), local());

        let mut buf = [0u8; 1500];
        let mut recv = task::spawn(conn.recv_from(&mut buf));
        let (len, _) = assert_ready_ok!(recv.poll());
        assert_eq!(len, 100);
    }
}
