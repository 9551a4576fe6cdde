/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bitflags::bitflags;
use tokio_util::either::Either;

mod admission;

mod limited;
pub use limited::{RateLimitedPacketConn, wrap_packet_conn};

mod udp;
pub use udp::{RateLimitedUdpConn, wrap_udp_conn};

mod socket;

#[cfg(unix)]
pub type BorrowedRawSocket<'a> = std::os::fd::BorrowedFd<'a>;
#[cfg(windows)]
pub type BorrowedRawSocket<'a> = std::os::windows::io::BorrowedSocket<'a>;

bitflags! {
    /// The optional capabilities a packet connection exposes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PacketCapabilities: u8 {
        const REMOTE_ADDR = 0x01;
        const BUFFER_SIZING = 0x02;
        const STREAM_IO = 0x04;
        const UDP_RECV = 0x08;
        const UDP_SEND = 0x10;
        const RAW_SOCKET = 0x20;
        const DSCP_MARKING = 0x40;
    }
}

/// A datagram connection.
///
/// The base capability is receiving from and sending to any peer. The optional capabilities are
/// reached through the `as_*` probe methods, which return `None` if absent.
pub trait PacketConn: Send + Sync {
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>>;

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn as_remote_addr(&self) -> Option<&dyn RemoteAddr> {
        None
    }

    fn as_buffer_sizing(&self) -> Option<&dyn SetBufferSize> {
        None
    }

    fn as_stream_io(&self) -> Option<&dyn StreamIo> {
        None
    }

    fn as_udp_recv(&self) -> Option<&dyn UdpRecvMsg> {
        None
    }

    fn as_udp_send(&self) -> Option<&dyn UdpSendMsg> {
        None
    }

    fn as_raw_socket(&self) -> Option<&dyn RawSocket> {
        None
    }

    fn as_dscp_marking(&self) -> Option<&dyn SetDscp> {
        None
    }

    fn capabilities(&self) -> PacketCapabilities {
        let mut caps = PacketCapabilities::empty();
        caps.set(
            PacketCapabilities::REMOTE_ADDR,
            self.as_remote_addr().is_some(),
        );
        caps.set(
            PacketCapabilities::BUFFER_SIZING,
            self.as_buffer_sizing().is_some(),
        );
        caps.set(PacketCapabilities::STREAM_IO, self.as_stream_io().is_some());
        caps.set(PacketCapabilities::UDP_RECV, self.as_udp_recv().is_some());
        caps.set(PacketCapabilities::UDP_SEND, self.as_udp_send().is_some());
        caps.set(PacketCapabilities::RAW_SOCKET, self.as_raw_socket().is_some());
        caps.set(
            PacketCapabilities::DSCP_MARKING,
            self.as_dscp_marking().is_some(),
        );
        caps
    }
}

pub trait RemoteAddr {
    /// The connected peer address, if any.
    fn remote_addr(&self) -> Option<SocketAddr>;
}

pub trait SetBufferSize {
    fn set_recv_buffer_size(&self, size: usize) -> io::Result<()>;
    fn set_send_buffer_size(&self, size: usize) -> io::Result<()>;
}

/// Plain read and write on a connected datagram socket.
pub trait StreamIo {
    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>>;
    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpRecvInfo {
    pub len: usize,
    /// Size of the control data written to the oob buffer.
    pub oob_len: usize,
    pub flags: i32,
    pub source: SocketAddr,
}

pub trait UdpRecvMsg {
    fn poll_recv_from_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>>;

    fn poll_recv_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>>;
}

pub trait UdpSendMsg {
    fn poll_send_to_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>>;

    /// Send `buf` with control data `oob`, returns the sent size of both.
    fn poll_send_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        oob: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<(usize, usize)>>;
}

pub trait RawSocket {
    fn raw_socket(&self) -> BorrowedRawSocket<'_>;
}

pub trait SetDscp {
    fn set_dscp(&self, dscp: u8) -> io::Result<()>;
}

impl<T: PacketConn + ?Sized> PacketConn for Arc<T> {
    #[inline]
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        (**self).poll_recv_from(cx, buf)
    }

    #[inline]
    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        (**self).poll_send_to(cx, buf, target)
    }

    #[inline]
    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }

    fn as_remote_addr(&self) -> Option<&dyn RemoteAddr> {
        (**self).as_remote_addr()
    }

    fn as_buffer_sizing(&self) -> Option<&dyn SetBufferSize> {
        (**self).as_buffer_sizing()
    }

    fn as_stream_io(&self) -> Option<&dyn StreamIo> {
        (**self).as_stream_io()
    }

    fn as_udp_recv(&self) -> Option<&dyn UdpRecvMsg> {
        (**self).as_udp_recv()
    }

    fn as_udp_send(&self) -> Option<&dyn UdpSendMsg> {
        (**self).as_udp_send()
    }

    fn as_raw_socket(&self) -> Option<&dyn RawSocket> {
        (**self).as_raw_socket()
    }

    fn as_dscp_marking(&self) -> Option<&dyn SetDscp> {
        (**self).as_dscp_marking()
    }
}

impl<A, B> PacketConn for Either<A, B>
where
    A: PacketConn,
    B: PacketConn,
{
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        match self {
            Either::Left(a) => a.poll_recv_from(cx, buf),
            Either::Right(b) => b.poll_recv_from(cx, buf),
        }
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        match self {
            Either::Left(a) => a.poll_send_to(cx, buf, target),
            Either::Right(b) => b.poll_send_to(cx, buf, target),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Either::Left(a) => a.local_addr(),
            Either::Right(b) => b.local_addr(),
        }
    }

    fn as_remote_addr(&self) -> Option<&dyn RemoteAddr> {
        match self {
            Either::Left(a) => a.as_remote_addr(),
            Either::Right(b) => b.as_remote_addr(),
        }
    }

    fn as_buffer_sizing(&self) -> Option<&dyn SetBufferSize> {
        match self {
            Either::Left(a) => a.as_buffer_sizing(),
            Either::Right(b) => b.as_buffer_sizing(),
        }
    }

    fn as_stream_io(&self) -> Option<&dyn StreamIo> {
        match self {
            Either::Left(a) => a.as_stream_io(),
            Either::Right(b) => b.as_stream_io(),
        }
    }

    fn as_udp_recv(&self) -> Option<&dyn UdpRecvMsg> {
        match self {
            Either::Left(a) => a.as_udp_recv(),
            Either::Right(b) => b.as_udp_recv(),
        }
    }

    fn as_udp_send(&self) -> Option<&dyn UdpSendMsg> {
        match self {
            Either::Left(a) => a.as_udp_send(),
            Either::Right(b) => b.as_udp_send(),
        }
    }

    fn as_raw_socket(&self) -> Option<&dyn RawSocket> {
        match self {
            Either::Left(a) => a.as_raw_socket(),
            Either::Right(b) => b.as_raw_socket(),
        }
    }

    fn as_dscp_marking(&self) -> Option<&dyn SetDscp> {
        match self {
            Either::Left(a) => a.as_dscp_marking(),
            Either::Right(b) => b.as_dscp_marking(),
        }
    }
}

pub struct RecvFrom<'a, T: ?Sized> {
    conn: &'a T,
    buf: &'a mut [u8],
}

impl<T> Future for RecvFrom<'_, T>
where
    T: PacketConn + ?Sized,
{
    type Output = io::Result<(usize, SocketAddr)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        me.conn.poll_recv_from(cx, me.buf)
    }
}

pub struct SendTo<'a, T: ?Sized> {
    conn: &'a T,
    buf: &'a [u8],
    target: SocketAddr,
}

impl<T> Future for SendTo<'_, T>
where
    T: PacketConn + ?Sized,
{
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let me = self.get_mut();
        me.conn.poll_send_to(cx, me.buf, me.target)
    }
}

pub trait PacketConnExt: PacketConn {
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> RecvFrom<'a, Self> {
        RecvFrom { conn: self, buf }
    }

    fn send_to<'a>(&'a self, buf: &'a [u8], target: SocketAddr) -> SendTo<'a, Self> {
        SendTo {
            conn: self,
            buf,
            target,
        }
    }
}

impl<T: PacketConn + ?Sized> PacketConnExt for T {}
