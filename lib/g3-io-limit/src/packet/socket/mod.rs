/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll, ready};

use socket2::SockRef;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;

#[cfg(unix)]
use super::SetDscp;
use super::{
    BorrowedRawSocket, PacketConn, RawSocket, RemoteAddr, SetBufferSize, StreamIo, UdpRecvInfo,
    UdpRecvMsg, UdpSendMsg,
};

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

fn poll_recv_from_socket(
    socket: &UdpSocket,
    cx: &mut Context<'_>,
    buf: &mut [u8],
) -> Poll<io::Result<(usize, SocketAddr)>> {
    let mut buf = ReadBuf::new(buf);
    let source = ready!(UdpSocket::poll_recv_from(socket, cx, &mut buf))?;
    Poll::Ready(Ok((buf.filled().len(), source)))
}

impl PacketConn for UdpSocket {
    fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        poll_recv_from_socket(self, cx, buf)
    }

    fn poll_send_to(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        UdpSocket::poll_send_to(self, cx, buf, target)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn as_remote_addr(&self) -> Option<&dyn RemoteAddr> {
        Some(self)
    }

    fn as_buffer_sizing(&self) -> Option<&dyn SetBufferSize> {
        Some(self)
    }

    fn as_stream_io(&self) -> Option<&dyn StreamIo> {
        Some(self)
    }

    fn as_udp_recv(&self) -> Option<&dyn UdpRecvMsg> {
        Some(self)
    }

    fn as_udp_send(&self) -> Option<&dyn UdpSendMsg> {
        Some(self)
    }

    fn as_raw_socket(&self) -> Option<&dyn RawSocket> {
        Some(self)
    }

    #[cfg(unix)]
    fn as_dscp_marking(&self) -> Option<&dyn SetDscp> {
        Some(self)
    }
}

impl RemoteAddr for UdpSocket {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }
}

impl SetBufferSize for UdpSocket {
    fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(self).set_recv_buffer_size(size)
    }

    fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        SockRef::from(self).set_send_buffer_size(size)
    }
}

impl StreamIo for UdpSocket {
    fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut buf = ReadBuf::new(buf);
        ready!(UdpSocket::poll_recv(self, cx, &mut buf))?;
        Poll::Ready(Ok(buf.filled().len()))
    }

    fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        UdpSocket::poll_send(self, cx, buf)
    }
}

impl UdpRecvMsg for UdpSocket {
    fn poll_recv_from_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        poll_recv_from_socket(self, cx, buf)
    }

    fn poll_recv_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>> {
        self.poll_recvmsg(cx, buf, oob)
    }
}

impl UdpSendMsg for UdpSocket {
    fn poll_send_to_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        UdpSocket::poll_send_to(self, cx, buf, target)
    }

    fn poll_send_msg_udp(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        oob: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<(usize, usize)>> {
        self.poll_sendmsg(cx, buf, oob, target)
    }
}

impl RawSocket for UdpSocket {
    #[cfg(unix)]
    fn raw_socket(&self) -> BorrowedRawSocket<'_> {
        use std::os::fd::AsFd;

        self.as_fd()
    }

    #[cfg(windows)]
    fn raw_socket(&self) -> BorrowedRawSocket<'_> {
        use std::os::windows::io::AsSocket;

        self.as_socket()
    }
}

/// Platform specific message I/O.
trait UdpSocketMsgExt {
    fn poll_recvmsg(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>>;

    fn poll_sendmsg(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        oob: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<(usize, usize)>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{FixedGrant, HostTable};
    use crate::{PacketCapabilities, PacketConnExt, Pacer, wrap_udp_conn};

    async fn socket_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn capabilities() {
        let (a, b) = socket_pair().await;
        let caps = PacketConn::capabilities(&a);
        assert!(caps.contains(
            PacketCapabilities::REMOTE_ADDR
                | PacketCapabilities::BUFFER_SIZING
                | PacketCapabilities::STREAM_IO
                | PacketCapabilities::UDP_RECV
                | PacketCapabilities::UDP_SEND
                | PacketCapabilities::RAW_SOCKET
        ));

        assert!(RemoteAddr::remote_addr(&a).is_none());
        a.connect(b.local_addr().unwrap()).await.unwrap();
        assert_eq!(RemoteAddr::remote_addr(&a), Some(b.local_addr().unwrap()));

        a.set_recv_buffer_size(64 * 1024).unwrap();
        a.set_send_buffer_size(64 * 1024).unwrap();
    }

    #[tokio::test]
    async fn base_recv_send() {
        let (a, b) = socket_pair().await;
        let b_addr = b.local_addr().unwrap();
        let nw = PacketConnExt::send_to(&a, b"hello", b_addr).await.unwrap();
        assert_eq!(nw, 5);

        let mut buf = [0u8; 64];
        let (nr, source) = PacketConnExt::recv_from(&b, &mut buf).await.unwrap();
        assert_eq!(&buf[..nr], b"hello");
        assert_eq!(source, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn wrapped_bridge() {
        let (a, b) = socket_pair().await;
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        let rate_limiter = HostTable::default()
            .with_egress(b_addr.ip(), Arc::new(FixedGrant::new(4)))
            .into_arc();
        let conn = wrap_udp_conn(Some(&rate_limiter), a, &Pacer::default());
        assert_eq!(
            conn.capabilities(),
            PacketConn::capabilities(conn.get_ref())
        );
        assert!(conn.raw_socket().is_ok());

        // dropped, but reported as sent
        let nw = std::future::poll_fn(|cx| conn.poll_send_to_udp(cx, b"hello", b_addr))
            .await
            .unwrap();
        assert_eq!(nw, 5);
        let nw = std::future::poll_fn(|cx| conn.poll_send_to_udp(cx, b"hi", b_addr))
            .await
            .unwrap();
        assert_eq!(nw, 2);

        let mut buf = [0u8; 64];
        let (nr, source) = PacketConnExt::recv_from(&b, &mut buf).await.unwrap();
        assert_eq!(&buf[..nr], b"hi");
        assert_eq!(source, a_addr);
    }
}
