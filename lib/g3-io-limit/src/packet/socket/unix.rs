/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::task::{Context, Poll, ready};
use std::{io, mem, ptr};

use libc::{c_int, c_void, sockaddr, sockaddr_in, sockaddr_in6, socklen_t};
use tokio::io::Interest;
use tokio::net::UdpSocket;

use super::UdpSocketMsgExt;
use crate::packet::{SetDscp, UdpRecvInfo};

const MAX_DSCP: u8 = 0x3f;

#[derive(Default)]
#[repr(align(8))]
struct RawSocketAddr {
    buf: [u8; size_of::<sockaddr_in6>()],
}

impl RawSocketAddr {
    fn sa_family(&self) -> c_int {
        let p = unsafe { &*self.buf.as_ptr().cast::<sockaddr>() };
        p.sa_family as c_int
    }

    fn to_std(&self) -> Option<SocketAddr> {
        match self.sa_family() {
            libc::AF_INET => {
                let v4 = unsafe { &*self.buf.as_ptr().cast::<sockaddr_in>() };
                Some(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr)),
                    u16::from_be(v4.sin_port),
                )))
            }
            libc::AF_INET6 => {
                let v6 = unsafe { &*self.buf.as_ptr().cast::<sockaddr_in6>() };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(v6.sin6_addr.s6_addr),
                    u16::from_be(v6.sin6_port),
                    u32::from_be(v6.sin6_flowinfo),
                    v6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }

    fn set_std(&mut self, addr: SocketAddr) -> socklen_t {
        match addr {
            SocketAddr::V4(v4) => {
                let a4 = unsafe { &mut *self.buf.as_mut_ptr().cast::<sockaddr_in>() };
                #[cfg(any(
                    target_os = "macos",
                    target_os = "freebsd",
                    target_os = "dragonfly",
                    target_os = "netbsd",
                    target_os = "openbsd",
                ))]
                {
                    a4.sin_len = size_of::<sockaddr_in>() as u8;
                }
                a4.sin_family = libc::AF_INET as _;
                a4.sin_port = u16::to_be(v4.port());
                a4.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                size_of::<sockaddr_in>() as socklen_t
            }
            SocketAddr::V6(v6) => {
                let a6 = unsafe { &mut *self.buf.as_mut_ptr().cast::<sockaddr_in6>() };
                #[cfg(any(
                    target_os = "macos",
                    target_os = "freebsd",
                    target_os = "dragonfly",
                    target_os = "netbsd",
                    target_os = "openbsd",
                ))]
                {
                    a6.sin6_len = size_of::<sockaddr_in6>() as u8;
                }
                a6.sin6_family = libc::AF_INET6 as _;
                a6.sin6_port = u16::to_be(v6.port());
                a6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                a6.sin6_flowinfo = u32::to_be(v6.flowinfo());
                a6.sin6_scope_id = v6.scope_id();
                size_of::<sockaddr_in6>() as socklen_t
            }
        }
    }
}

impl UdpSocketMsgExt for UdpSocket {
    fn poll_recvmsg(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>> {
        let mut c_addr = RawSocketAddr::default();
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };

        let mut msghdr = unsafe { mem::zeroed::<libc::msghdr>() };
        msghdr.msg_name = c_addr.buf.as_mut_ptr() as *mut c_void;
        msghdr.msg_namelen = c_addr.buf.len() as socklen_t;
        msghdr.msg_iov = ptr::from_mut(&mut iov);
        msghdr.msg_iovlen = 1;
        if !oob.is_empty() {
            msghdr.msg_control = oob.as_mut_ptr() as *mut c_void;
            msghdr.msg_controllen = oob.len() as _;
        }

        let raw_fd = self.as_raw_fd();
        let mut recvmsg = || {
            let r = unsafe { libc::recvmsg(raw_fd, ptr::from_mut(&mut msghdr), libc::MSG_DONTWAIT) };
            if r < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(r as usize)
            }
        };

        let len = loop {
            ready!(self.poll_recv_ready(cx))?;
            match self.try_io(Interest::READABLE, &mut recvmsg) {
                Ok(nr) => break nr,
                Err(e) => {
                    if e.kind() == io::ErrorKind::WouldBlock {
                        continue;
                    } else {
                        return Poll::Ready(Err(e));
                    }
                }
            }
        };

        let Some(source) = c_addr.to_std() else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported source address family",
            )));
        };
        Poll::Ready(Ok(UdpRecvInfo {
            len,
            oob_len: msghdr.msg_controllen as usize,
            flags: msghdr.msg_flags,
            source,
        }))
    }

    fn poll_sendmsg(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        oob: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<(usize, usize)>> {
        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "illumos",
            target_os = "solaris",
        ))]
        let flags = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
        #[cfg(not(any(
            target_os = "linux",
            target_os = "android",
            target_os = "freebsd",
            target_os = "dragonfly",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "illumos",
            target_os = "solaris",
        )))]
        let flags = libc::MSG_DONTWAIT;

        let mut c_addr = RawSocketAddr::default();
        let c_addr_len = c_addr.set_std(target);
        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut c_void,
            iov_len: buf.len(),
        };

        let mut msghdr = unsafe { mem::zeroed::<libc::msghdr>() };
        msghdr.msg_name = c_addr.buf.as_mut_ptr() as *mut c_void;
        msghdr.msg_namelen = c_addr_len;
        msghdr.msg_iov = ptr::from_mut(&mut iov);
        msghdr.msg_iovlen = 1;
        if !oob.is_empty() {
            msghdr.msg_control = oob.as_ptr() as *mut c_void;
            msghdr.msg_controllen = oob.len() as _;
        }

        let raw_fd = self.as_raw_fd();
        let mut sendmsg = || {
            let r = unsafe { libc::sendmsg(raw_fd, ptr::from_ref(&msghdr), flags) };
            if r < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(r as usize)
            }
        };

        loop {
            ready!(self.poll_send_ready(cx))?;
            match self.try_io(Interest::WRITABLE, &mut sendmsg) {
                Ok(nw) => return Poll::Ready(Ok((nw, oob.len()))),
                Err(e) => {
                    if e.kind() == io::ErrorKind::WouldBlock {
                        continue;
                    } else {
                        return Poll::Ready(Err(e));
                    }
                }
            }
        }
    }
}

unsafe fn setsockopt<T>(fd: c_int, level: c_int, name: c_int, value: T) -> io::Result<()>
where
    T: Copy,
{
    let payload = &value as *const T as *const c_void;
    let ret = unsafe { libc::setsockopt(fd, level, name, payload, size_of::<T>() as socklen_t) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SetDscp for UdpSocket {
    fn set_dscp(&self, dscp: u8) -> io::Result<()> {
        if dscp > MAX_DSCP {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid dscp value {dscp}"),
            ));
        }
        let tos = c_int::from(dscp << 2);
        let fd = self.as_raw_fd();
        match self.local_addr()? {
            SocketAddr::V4(_) => unsafe { setsockopt(fd, libc::IPPROTO_IP, libc::IP_TOS, tos) },
            SocketAddr::V6(_) => {
                unsafe { setsockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, tos)? };
                // for ipv4 traffic on dual stack sockets
                let _ = unsafe { setsockopt(fd, libc::IPPROTO_IP, libc::IP_TOS, tos) };
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn raw_addr() {
        for s in ["192.0.2.1:53", "[2001:db8::1]:8443"] {
            let addr = SocketAddr::from_str(s).unwrap();
            let mut raw = RawSocketAddr::default();
            raw.set_std(addr);
            assert_eq!(raw.to_std(), Some(addr));
        }
        assert!(RawSocketAddr::default().to_std().is_none());
    }

    #[tokio::test]
    async fn msg_round_trip() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        let (nw, oob_nw) = std::future::poll_fn(|cx| a.poll_sendmsg(cx, b"ping", &[], b_addr))
            .await
            .unwrap();
        assert_eq!(nw, 4);
        assert_eq!(oob_nw, 0);

        let mut buf = [0u8; 64];
        let mut oob = [0u8; 64];
        let info = std::future::poll_fn(|cx| b.poll_recvmsg(cx, &mut buf, &mut oob))
            .await
            .unwrap();
        assert_eq!(&buf[..info.len], b"ping");
        assert_eq!(info.source, a_addr);
        assert_eq!(info.oob_len, 0);
    }

    #[tokio::test]
    async fn dscp() {
        let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        s.set_dscp(46).unwrap();
        let e = s.set_dscp(64).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }
}
