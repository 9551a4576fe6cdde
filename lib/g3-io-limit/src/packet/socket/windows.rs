/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll, ready};

use tokio::net::UdpSocket;

use super::UdpSocketMsgExt;
use crate::error::unsupported;
use crate::packet::UdpRecvInfo;

// control data is not supported on windows

impl UdpSocketMsgExt for UdpSocket {
    fn poll_recvmsg(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
        _oob: &mut [u8],
    ) -> Poll<io::Result<UdpRecvInfo>> {
        let (len, source) = ready!(super::poll_recv_from_socket(self, cx, buf))?;
        Poll::Ready(Ok(UdpRecvInfo {
            len,
            oob_len: 0,
            flags: 0,
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
        if !oob.is_empty() {
            return Poll::Ready(Err(unsupported()));
        }
        let nw = ready!(UdpSocket::poll_send_to(self, cx, buf, target))?;
        Poll::Ready(Ok((nw, 0)))
    }
}
