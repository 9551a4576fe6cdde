/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::{ArcLimiter, ArcRateLimiter, LimitWait, Limiter, PacketConn, RateLimiter};

/// Grant `min(requested, max)` at once.
pub(crate) struct FixedGrant {
    max: usize,
}

impl FixedGrant {
    pub(crate) fn new(max: usize) -> Self {
        FixedGrant { max }
    }
}

impl Limiter for FixedGrant {
    fn wait(&self, requested: usize) -> LimitWait {
        Box::pin(std::future::ready(requested.min(self.max)))
    }
}

/// Grant the scripted values in order, then `min(requested, max)`.
pub(crate) struct ScriptedGrant {
    grants: Mutex<VecDeque<usize>>,
    max: usize,
}

impl ScriptedGrant {
    pub(crate) fn new(grants: &[usize], max: usize) -> Self {
        ScriptedGrant {
            grants: Mutex::new(grants.iter().copied().collect()),
            max,
        }
    }
}

impl Limiter for ScriptedGrant {
    fn wait(&self, requested: usize) -> LimitWait {
        let granted = self
            .grants
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(requested.min(self.max));
        Box::pin(std::future::ready(granted))
    }
}

/// Never grant anything.
pub(crate) struct PendingLimiter;

impl Limiter for PendingLimiter {
    fn wait(&self, _requested: usize) -> LimitWait {
        Box::pin(std::future::pending())
    }
}

#[derive(Default)]
pub(crate) struct HostTable {
    ingress: Mutex<HashMap<IpAddr, ArcLimiter>>,
    egress: Mutex<HashMap<IpAddr, ArcLimiter>>,
}

impl HostTable {
    pub(crate) fn with_ingress(self, host: IpAddr, limiter: ArcLimiter) -> Self {
        self.ingress.lock().unwrap().insert(host, limiter);
        self
    }

    pub(crate) fn with_egress(self, host: IpAddr, limiter: ArcLimiter) -> Self {
        self.egress.lock().unwrap().insert(host, limiter);
        self
    }

    pub(crate) fn remove_ingress(&self, host: IpAddr) {
        self.ingress.lock().unwrap().remove(&host);
    }

    pub(crate) fn into_arc(self) -> ArcRateLimiter {
        Arc::new(self)
    }
}

impl RateLimiter for HostTable {
    fn ingress(&self, host: IpAddr) -> Option<ArcLimiter> {
        self.ingress.lock().unwrap().get(&host).cloned()
    }

    fn egress(&self, host: IpAddr) -> Option<ArcLimiter> {
        self.egress.lock().unwrap().get(&host).cloned()
    }
}

/// A packet connection with no optional capability.
pub(crate) struct MockPacketConn {
    local: SocketAddr,
    incoming: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MockPacketConn {
    pub(crate) fn new(local: SocketAddr) -> Self {
        MockPacketConn {
            local,
            incoming: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_incoming(&self, data: &[u8], source: SocketAddr) {
        self.incoming
            .lock()
            .unwrap()
            .push_back((data.to_vec(), source));
    }

    pub(crate) fn incoming_len(&self) -> usize {
        self.incoming.lock().unwrap().len()
    }

    pub(crate) fn take_sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl PacketConn for MockPacketConn {
    fn poll_recv_from(
        &self,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, SocketAddr)>> {
        match self.incoming.lock().unwrap().pop_front() {
            Some((data, source)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Poll::Ready(Ok((len, source)))
            }
            None => Poll::Pending,
        }
    }

    fn poll_send_to(
        &self,
        _cx: &mut Context<'_>,
        buf: &[u8],
        target: SocketAddr,
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().push((buf.to_vec(), target));
        Poll::Ready(Ok(buf.len()))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}
