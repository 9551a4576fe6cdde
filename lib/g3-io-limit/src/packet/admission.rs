/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use futures_util::FutureExt;
use log::debug;

use super::UdpRecvInfo;
use crate::pacing::PacingWait;
use crate::{ArcRateLimiter, Pacer, host_key};

pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct HeldDatagram {
    wait: PacingWait,
    info: UdpRecvInfo,
    data: Box<[u8]>,
    oob: Box<[u8]>,
}

impl HeldDatagram {
    fn release(self, buf: &mut [u8], oob: &mut [u8]) -> UdpRecvInfo {
        let len = self.data.len().min(buf.len());
        buf[..len].copy_from_slice(&self.data[..len]);
        let oob_len = self.oob.len().min(oob.len());
        oob[..oob_len].copy_from_slice(&self.oob[..oob_len]);
        UdpRecvInfo {
            len,
            oob_len,
            ..self.info
        }
    }
}

/// Whole datagram admission for the receive direction.
///
/// A datagram is either admitted as a whole or discarded, in which case the next one is
/// received. If the limiter has to suspend, the datagram is held here until the wait completes,
/// so the receive call can be polled again with the same or another buffer.
#[derive(Default)]
pub(super) struct RecvAdmission {
    held: Option<HeldDatagram>,
}

impl RecvAdmission {
    pub(super) fn poll_admit<F>(
        &mut self,
        cx: &mut Context<'_>,
        rate_limiter: Option<&ArcRateLimiter>,
        pacer: &Pacer,
        buf: &mut [u8],
        oob: &mut [u8],
        mut recv: F,
    ) -> Poll<io::Result<UdpRecvInfo>>
    where
        F: FnMut(&mut Context<'_>, &mut [u8], &mut [u8]) -> Poll<io::Result<UdpRecvInfo>>,
    {
        if let Some(mut held) = self.held.take() {
            match held.wait.poll_unpin(cx) {
                Poll::Pending => {
                    self.held = Some(held);
                    return Poll::Pending;
                }
                Poll::Ready(Ok(granted)) => {
                    if granted >= held.info.len {
                        return Poll::Ready(Ok(held.release(buf, oob)));
                    }
                    debug!(
                        "discard {} bytes datagram from {}, permitted {granted}",
                        held.info.len, held.info.source
                    );
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
            }
        }

        let mut discarded = 0usize;
        loop {
            let mut info = ready!(recv(cx, &mut *buf, &mut *oob))?;
            info.len = info.len.min(buf.len());
            info.oob_len = info.oob_len.min(oob.len());
            if info.len == 0 {
                return Poll::Ready(Ok(info));
            }
            let Some(limiter) = rate_limiter.and_then(|r| r.ingress(host_key(info.source))) else {
                return Poll::Ready(Ok(info));
            };

            let mut wait = pacer.wait(limiter.as_ref(), info.len);
            match wait.poll_unpin(cx) {
                Poll::Ready(Ok(granted)) => {
                    if granted >= info.len {
                        return Poll::Ready(Ok(info));
                    }
                    debug!(
                        "discard {} bytes datagram from {}, permitted {granted}",
                        info.len, info.source
                    );
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                Poll::Pending => {
                    self.held = Some(HeldDatagram {
                        wait,
                        info,
                        data: Box::from(&buf[..info.len]),
                        oob: Box::from(&oob[..info.oob_len]),
                    });
                    return Poll::Pending;
                }
            }

            discarded += 1;
            if discarded >= pacer.discard_yield() {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
        }
    }

    #[cfg(test)]
    fn is_holding(&self) -> bool {
        self.held.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum SendVerdict {
    Transmit,
    Discard,
}

#[derive(Default)]
enum SendState {
    #[default]
    Idle,
    Waiting {
        wait: PacingWait,
        len: usize,
        target: SocketAddr,
    },
    Admitted {
        len: usize,
        target: SocketAddr,
    },
}

/// Whole datagram admission for the send direction.
///
/// An admitted datagram stays admitted until [`SendAdmission::finish`] is called, so a send
/// that is pending on the socket will not consume tokens again when polled later.
#[derive(Default)]
pub(super) struct SendAdmission {
    state: SendState,
}

impl SendAdmission {
    pub(super) fn poll_admit(
        &mut self,
        cx: &mut Context<'_>,
        rate_limiter: Option<&ArcRateLimiter>,
        pacer: &Pacer,
        len: usize,
        target: SocketAddr,
    ) -> Poll<io::Result<SendVerdict>> {
        loop {
            match &mut self.state {
                SendState::Idle => {
                    if len == 0 {
                        return Poll::Ready(Ok(SendVerdict::Transmit));
                    }
                    let Some(limiter) = rate_limiter.and_then(|r| r.egress(host_key(target)))
                    else {
                        return Poll::Ready(Ok(SendVerdict::Transmit));
                    };
                    self.state = SendState::Waiting {
                        wait: pacer.wait(limiter.as_ref(), len),
                        len,
                        target,
                    };
                }
                SendState::Waiting {
                    wait,
                    len: wait_len,
                    target: wait_target,
                } => {
                    if *wait_len != len || *wait_target != target {
                        // the previous send has been abandoned
                        self.state = SendState::Idle;
                        continue;
                    }
                    let r = ready!(wait.poll_unpin(cx));
                    self.state = SendState::Idle;
                    return match r {
                        Ok(granted) if granted >= len => {
                            self.state = SendState::Admitted { len, target };
                            Poll::Ready(Ok(SendVerdict::Transmit))
                        }
                        Ok(granted) => {
                            debug!("drop {len} bytes datagram to {target}, permitted {granted}");
                            Poll::Ready(Ok(SendVerdict::Discard))
                        }
                        Err(e) => Poll::Ready(Err(e.into())),
                    };
                }
                SendState::Admitted {
                    len: admitted_len,
                    target: admitted_target,
                } => {
                    if *admitted_len == len && *admitted_target == target {
                        return Poll::Ready(Ok(SendVerdict::Transmit));
                    }
                    self.state = SendState::Idle;
                }
            }
        }
    }

    /// Mark the end of the real send of the admitted datagram.
    pub(super) fn finish(&mut self) {
        self.state = SendState::Idle;
    }
}
