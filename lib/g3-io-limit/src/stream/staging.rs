/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::collections::{TryReserveError, VecDeque};

use tokio::io::ReadBuf;

/// Bytes already received from the peer but not yet released by the limiter.
#[derive(Default)]
pub(super) struct StagingBuffer {
    buf: VecDeque<u8>,
}

impl StagingBuffer {
    #[inline]
    pub(super) fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub(super) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append to the tail. Nothing is appended if the allocation fails.
    pub(super) fn stage(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        self.buf.try_reserve(data.len())?;
        self.buf.extend(data);
        Ok(())
    }

    /// Move at most `max` bytes from the head into `buf`, returns the moved size.
    pub(super) fn drain_into(&mut self, buf: &mut ReadBuf<'_>, max: usize) -> usize {
        let to_move = max.min(buf.remaining()).min(self.buf.len());
        let (a, b) = self.buf.as_slices();
        if to_move <= a.len() {
            buf.put_slice(&a[..to_move]);
        } else {
            buf.put_slice(a);
            buf.put_slice(&b[..to_move - a.len()]);
        }
        self.buf.drain(..to_move);
        if self.buf.is_empty() {
            self.buf.shrink_to(0);
        }
        to_move
    }
}
