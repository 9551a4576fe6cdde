/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::collections::TryReserveError;
use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitWrapError {
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("rate limit wait cancelled")]
    WaitCancelled,
    #[error("rate limit wait timed out after {0:?}")]
    WaitTimeout(Duration),
    #[error("failed to stage undelivered data: {0}")]
    StagingFailed(#[from] TryReserveError),
}

impl LimitWrapError {
    fn io_error_kind(&self) -> io::ErrorKind {
        match self {
            LimitWrapError::UnsupportedOperation => io::ErrorKind::Unsupported,
            LimitWrapError::WaitCancelled => io::ErrorKind::ConnectionAborted,
            LimitWrapError::WaitTimeout(_) => io::ErrorKind::TimedOut,
            LimitWrapError::StagingFailed(_) => io::ErrorKind::OutOfMemory,
        }
    }
}

impl From<LimitWrapError> for io::Error {
    fn from(e: LimitWrapError) -> Self {
        io::Error::new(e.io_error_kind(), e)
    }
}

pub(crate) fn unsupported() -> io::Error {
    LimitWrapError::UnsupportedOperation.into()
}

/// Check if the error means the requested capability is absent on the wrapped connection.
pub fn is_unsupported(e: &io::Error) -> bool {
    e.get_ref()
        .and_then(|e| e.downcast_ref::<LimitWrapError>())
        .is_some_and(|e| matches!(e, LimitWrapError::UnsupportedOperation))
}
