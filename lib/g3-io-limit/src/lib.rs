/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

mod config;
mod error;
mod limiter;
mod listen;
mod packet;
mod pacing;
mod stream;

pub use config::RateLimitWrapConfig;
pub use error::{LimitWrapError, is_unsupported};
pub use limiter::{ArcLimiter, ArcRateLimiter, LimitWait, Limiter, RateLimiter, host_key};
pub use listen::RateLimitedTcpListener;
pub use packet::*;
pub use pacing::Pacer;
pub use stream::{MaybeRateLimitedStream, RateLimitedStream, wrap_stream, wrap_tcp_stream};

#[cfg(test)]
mod testing;
