/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2026 ByteDance and/or its affiliates.
 */

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio_util::either::Either;

use crate::{ArcRateLimiter, Pacer, host_key};

mod limited;
pub use limited::RateLimitedStream;

mod staging;

pub type MaybeRateLimitedStream<S> = Either<S, RateLimitedStream<S>>;

/// Wrap an accepted stream so its traffic is paced by the limiters of the `peer` host.
///
/// The stream is returned unchanged if there is no rate limiter. The wrapped stream uses a child
/// of `pacer`, so cancelling `pacer` also unblocks it.
pub fn wrap_stream<S>(
    rate_limiter: Option<&ArcRateLimiter>,
    stream: S,
    peer: SocketAddr,
    pacer: &Pacer,
) -> MaybeRateLimitedStream<S> {
    match rate_limiter {
        Some(rate_limiter) => Either::Right(RateLimitedStream::new(
            stream,
            host_key(peer),
            rate_limiter.clone(),
            pacer.child(),
        )),
        None => Either::Left(stream),
    }
}

pub fn wrap_tcp_stream(
    rate_limiter: Option<&ArcRateLimiter>,
    stream: TcpStream,
    pacer: &Pacer,
) -> io::Result<MaybeRateLimitedStream<TcpStream>> {
    let peer = stream.peer_addr()?;
    Ok(wrap_stream(rate_limiter, stream, peer, pacer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::str::FromStr;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    use crate::testing::{FixedGrant, HostTable};

    #[tokio::test]
    async fn no_rate_limiter() {
        let mock = Builder::new().read(b"hello").write(b"world").build();
        let peer = SocketAddr::from_str("192.0.2.1:1234").unwrap();
        let mut stream = wrap_stream(None, mock, peer, &Pacer::default());
        assert!(matches!(stream, Either::Left(_)));

        let mut buf = [0u8; 16];
        let nr = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..nr], b"hello");
        stream.write_all(b"world").await.unwrap();
    }

    #[tokio::test]
    async fn keyed_by_canonical_host() {
        let host = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let rate_limiter = HostTable::default()
            .with_ingress(host, Arc::new(FixedGrant::new(2)))
            .into_arc();
        let mock = Builder::new().read(b"hello").build();
        let peer = SocketAddr::from_str("[::ffff:192.0.2.1]:1234").unwrap();
        let mut stream = wrap_stream(Some(&rate_limiter), mock, peer, &Pacer::default());
        let Either::Right(limited) = &stream else {
            panic!("stream should be wrapped");
        };
        assert_eq!(limited.host(), host);

        let mut buf = [0u8; 16];
        let nr = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..nr], b"he");
    }

    #[tokio::test]
    async fn parent_cancel() {
        let host = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let rate_limiter = HostTable::default()
            .with_ingress(host, Arc::new(FixedGrant::new(2)))
            .into_arc();
        let pacer = Pacer::default();
        let peer = SocketAddr::new(host, 1234);
        let stream = wrap_stream(Some(&rate_limiter), Builder::new().build(), peer, &pacer);
        let Either::Right(limited) = stream else {
            panic!("stream should be wrapped");
        };
        pacer.cancel();
        assert!(limited.pacing_cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn tcp_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"0123456789").await.unwrap();
        });

        let (s, _) = listener.accept().await.unwrap();
        let rate_limiter = HostTable::default()
            .with_ingress(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                Arc::new(FixedGrant::new(3)),
            )
            .into_arc();
        let mut stream = wrap_tcp_stream(Some(&rate_limiter), s, &Pacer::default()).unwrap();

        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"0123456789");
        client.await.unwrap();
    }
}
