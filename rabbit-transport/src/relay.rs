//! Byte relay between two connections
//!
//! Each pump copies through one pooled buffer, at most [`DATA_LIMIT`] bytes
//! per read. Before every read the source's read deadline is pushed to
//! `now + idle_timeout`, so a silent peer cannot hold a relay open forever.

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};
use rabbit_protocol::{BufferPool, DATA_LIMIT};
use tokio::time::Instant;

use crate::socket::{Conn, Deadline};

/// Last time any pump sharing this tracker moved data
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

/// Copy `src` into `dst` until `src` reaches end of stream
///
/// Returns the number of bytes copied. Fails with
/// [`io::ErrorKind::TimedOut`] when `src` stays silent for `idle_timeout`.
/// Errors from either side end the relay and are returned unchanged.
pub async fn relay<S, D>(
    src: &S,
    dst: &D,
    pool: &BufferPool,
    idle_timeout: Duration,
) -> io::Result<u64>
where
    S: Conn + Deadline + ?Sized,
    D: Conn + ?Sized,
{
    let activity = Activity::new();
    let (copied, res) = pump(src, dst, pool, idle_timeout, &activity).await;
    res.map(|()| copied)
}

/// Relay both directions between `a` and `b` concurrently
///
/// When either direction finishes, both connections are closed so the other
/// direction ends promptly. A direction whose source goes idle keeps waiting
/// as long as the opposite direction is still moving data.
///
/// Returns `(a_to_b, b_to_a)` byte counts, or the first error.
pub async fn relay_bidirectional<A, B>(
    a: &A,
    b: &B,
    pool: &BufferPool,
    idle_timeout: Duration,
) -> io::Result<(u64, u64)>
where
    A: Conn + Deadline + ?Sized,
    B: Conn + Deadline + ?Sized,
{
    debug!("relay started, idle timeout {:?}", idle_timeout);
    let activity = Activity::new();

    let forward = async {
        let res = pump(a, b, pool, idle_timeout, &activity).await;
        close_both(a, b).await;
        res
    };
    let backward = async {
        let res = pump(b, a, pool, idle_timeout, &activity).await;
        close_both(a, b).await;
        res
    };

    let ((a_to_b, forward_res), (b_to_a, backward_res)) = tokio::join!(forward, backward);
    info!("relay finished: {} bytes out, {} bytes back", a_to_b, b_to_a);

    settle(forward_res)?;
    settle(backward_res)?;
    Ok((a_to_b, b_to_a))
}

async fn pump<S, D>(
    src: &S,
    dst: &D,
    pool: &BufferPool,
    idle_timeout: Duration,
    activity: &Activity,
) -> (u64, io::Result<()>)
where
    S: Conn + Deadline + ?Sized,
    D: Conn + ?Sized,
{
    let mut buf = pool.get();
    let limit = buf.len().min(DATA_LIMIT);
    let mut copied = 0u64;

    let res = loop {
        let deadline = Instant::now() + idle_timeout;
        src.set_read_deadline(Some(deadline));

        let n = match src.read(&mut buf[..limit]).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut && Instant::now() >= deadline => {
                if activity.idle_for() < idle_timeout {
                    continue;
                }
                debug!("relay idle for {:?}, giving up", idle_timeout);
                break Err(e);
            }
            Err(e) => break Err(e),
        };

        activity.touch();
        if let Err(e) = dst.write(&mut buf[..n]).await {
            break Err(e);
        }
        copied += n as u64;
    };

    src.set_read_deadline(None);
    (copied, res)
}

async fn close_both<A, B>(a: &A, b: &B)
where
    A: Conn + ?Sized,
    B: Conn + ?Sized,
{
    if let Err(e) = a.close().await {
        debug!("relay close failed: {}", e);
    }
    if let Err(e) = b.close().await {
        debug!("relay close failed: {}", e);
    }
}

/// A pump cut short by the other direction's close is a normal finish
fn settle(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::StreamSocket;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_relay_until_eof() {
        let pool = BufferPool::new(1024);
        let (src_peer, src) = tokio::io::duplex(4096);
        let (dst, mut dst_peer) = tokio::io::duplex(64 * 1024);
        let src = StreamSocket::plain(src);
        let dst = StreamSocket::plain(dst);

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let writer = {
            let payload = payload.clone();
            tokio::spawn(async move {
                let mut src_peer = src_peer;
                src_peer.write_all(&payload).await.unwrap();
            })
        };

        let copied = relay(&src, &dst, &pool, Duration::from_secs(5)).await.unwrap();
        writer.await.unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(src.read_deadline(), None);

        let mut received = vec![0u8; payload.len()];
        dst_peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_relay_respects_data_limit() {
        // Buffers larger than DATA_LIMIT are only partly filled per read
        let pool = BufferPool::new(DATA_LIMIT * 2);
        let (mut src_peer, src) = tokio::io::duplex(DATA_LIMIT * 4);
        let (dst, mut dst_peer) = tokio::io::duplex(DATA_LIMIT * 4);
        let src = StreamSocket::plain(src);
        let dst = StreamSocket::plain(dst);

        src_peer.write_all(&vec![7u8; DATA_LIMIT * 2]).await.unwrap();
        drop(src_peer);

        let copied = relay(&src, &dst, &pool, Duration::from_secs(5)).await.unwrap();
        assert_eq!(copied, (DATA_LIMIT * 2) as u64);

        let mut received = vec![0u8; DATA_LIMIT * 2];
        dst_peer.read_exact(&mut received).await.unwrap();
        assert!(received.iter().all(|&b| b == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_idle_timeout() {
        let pool = BufferPool::new(1024);
        let (mut src_peer, src) = tokio::io::duplex(1024);
        let (dst, _dst_peer) = tokio::io::duplex(1024);
        let src = StreamSocket::plain(src);
        let dst = StreamSocket::plain(dst);

        src_peer.write_all(b"some bytes").await.unwrap();

        let started = Instant::now();
        let err = relay(&src, &dst, &pool, Duration::from_secs(30)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bidirectional_closes_both_sides() {
        let pool = BufferPool::new(1024);
        let (mut a_peer, a) = tokio::io::duplex(4096);
        let (b, mut b_peer) = tokio::io::duplex(4096);
        let a = StreamSocket::plain(a);
        let b = StreamSocket::plain(b);

        let peers = tokio::spawn(async move {
            b_peer.write_all(b"welcome").await.unwrap();
            a_peer.write_all(b"request").await.unwrap();

            let mut buf = [0u8; 7];
            b_peer.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"request");
            a_peer.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"welcome");

            // Client hangs up; the relay must tear down the server side too
            drop(a_peer);
            let mut rest = Vec::new();
            b_peer.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let (a_to_b, b_to_a) = relay_bidirectional(&a, &b, &pool, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!((a_to_b, b_to_a), (7, 7));
        assert!(peers.await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bidirectional_one_way_traffic_is_not_idle() {
        let pool = BufferPool::new(1024);
        let (a_peer, a) = tokio::io::duplex(4096);
        let (b, mut b_peer) = tokio::io::duplex(4096);
        let a = StreamSocket::plain(a);
        let b = StreamSocket::plain(b);

        // Only the server talks, in chunks spaced under the idle timeout,
        // for longer than the idle timeout in total
        let server = tokio::spawn(async move {
            for _ in 0..5 {
                b_peer.write_all(b"tick").await.unwrap();
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
            drop(b_peer);
        });
        let client = tokio::spawn(async move {
            let mut a_peer = a_peer;
            let mut received = Vec::new();
            a_peer.read_to_end(&mut received).await.unwrap();
            received
        });

        let (a_to_b, b_to_a) = relay_bidirectional(&a, &b, &pool, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!((a_to_b, b_to_a), (0, 20));
        server.await.unwrap();
        assert_eq!(client.await.unwrap().len(), 20);
    }
}
