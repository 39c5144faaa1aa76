//! Cancellable connections
//!
//! Sockets can only be interrupted through their deadlines. This module
//! adapts an external [`CancellationToken`] onto that primitive: while a read
//! or write is in flight, the token is watched alongside it, and if it fires
//! the direction's deadline is forced to "now" so the call fails with
//! [`io::ErrorKind::TimedOut`].
//!
//! The watcher lives inside the call's own future, so it can never outlive
//! the call. A forced deadline is restored when the call returns, which makes
//! cancellation strictly per-call: a token that fires after a call completed
//! has no effect on the next one.
//!
//! # Example
//!
//! ```ignore
//! let conn = CancellableConn::new(StreamSocket::plain(tcp));
//! let socket = CryptSocket::new(conn, encryption);
//!
//! let token = CancellationToken::new();
//! let n = socket.read(&token, &mut buf).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use rabbit_protocol::Encryption;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::deadline::timeout_error;
use crate::socket::{Conn, Deadline};

/// Connection whose calls take a cancellation token
#[async_trait]
pub trait CancellableSocket: Send + Sync {
    /// Read, failing with [`io::ErrorKind::TimedOut`] once `cancel` fires
    async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf`, failing with [`io::ErrorKind::TimedOut`] once
    /// `cancel` fires
    async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the connection
    async fn close(&self) -> io::Result<()>;

    /// Bind a token, producing a plain [`Conn`]
    fn with_cancel(self, cancel: CancellationToken) -> WithCancel<Self>
    where
        Self: Sized,
    {
        WithCancel {
            socket: self,
            cancel,
        }
    }
}

#[async_trait]
impl<S: CancellableSocket + ?Sized> CancellableSocket for &S {
    async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(cancel, buf).await
    }

    async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        (**self).write(cancel, buf).await
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: CancellableSocket + ?Sized> CancellableSocket for Arc<S> {
    async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(cancel, buf).await
    }

    async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        (**self).write(cancel, buf).await
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn deadline<C: Deadline>(self, conn: &C) -> Option<Instant> {
        match self {
            Direction::Read => conn.read_deadline(),
            Direction::Write => conn.write_deadline(),
        }
    }

    fn set_deadline<C: Deadline>(self, conn: &C, at: Option<Instant>) {
        match self {
            Direction::Read => conn.set_read_deadline(at),
            Direction::Write => conn.set_write_deadline(at),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Restores a forced deadline on every exit path, including drop of the call
struct ForcedDeadline<'a, C: Deadline> {
    conn: &'a C,
    direction: Direction,
    previous: Option<Option<Instant>>,
}

impl<'a, C: Deadline> ForcedDeadline<'a, C> {
    fn new(conn: &'a C, direction: Direction) -> Self {
        Self {
            conn,
            direction,
            previous: None,
        }
    }

    fn force(&mut self) {
        if self.previous.is_none() {
            self.previous = Some(self.direction.deadline(self.conn));
        }
        self.direction.set_deadline(self.conn, Some(Instant::now()));
    }
}

impl<C: Deadline> Drop for ForcedDeadline<'_, C> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.direction.set_deadline(self.conn, previous);
        }
    }
}

/// Makes each read or write of `C` cancellable by a token
pub struct CancellableConn<C> {
    inner: C,
}

impl<C> CancellableConn<C>
where
    C: Conn + Deadline,
{
    /// Wrap a connection
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Get a reference to the wrapped connection
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Unwrap the connection
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Read, failing with [`io::ErrorKind::TimedOut`] once `cancel` fires
    ///
    /// A token cancelled before the call aborts the call itself, not only a
    /// later one.
    pub async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        self.guarded(Direction::Read, cancel, self.inner.read(buf)).await
    }

    /// Write all of `buf`, failing with [`io::ErrorKind::TimedOut`] once
    /// `cancel` fires
    pub async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        self.guarded(Direction::Write, cancel, self.inner.write(buf)).await
    }

    /// Close the wrapped connection
    pub async fn close(&self) -> io::Result<()> {
        self.inner.close().await
    }

    async fn guarded<F>(
        &self,
        direction: Direction,
        cancel: &CancellationToken,
        op: F,
    ) -> io::Result<usize>
    where
        F: Future<Output = io::Result<usize>>,
    {
        let mut forced = ForcedDeadline::new(&self.inner, direction);

        // The deadline must be in place before the call starts
        if cancel.is_cancelled() {
            forced.force();
            return op.await;
        }

        tokio::pin!(op);
        tokio::select! {
            biased;
            res = &mut op => res,
            _ = cancel.cancelled() => {
                debug!("{} cancelled, forcing deadline", direction);
                forced.force();
                op.await
            }
        }
    }
}

#[async_trait]
impl<C> CancellableSocket for CancellableConn<C>
where
    C: Conn + Deadline,
{
    async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        CancellableConn::read(self, cancel, buf).await
    }

    async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        CancellableConn::write(self, cancel, buf).await
    }

    async fn close(&self) -> io::Result<()> {
        CancellableConn::close(self).await
    }
}

impl<C: Deadline> Deadline for CancellableConn<C> {
    fn set_read_deadline(&self, at: Option<Instant>) {
        self.inner.set_read_deadline(at);
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        self.inner.set_write_deadline(at);
    }

    fn read_deadline(&self) -> Option<Instant> {
        self.inner.read_deadline()
    }

    fn write_deadline(&self) -> Option<Instant> {
        self.inner.write_deadline()
    }
}

impl<C: fmt::Debug> fmt::Debug for CancellableConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancellableConn").field(&self.inner).finish()
    }
}

/// Encrypting decorator over any cancellable socket
///
/// Writes encrypt the caller's buffer in place, reads decrypt exactly the
/// bytes returned. Substituting [`PlainEncryption`](rabbit_protocol::PlainEncryption)
/// makes it a pass-through.
pub struct CryptSocket<S> {
    inner: S,
    encryption: Arc<dyn Encryption>,
}

impl<S: CancellableSocket> CryptSocket<S> {
    pub fn new(inner: S, encryption: Arc<dyn Encryption>) -> Self {
        Self { inner, encryption }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: CancellableSocket> CancellableSocket for CryptSocket<S> {
    async fn read(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(cancel, buf).await?;
        self.encryption.decrypt(&mut buf[..n]);
        Ok(n)
    }

    /// A cancelled token fails the write before anything is encrypted. Any
    /// other failure leaves the keystream ahead of the peer's, so the
    /// connection must be dropped afterwards.
    async fn write(&self, cancel: &CancellationToken, buf: &mut [u8]) -> io::Result<usize> {
        if cancel.is_cancelled() {
            return Err(timeout_error());
        }
        self.encryption.encrypt(buf);
        self.inner.write(cancel, buf).await
    }

    async fn close(&self) -> io::Result<()> {
        self.inner.close().await
    }
}

impl<S: Deadline> Deadline for CryptSocket<S> {
    fn set_read_deadline(&self, at: Option<Instant>) {
        self.inner.set_read_deadline(at);
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        self.inner.set_write_deadline(at);
    }

    fn read_deadline(&self) -> Option<Instant> {
        self.inner.read_deadline()
    }

    fn write_deadline(&self) -> Option<Instant> {
        self.inner.write_deadline()
    }
}

impl<S: fmt::Debug> fmt::Debug for CryptSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptSocket")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

/// A cancellable socket with its token bound, usable wherever a [`Conn`] is
///
/// Created by [`CancellableSocket::with_cancel`].
#[derive(Debug)]
pub struct WithCancel<S> {
    socket: S,
    cancel: CancellationToken,
}

impl<S> WithCancel<S> {
    /// The bound token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn into_inner(self) -> S {
        self.socket
    }
}

#[async_trait]
impl<S: CancellableSocket> Conn for WithCancel<S> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        CancellableSocket::read(&self.socket, &self.cancel, buf).await
    }

    async fn write(&self, buf: &mut [u8]) -> io::Result<usize> {
        CancellableSocket::write(&self.socket, &self.cancel, buf).await
    }

    async fn close(&self) -> io::Result<()> {
        CancellableSocket::close(&self.socket).await
    }
}

impl<S: Deadline> Deadline for WithCancel<S> {
    fn set_read_deadline(&self, at: Option<Instant>) {
        self.socket.set_read_deadline(at);
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        self.socket.set_write_deadline(at);
    }

    fn read_deadline(&self) -> Option<Instant> {
        self.socket.read_deadline()
    }

    fn write_deadline(&self) -> Option<Instant> {
        self.socket.write_deadline()
    }
}
