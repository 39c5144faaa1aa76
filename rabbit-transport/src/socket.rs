//! Transport socket abstraction
//!
//! Every transport the proxy speaks over is reduced to the same small
//! capability set, so the handshake, relay and proxy logic never care which
//! concrete socket they hold.
//!
//! # Architecture
//!
//! - [`Conn`]: read / write / close.
//! - [`Deadline`]: per-direction deadlines, the only interruption primitive a
//!   socket offers.
//!
//! Two concrete sockets implement both:
//! - [`StreamSocket`]: any `AsyncRead + AsyncWrite` byte stream (TCP, TLS, ...)
//! - [`FramedSocket`]: any message tunnel exposed as a `Sink` + `Stream` of
//!   frames (length-delimited codec, WebSocket adapter, ...)
//!
//! Each socket holds an [`Encryption`](rabbit_protocol::Encryption) as a
//! field. Pass [`PlainEncryption`](rabbit_protocol::PlainEncryption) when
//! the transport below is already secure.
//!
//! # Concurrency
//!
//! A socket may be shared (`Arc`) between one reading task and one writing
//! task. The read and write halves are locked separately, so full-duplex
//! relaying never serializes. The cipher runs under the same lock as the I/O,
//! so keystream order always matches wire order.
//!
//! # Example
//!
//! ```ignore
//! use rabbit_transport::socket::{Conn, StreamSocket};
//!
//! let tcp = tokio::net::TcpStream::connect(addr).await?;
//! let socket = StreamSocket::new(tcp, encryption);
//!
//! let mut msg = *b"hello";
//! socket.write(&mut msg).await?; // `msg` now holds ciphertext
//! ```

mod framed;
mod stream;

pub use framed::{FramedSocket, MessageSink, MessageStream};
pub use stream::StreamSocket;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

/// Byte-moving capability shared by all transports
#[async_trait]
pub trait Conn: Send + Sync {
    /// Read up to `buf.len()` bytes, returning 0 at end of stream
    ///
    /// # Cancel Safety
    ///
    /// Implementations in this crate are cancel-safe: dropping the future
    /// before it completes loses no data.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer
    ///
    /// Encrypting sockets transform `buf` in place before sending it, so the
    /// caller's bytes are ciphertext afterwards. On success the return value
    /// is always `buf.len()`.
    async fn write(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the connection
    ///
    /// Pending and later reads and writes fail with
    /// [`io::ErrorKind::NotConnected`].
    async fn close(&self) -> io::Result<()>;
}

/// Per-direction deadlines
///
/// `None` clears a deadline. A deadline in the past fails the next call
/// immediately and interrupts a call already in flight.
pub trait Deadline {
    /// Set both deadlines
    fn set_deadline(&self, at: Option<Instant>) {
        self.set_read_deadline(at);
        self.set_write_deadline(at);
    }

    /// Set the read deadline
    fn set_read_deadline(&self, at: Option<Instant>);

    /// Set the write deadline
    fn set_write_deadline(&self, at: Option<Instant>);

    /// Current read deadline
    fn read_deadline(&self) -> Option<Instant>;

    /// Current write deadline
    fn write_deadline(&self) -> Option<Instant>;
}

#[async_trait]
impl<C: Conn + ?Sized> Conn for Arc<C> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf).await
    }

    async fn write(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).write(buf).await
    }

    async fn close(&self) -> io::Result<()> {
        (**self).close().await
    }
}

impl<C: Deadline + ?Sized> Deadline for &C {
    fn set_deadline(&self, at: Option<Instant>) {
        (**self).set_deadline(at)
    }

    fn set_read_deadline(&self, at: Option<Instant>) {
        (**self).set_read_deadline(at)
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        (**self).set_write_deadline(at)
    }

    fn read_deadline(&self) -> Option<Instant> {
        (**self).read_deadline()
    }

    fn write_deadline(&self) -> Option<Instant> {
        (**self).write_deadline()
    }
}

impl<C: Deadline + ?Sized> Deadline for Arc<C> {
    fn set_deadline(&self, at: Option<Instant>) {
        (**self).set_deadline(at)
    }

    fn set_read_deadline(&self, at: Option<Instant>) {
        (**self).set_read_deadline(at)
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        (**self).set_write_deadline(at)
    }

    fn read_deadline(&self) -> Option<Instant> {
        (**self).read_deadline()
    }

    fn write_deadline(&self) -> Option<Instant> {
        (**self).write_deadline()
    }
}

/// Read until `buf` is full
///
/// Fails with [`io::ErrorKind::UnexpectedEof`] if the stream ends first.
pub async fn read_exact<C: Conn + ?Sized>(conn: &C, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]).await? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", filled, buf.len()),
                ))
            }
            n => filled += n,
        }
    }
    Ok(())
}
