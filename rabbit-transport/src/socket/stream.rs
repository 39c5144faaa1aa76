//! Byte-stream socket

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rabbit_protocol::{Encryption, PlainEncryption};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Conn, Deadline};
use crate::deadline::DeadlineTimer;

/// Socket over any ordered byte stream
///
/// Reads decrypt exactly the bytes returned, writes encrypt the caller's
/// buffer in place and send all of it.
pub struct StreamSocket<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    encryption: Arc<dyn Encryption>,
    read_timer: DeadlineTimer,
    write_timer: DeadlineTimer,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl StreamSocket<TcpStream> {
    /// Wrap a TCP connection, recording both of its addresses
    pub fn tcp(stream: TcpStream, encryption: Arc<dyn Encryption>) -> io::Result<Self> {
        // The halves no longer expose the addresses once split
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        Ok(Self::new(stream, encryption).with_addrs(local, peer))
    }
}

impl<S> StreamSocket<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Wrap `stream`, encrypting everything that crosses it
    pub fn new(stream: S, encryption: Arc<dyn Encryption>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            encryption,
            read_timer: DeadlineTimer::new(),
            write_timer: DeadlineTimer::new(),
            local_addr: None,
            peer_addr: None,
        }
    }

    /// Record the endpoint addresses of the underlying stream
    pub fn with_addrs(mut self, local: SocketAddr, peer: SocketAddr) -> Self {
        self.local_addr = Some(local);
        self.peer_addr = Some(peer);
        self
    }

    /// Wrap `stream` without encryption
    pub fn plain(stream: S) -> Self {
        Self::new(stream, Arc::new(PlainEncryption))
    }

    /// The cipher applied to this socket's traffic
    pub fn encryption(&self) -> &Arc<dyn Encryption> {
        &self.encryption
    }

    /// Local address, if known
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Remote address, if known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

#[async_trait]
impl<S> Conn for StreamSocket<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_timer
            .run(async {
                let mut reader = self.reader.lock().await;
                let n = reader.read(buf).await?;
                self.encryption.decrypt(&mut buf[..n]);
                Ok(n)
            })
            .await
    }

    /// A failed write leaves the keystream ahead of the peer's, so the
    /// connection must be dropped afterwards.
    async fn write(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.write_timer
            .run(async {
                let mut writer = self.writer.lock().await;
                self.encryption.encrypt(buf);
                writer.write_all(buf).await?;
                writer.flush().await
            })
            .await?;
        Ok(buf.len())
    }

    async fn close(&self) -> io::Result<()> {
        if self.write_timer.is_closed() {
            return Ok(());
        }
        self.read_timer.close();
        self.write_timer.close();

        // Closing the timers aborts any write holding the lock
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl<S> Deadline for StreamSocket<S> {
    fn set_read_deadline(&self, at: Option<Instant>) {
        self.read_timer.set(at);
    }

    fn set_write_deadline(&self, at: Option<Instant>) {
        self.write_timer.set(at);
    }

    fn read_deadline(&self) -> Option<Instant> {
        self.read_timer.get()
    }

    fn write_deadline(&self) -> Option<Instant> {
        self.write_timer.get()
    }
}

impl<S> fmt::Debug for StreamSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSocket")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("read_deadline", &self.read_timer.get())
            .field("write_deadline", &self.write_timer.get())
            .field("closed", &self.write_timer.is_closed())
            .finish_non_exhaustive()
    }
}
