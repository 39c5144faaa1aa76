//! Message-oriented socket
//!
//! Adapts a tunnel that moves whole frames (a length-delimited codec, a
//! WebSocket adapter) to the byte-stream [`Conn`] contract. Each write becomes
//! one frame. Frames larger than the caller's read buffer are split across
//! consecutive reads, never truncated.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use rabbit_protocol::{Encryption, PlainEncryption};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Conn, Deadline};
use crate::deadline::DeadlineTimer;

/// Outgoing half of a frame tunnel
pub trait MessageSink: Sink<Bytes, Error = io::Error> + Send + Unpin {}

impl<T> MessageSink for T where T: Sink<Bytes, Error = io::Error> + Send + Unpin {}

/// Incoming half of a frame tunnel
pub trait MessageStream: Stream<Item = io::Result<BytesMut>> + Send + Unpin {}

impl<T> MessageStream for T where T: Stream<Item = io::Result<BytesMut>> + Send + Unpin {}

struct ReadState<R> {
    stream: R,
    /// Undelivered tail of the last frame, still ciphertext
    pending: BytesMut,
}

/// Socket over a frame tunnel
pub struct FramedSocket<R, W> {
    reader: Mutex<ReadState<R>>,
    writer: Mutex<W>,
    encryption: Arc<dyn Encryption>,
    read_timer: DeadlineTimer,
    write_timer: DeadlineTimer,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl<T> FramedSocket<SplitStream<T>, SplitSink<T, Bytes>>
where
    T: Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<BytesMut>> + Send,
{
    /// Wrap a duplex frame tunnel such as
    /// `Framed<TcpStream, LengthDelimitedCodec>`
    pub fn new(transport: T, encryption: Arc<dyn Encryption>) -> Self {
        let (sink, stream) = transport.split();
        Self::from_parts(stream, sink, encryption)
    }

    /// Wrap a duplex frame tunnel without encryption
    pub fn plain(transport: T) -> Self {
        Self::new(transport, Arc::new(PlainEncryption))
    }
}

impl<R, W> FramedSocket<R, W>
where
    R: MessageStream,
    W: MessageSink,
{
    /// Wrap separately owned tunnel halves
    pub fn from_parts(stream: R, sink: W, encryption: Arc<dyn Encryption>) -> Self {
        Self {
            reader: Mutex::new(ReadState {
                stream,
                pending: BytesMut::new(),
            }),
            writer: Mutex::new(sink),
            encryption,
            read_timer: DeadlineTimer::new(),
            write_timer: DeadlineTimer::new(),
            local_addr: None,
            peer_addr: None,
        }
    }
}

impl<R, W> FramedSocket<R, W> {
    /// Record the endpoint addresses of the connection carrying the tunnel
    pub fn with_addrs(mut self, local: SocketAddr, peer: SocketAddr) -> Self {
        self.local_addr = Some(local);
        self.peer_addr = Some(peer);
        self
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
impl<R, W> Conn for FramedSocket<R, W>
where
    R: MessageStream,
    W: MessageSink,
{
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.read_timer
            .run(async {
                let mut state = self.reader.lock().await;
                while state.pending.is_empty() {
                    let frame = state.stream.next().await;
                    match frame {
                        // Empty frames carry nothing; keep waiting
                        Some(frame) => state.pending = frame?,
                        None => return Ok(0),
                    }
                }

                let n = buf.len().min(state.pending.len());
                let chunk = state.pending.split_to(n);
                buf[..n].copy_from_slice(&chunk);
                self.encryption.decrypt(&mut buf[..n]);
                Ok(n)
            })
            .await
    }

    /// An empty buffer sends no frame, since the reading side would skip it.
    async fn write(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_timer
            .run(async {
                let mut sink = self.writer.lock().await;
                self.encryption.encrypt(buf);
                sink.send(Bytes::copy_from_slice(buf)).await
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

        let mut sink = self.writer.lock().await;
        sink.close().await
    }
}

impl<R, W> Deadline for FramedSocket<R, W> {
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

impl<R, W> fmt::Debug for FramedSocket<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedSocket")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("read_deadline", &self.read_timer.get())
            .field("write_deadline", &self.write_timer.get())
            .field("closed", &self.write_timer.is_closed())
            .finish_non_exhaustive()
    }
}
