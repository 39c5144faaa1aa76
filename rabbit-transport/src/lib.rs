//! Rabbit Transport
//!
//! Async socket layer for the rabbit proxy client: encrypted stream and
//! framed sockets, per-call cancellation, handshake exchange and relaying.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Proxy / dispatch logic                   │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  rabbit-transport                                        │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────┐  │
//! │  │  CryptSocket   │─▶│ CancellableConn│─▶│ Stream /   │  │
//! │  │  (Encryption)  │  │ token→deadline │  │ Framed     │  │
//! │  └────────────────┘  └────────────────┘  └────────────┘  │
//! │  handshake · relay · config                              │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  rabbit-protocol: codec · cipher · buffer pool           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rabbit_transport::{CancellableConn, CancellableSocket, Config, CryptSocket, StreamSocket};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::load("rabbit.toml")?;
//! let pool = config.buffer_pool();
//!
//! let tcp = tokio::net::TcpStream::connect(server).await?;
//! let socket = CryptSocket::new(
//!     CancellableConn::new(StreamSocket::plain(tcp)),
//!     config.encryption()?,
//! );
//!
//! let token = CancellationToken::new();
//! let conn = (&socket).with_cancel(token.clone());
//! rabbit_transport::handshake::send_message(&conn, &pool, &auth).await?;
//! rabbit_transport::handshake::send_message(&conn, &pool, &target).await?;
//! ```

pub mod cancel;
pub mod config;
pub mod deadline;
pub mod error;
pub mod handshake;
pub mod relay;
pub mod socket;

pub use cancel::{CancellableConn, CancellableSocket, CryptSocket, WithCancel};
pub use config::{BufferConfig, Config, CryptConfig, RelayConfig};
pub use deadline::DeadlineTimer;
pub use error::{Error, Result};
pub use relay::{relay, relay_bidirectional};
pub use socket::{read_exact, Conn, Deadline, FramedSocket, StreamSocket};

pub use tokio_util::sync::CancellationToken;
