//! Rabbit Protocol Implementation
//!
//! Wire messages, payload encryption and buffer pooling for the rabbit proxy
//! transport. Everything in this crate is synchronous; the async socket layer
//! lives in `rabbit-transport`.
//!
//! # Handshake
//!
//! A client opens every proxied connection with an [`AuthType`] followed by a
//! [`ConnectType`], both encoded into pooled buffers:
//!
//! ```rust
//! use rabbit_protocol::{AuthType, BufferPool, ConnectType, Serializable};
//!
//! let pool = BufferPool::default();
//! let mut buf = pool.get();
//!
//! let n = AuthType::new("access-token").with_mux().marshal(&mut buf).unwrap();
//! let (auth, _) = AuthType::unmarshal(&buf[..n]).unwrap();
//! assert!(auth.is_mux());
//!
//! let n = ConnectType::tcp("example.com", 443).marshal(&mut buf).unwrap();
//! let (target, _) = ConnectType::unmarshal(&buf[..n]).unwrap();
//! assert_eq!(target.target(), "example.com:443");
//! ```

mod auth;
mod buffer_pool;
pub mod codec;
mod connect;
mod crypto;
mod error;
mod flags;

pub use auth::AuthType;
pub use buffer_pool::{
    BufferPool, PooledBuffer, DATA_LIMIT, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED,
};
pub use codec::Serializable;
pub use connect::{AddressType, ConnectType, ProtocolType};
pub use crypto::{
    build_encryption, AesEncryption, Encryption, EncryptionMode, PlainEncryption, IV_LEN,
};
pub use error::{Error, Result};
pub use flags::{consts as func_consts, FuncFlag};
