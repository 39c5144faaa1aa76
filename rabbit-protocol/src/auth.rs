//! Authentication handshake message
//!
//! Wire format:
//! ```text
//! +--------+-----------+-----------------+------+
//! | random | token len |      token      | flag |
//! |   1    |     1     |  0..=255 bytes  |  1   |
//! +--------+-----------+-----------------+------+
//! ```
//!
//! The random byte only keeps the encrypted handshake from starting with a
//! fixed prefix. It is discarded on decode.

use crate::codec::{
    Serializable, FLAG_BYTE_LEN, LENGTH_PREFIX_LEN, MAX_FIELD_LEN, RANDOM_BYTE_LEN,
};
use crate::error::ensure_len;
use crate::{Error, FuncFlag, Result};

/// Header bytes that precede the token
const AUTH_PREFIX_LEN: usize = RANDOM_BYTE_LEN + LENGTH_PREFIX_LEN;

/// Client handshake carrying the access token and requested functions
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthType {
    /// Secret bearer credential
    pub token: String,
    /// Optional functions requested by the client
    pub func_flag: FuncFlag,
}

impl AuthType {
    /// Create a handshake with no optional functions
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            func_flag: FuncFlag::none(),
        }
    }

    /// Request multiplexing
    pub fn with_mux(mut self) -> Self {
        self.func_flag = self.func_flag.with_mux();
        self
    }

    /// Check if the peer requested multiplexing
    pub fn is_mux(&self) -> bool {
        self.func_flag.is_mux()
    }

    /// Bytes still to read once the two-byte prefix has been seen
    ///
    /// Lets a stream reader fetch exactly one message without over-reading
    /// into the payload that follows.
    pub fn remaining_len(prefix: &[u8]) -> Result<usize> {
        ensure_len(prefix, AUTH_PREFIX_LEN)?;
        Ok(prefix[RANDOM_BYTE_LEN] as usize + FLAG_BYTE_LEN)
    }

    /// Length of the fixed prefix a reader must fetch first
    pub const fn prefix_len() -> usize {
        AUTH_PREFIX_LEN
    }
}

impl Serializable for AuthType {
    fn marshal(&self, buf: &mut [u8]) -> Result<usize> {
        let token = self.token.as_bytes();
        if token.len() > MAX_FIELD_LEN {
            return Err(Error::FieldTooLong {
                field: "token",
                len: token.len(),
            });
        }
        let needed = self.encoded_len();
        ensure_len(buf, needed)?;

        buf[0] = rand::random::<u8>();
        buf[RANDOM_BYTE_LEN] = token.len() as u8;
        buf[AUTH_PREFIX_LEN..AUTH_PREFIX_LEN + token.len()].copy_from_slice(token);
        buf[AUTH_PREFIX_LEN + token.len()] = self.func_flag.as_u8();
        Ok(needed)
    }

    fn unmarshal(buf: &[u8]) -> Result<(Self, usize)> {
        // Too short for the length prefix
        ensure_len(buf, AUTH_PREFIX_LEN)?;

        // Too short for the declared token and flag
        let token_len = buf[RANDOM_BYTE_LEN] as usize;
        let total = AUTH_PREFIX_LEN + token_len + FLAG_BYTE_LEN;
        ensure_len(buf, total)?;

        let token = std::str::from_utf8(&buf[AUTH_PREFIX_LEN..AUTH_PREFIX_LEN + token_len])
            .map_err(|_| Error::InvalidUtf8("token"))?
            .to_owned();
        let func_flag = FuncFlag::new(buf[AUTH_PREFIX_LEN + token_len]);

        Ok((Self { token, func_flag }, total))
    }

    fn encoded_len(&self) -> usize {
        AUTH_PREFIX_LEN + self.token.len() + FLAG_BYTE_LEN
    }
}

impl std::fmt::Debug for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token itself
        f.debug_struct("AuthType")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("func_flag", &self.func_flag)
            .finish()
    }
}
