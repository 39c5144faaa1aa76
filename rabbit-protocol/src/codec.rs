//! Binary encoding shared by the handshake messages
//!
//! Messages are encoded into caller-supplied buffers, normally a
//! [`PooledBuffer`](crate::PooledBuffer) sized well above any legal message.
//! Every length is checked against the buffer before a byte is copied, so a
//! short buffer or a lying length prefix produces
//! [`Error::BufferTooShort`](crate::Error::BufferTooShort), never a panic.

use crate::Result;

/// Size of the random leading byte of an auth message
pub const RANDOM_BYTE_LEN: usize = 1;
/// Size of a single-byte length prefix
pub const LENGTH_PREFIX_LEN: usize = 1;
/// Size of the function flag byte
pub const FLAG_BYTE_LEN: usize = 1;
/// Size of the protocol type byte
pub const PROTOCOL_TYPE_LEN: usize = 1;
/// Size of the address type byte
pub const ADDRESS_TYPE_LEN: usize = 1;
/// Raw IPv4 address size
pub const IPV4_ADDR_LEN: usize = 4;
/// Raw IPv6 address size
pub const IPV6_ADDR_LEN: usize = 16;
/// Big-endian port size
pub const PORT_LEN: usize = 2;
/// Longest token or domain a single length byte can describe
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// A message with a fixed binary layout
pub trait Serializable: Sized {
    /// Encode into the front of `buf`, returning the number of bytes written
    ///
    /// Nothing is written unless the whole message fits.
    fn marshal(&self, buf: &mut [u8]) -> Result<usize>;

    /// Decode from the front of `buf`, returning the message and the number
    /// of bytes consumed
    fn unmarshal(buf: &[u8]) -> Result<(Self, usize)>;

    /// Exact number of bytes [`marshal`](Self::marshal) will write
    fn encoded_len(&self) -> usize;
}
