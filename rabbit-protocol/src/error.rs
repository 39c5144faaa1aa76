//! Error types for the rabbit wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, decoding or setting up encryption
#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("protocol type illegal: {0:#04x}")]
    ProtocolIllegal(u8),

    #[error("address type illegal: {0:#04x}")]
    AddressTypeIllegal(u8),

    #[error("host {host:?} too short: need at least {min} characters")]
    HostTooShort { host: String, min: usize },

    #[error("host illegal: {0}")]
    HostIllegal(String),

    #[error("{field} too long: {len} bytes (max 255)")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("unsupported cipher mode: {0}")]
    UnsupportedCipher(String),

    #[error("invalid IV length: {0} bytes (expected 16)")]
    InvalidIv(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this is a buffer length error
    pub fn is_length_limit(&self) -> bool {
        matches!(self, Error::BufferTooShort { .. } | Error::FieldTooLong { .. })
    }

    /// Check if this error rejects a discriminant byte
    pub fn is_format_illegal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolIllegal(_) | Error::AddressTypeIllegal(_)
        )
    }

    /// Check if this error can only come from encryption setup
    pub fn is_init_fatal(&self) -> bool {
        matches!(self, Error::UnsupportedCipher(_) | Error::InvalidIv(_))
    }
}

/// Fail with [`Error::BufferTooShort`] unless `buf` holds `expected` bytes
#[inline]
pub(crate) fn ensure_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(Error::BufferTooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::BufferTooShort {
            expected: 17,
            actual: 3,
        };
        assert!(err.is_length_limit());
        assert!(!err.is_format_illegal());
        assert_eq!(
            err.to_string(),
            "buffer too short: expected at least 17 bytes, got 3"
        );

        assert!(Error::AddressTypeIllegal(0x04).is_format_illegal());
        assert!(Error::UnsupportedCipher("des".into()).is_init_fatal());
        assert_eq!(
            Error::ProtocolIllegal(0x09).to_string(),
            "protocol type illegal: 0x09"
        );
    }

    #[test]
    fn test_ensure_len() {
        assert!(ensure_len(&[0u8; 4], 4).is_ok());
        assert!(matches!(
            ensure_len(&[0u8; 3], 4),
            Err(Error::BufferTooShort {
                expected: 4,
                actual: 3
            })
        ));
    }
}
