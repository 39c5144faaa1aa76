//! Stream encryption for transport payloads
//!
//! Uses AES in full-block CFB mode as a keystream generator, so every byte
//! is transformed in place and lengths never change. The key is the SHA-256
//! digest of a shared passphrase, truncated to the configured strength.
//!
//! ## Directions
//!
//! An [`AesEncryption`] keeps two independent keystream cursors: one consumed
//! by [`Encryption::encrypt`] (outgoing bytes) and one by
//! [`Encryption::decrypt`] (incoming bytes). Both peers start from the same
//! key and IV, so one side's encrypt cursor stays aligned with the other
//! side's decrypt cursor for as long as bytes are processed in order.
//!
//! Callers must keep to one encrypting task and one decrypting task per
//! instance. Each direction has its own slot, so the two directions never
//! wait on each other. Two concurrent encrypt calls are memory-safe but
//! interleave keystream bytes, which the peer decodes as garbage.
//!
//! ## Lazy setup
//!
//! Neither the key digest nor the cursors are computed at construction. The
//! digest is derived once, on the first call in either direction, and each
//! cursor is built on the first call in its own direction. A socket that only
//! ever sends never pays for a decrypt key schedule.
//!
//! ```rust
//! use rabbit_protocol::{AesEncryption, Encryption, EncryptionMode};
//!
//! let iv = *b"0123456789abcdef";
//! let client = AesEncryption::new(EncryptionMode::Aes256, &iv, "passphrase").unwrap();
//! let server = AesEncryption::new(EncryptionMode::Aes256, &iv, "passphrase").unwrap();
//!
//! let mut data = *b"hello rabbit";
//! client.encrypt(&mut data);
//! assert_ne!(&data, b"hello rabbit");
//! server.decrypt(&mut data);
//! assert_eq!(&data, b"hello rabbit");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::KeyIvInit;
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor, BufEncryptor};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// AES block size / IV size
pub const IV_LEN: usize = 16;

/// In-place symmetric transform applied to transport payloads
///
/// Both methods must preserve the buffer length.
pub trait Encryption: Send + Sync {
    /// Encrypt outgoing bytes in place
    fn encrypt(&self, buf: &mut [u8]);

    /// Decrypt incoming bytes in place
    fn decrypt(&self, buf: &mut [u8]);
}

impl<E: Encryption + ?Sized> Encryption for Arc<E> {
    #[inline]
    fn encrypt(&self, buf: &mut [u8]) {
        (**self).encrypt(buf)
    }

    #[inline]
    fn decrypt(&self, buf: &mut [u8]) {
        (**self).decrypt(buf)
    }
}

/// Cipher strength selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    /// No encryption; confidentiality comes from a lower layer (e.g. TLS)
    Plain,
    Aes128,
    Aes192,
    Aes256,
}

impl EncryptionMode {
    /// Key length in bytes (0 for plain)
    pub const fn key_len(&self) -> usize {
        match self {
            EncryptionMode::Plain => 0,
            EncryptionMode::Aes128 => 16,
            EncryptionMode::Aes192 => 24,
            EncryptionMode::Aes256 => 32,
        }
    }

    /// Configuration tag
    pub const fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::Plain => "plain",
            EncryptionMode::Aes128 => "aes128",
            EncryptionMode::Aes192 => "aes192",
            EncryptionMode::Aes256 => "aes256",
        }
    }
}

impl FromStr for EncryptionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(EncryptionMode::Plain),
            "aes128" => Ok(EncryptionMode::Aes128),
            "aes192" => Ok(EncryptionMode::Aes192),
            "aes256" => Ok(EncryptionMode::Aes256),
            other => Err(Error::UnsupportedCipher(other.to_string())),
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key size of an actual AES instance; plain mode has none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    fn from_mode(mode: EncryptionMode) -> Result<Self> {
        match mode {
            EncryptionMode::Aes128 => Ok(AesStrength::Aes128),
            EncryptionMode::Aes192 => Ok(AesStrength::Aes192),
            EncryptionMode::Aes256 => Ok(AesStrength::Aes256),
            EncryptionMode::Plain => Err(Error::UnsupportedCipher(
                "plain mode has no AES key".to_string(),
            )),
        }
    }

    const fn key_len(&self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }
}

enum EncryptCursor {
    Aes128(BufEncryptor<Aes128>),
    Aes192(BufEncryptor<Aes192>),
    Aes256(BufEncryptor<Aes256>),
}

impl EncryptCursor {
    /// `key` must be exactly `strength.key_len()` bytes
    fn new(strength: AesStrength, key: &[u8], iv: &[u8; IV_LEN]) -> Self {
        let iv = GenericArray::from_slice(iv);
        // Each arm needs its own key width
        match strength {
            AesStrength::Aes128 => {
                Self::Aes128(BufEncryptor::new(GenericArray::from_slice(key), iv))
            }
            AesStrength::Aes192 => {
                Self::Aes192(BufEncryptor::new(GenericArray::from_slice(key), iv))
            }
            AesStrength::Aes256 => {
                Self::Aes256(BufEncryptor::new(GenericArray::from_slice(key), iv))
            }
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.encrypt(buf),
            Self::Aes192(c) => c.encrypt(buf),
            Self::Aes256(c) => c.encrypt(buf),
        }
    }
}

enum DecryptCursor {
    Aes128(BufDecryptor<Aes128>),
    Aes192(BufDecryptor<Aes192>),
    Aes256(BufDecryptor<Aes256>),
}

impl DecryptCursor {
    /// `key` must be exactly `strength.key_len()` bytes
    fn new(strength: AesStrength, key: &[u8], iv: &[u8; IV_LEN]) -> Self {
        let iv = GenericArray::from_slice(iv);
        // Each arm needs its own key width
        match strength {
            AesStrength::Aes128 => {
                Self::Aes128(BufDecryptor::new(GenericArray::from_slice(key), iv))
            }
            AesStrength::Aes192 => {
                Self::Aes192(BufDecryptor::new(GenericArray::from_slice(key), iv))
            }
            AesStrength::Aes256 => {
                Self::Aes256(BufDecryptor::new(GenericArray::from_slice(key), iv))
            }
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.decrypt(buf),
            Self::Aes192(c) => c.decrypt(buf),
            Self::Aes256(c) => c.decrypt(buf),
        }
    }
}

/// AES-CFB stream encryption keyed from a shared passphrase
pub struct AesEncryption {
    mode: EncryptionMode,
    strength: AesStrength,
    iv: [u8; IV_LEN],
    passphrase: String,
    digest: OnceLock<[u8; 32]>,
    encryptor: Mutex<Option<EncryptCursor>>,
    decryptor: Mutex<Option<DecryptCursor>>,
}

impl AesEncryption {
    /// Create an adapter for `mode`, keyed from `passphrase`
    ///
    /// Fails for [`EncryptionMode::Plain`] and for an IV that is not 16
    /// bytes. Both are configuration mistakes that no retry can fix.
    pub fn new(mode: EncryptionMode, iv: &[u8], passphrase: impl Into<String>) -> Result<Self> {
        let strength = AesStrength::from_mode(mode)?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| Error::InvalidIv(iv.len()))?;

        Ok(Self {
            mode,
            strength,
            iv,
            passphrase: passphrase.into(),
            digest: OnceLock::new(),
            encryptor: Mutex::new(None),
            decryptor: Mutex::new(None),
        })
    }

    /// Configured strength
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Truncated SHA-256 of the passphrase, derived on first use
    fn key(&self) -> &[u8] {
        let digest = self.digest.get_or_init(|| {
            let mut hash = Sha256::new();
            hash.update(self.passphrase.as_bytes());
            hash.finalize().into()
        });
        &digest[..self.strength.key_len()]
    }
}

impl Encryption for AesEncryption {
    fn encrypt(&self, buf: &mut [u8]) {
        let mut slot = self
            .encryptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert_with(|| EncryptCursor::new(self.strength, self.key(), &self.iv))
            .apply(buf);
    }

    fn decrypt(&self, buf: &mut [u8]) {
        let mut slot = self
            .decryptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert_with(|| DecryptCursor::new(self.strength, self.key(), &self.iv))
            .apply(buf);
    }
}

impl fmt::Debug for AesEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesEncryption")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Identity transform for transports that are already secured
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEncryption;

impl Encryption for PlainEncryption {
    #[inline]
    fn encrypt(&self, _buf: &mut [u8]) {}

    #[inline]
    fn decrypt(&self, _buf: &mut [u8]) {}
}

/// Build the adapter selected by configuration
pub fn build_encryption(
    mode: EncryptionMode,
    iv: &[u8],
    passphrase: &str,
) -> Result<Arc<dyn Encryption>> {
    match mode {
        EncryptionMode::Plain => Ok(Arc::new(PlainEncryption)),
        _ => Ok(Arc::new(AesEncryption::new(mode, iv, passphrase)?)),
    }
}
