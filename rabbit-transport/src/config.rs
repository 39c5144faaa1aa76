//! Configuration types for the transport
//!
//! Everything the transport needs from outside: cipher selection and secrets,
//! buffer pool sizing, and relay liveness policy.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use rabbit_protocol::{
    build_encryption, BufferPool, Encryption, EncryptionMode, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_POOLED, IV_LEN,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest pool buffer that still holds any handshake message
pub const MIN_BUFFER_SIZE: usize = 512;

/// Main configuration structure
///
/// # Example Configuration
///
/// ```toml
/// log_level = "info"
///
/// [crypt]
/// mode = "aes256"
/// key = "shared-passphrase"
/// iv = "0123456789abcdef"
///
/// [buffer]
/// size = 8192
///
/// [relay]
/// idle_timeout_secs = 300
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: "off", "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Payload encryption
    #[serde(default)]
    pub crypt: CryptConfig,

    /// Buffer pool sizing
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Relay settings
    #[serde(default)]
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.log_level_filter()?;
        self.crypt.validate()?;

        if self.buffer.size < MIN_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "buffer size {} is too small (minimum {})",
                self.buffer.size, MIN_BUFFER_SIZE
            )));
        }

        if self.relay.idle_timeout_secs == 0 {
            return Err(Error::Config("idle_timeout_secs must be greater than 0".into()));
        }

        Ok(())
    }

    /// Build the cipher selected by `[crypt]`
    pub fn encryption(&self) -> Result<Arc<dyn Encryption>> {
        let mode = self.crypt.mode()?;
        Ok(build_encryption(mode, self.crypt.iv.as_bytes(), &self.crypt.key)?)
    }

    /// Build a buffer pool sized by `[buffer]`
    pub fn buffer_pool(&self) -> BufferPool {
        let pool = BufferPool::with_max_pooled(self.buffer.size, self.buffer.max_pooled);
        if self.buffer.prewarm > 0 {
            pool.prewarm(self.buffer.prewarm);
        }
        pool
    }

    /// Relay idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.idle_timeout_secs)
    }

    /// Parsed log level
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level: {}", self.log_level)))
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Rabbit transport configuration

# Log level: "off", "error", "warn", "info", "debug", "trace"
log_level = "info"

[crypt]
# Cipher: "aes128", "aes192", "aes256", or "plain"
# Use "plain" only when the tunnel below is already encrypted (TLS, WSS)
mode = "aes256"

# Shared passphrase; the AES key is derived from its SHA-256 digest
# Required unless mode = "plain"
key = "your-secret-key-here"

# Initialization vector, exactly 16 bytes, same on both peers
iv = "0123456789abcdef"

[buffer]
# Size of each pooled I/O buffer in bytes (minimum 512)
size = 8192

# Idle buffers kept for reuse
max_pooled = 64

# Buffers allocated up front (default: 0)
# prewarm = 16

[relay]
# Give up on a relay after this many seconds without traffic
idle_timeout_secs = 300
"#
        .to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            crypt: CryptConfig::default(),
            buffer: BufferConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Cipher configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct CryptConfig {
    /// Cipher mode tag
    #[serde(default = "default_crypt_mode")]
    pub mode: String,

    /// Shared passphrase
    #[serde(default)]
    pub key: String,

    /// Initialization vector, 16 bytes
    #[serde(default)]
    pub iv: String,
}

impl CryptConfig {
    /// Parsed cipher mode
    pub fn mode(&self) -> Result<EncryptionMode> {
        Ok(self.mode.parse::<EncryptionMode>()?)
    }

    fn validate(&self) -> Result<()> {
        if self.mode()? == EncryptionMode::Plain {
            return Ok(());
        }

        if self.key.is_empty() {
            return Err(Error::Config("crypt key is required".into()));
        }

        if self.iv.len() != IV_LEN {
            return Err(Error::Config(format!(
                "crypt iv must be {} bytes, got {}",
                IV_LEN,
                self.iv.len()
            )));
        }

        Ok(())
    }
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            mode: default_crypt_mode(),
            key: String::new(),
            iv: String::new(),
        }
    }
}

impl std::fmt::Debug for CryptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptConfig")
            .field("mode", &self.mode)
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Buffer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Size of each pooled buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub size: usize,

    /// Idle buffers retained for reuse
    #[serde(default = "default_max_pooled")]
    pub max_pooled: usize,

    /// Buffers allocated when the pool is built
    #[serde(default)]
    pub prewarm: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: default_buffer_size(),
            max_pooled: default_max_pooled(),
            prewarm: 0,
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Seconds a relay may stay silent before it is torn down
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_crypt_mode() -> String {
    "aes256".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_pooled() -> usize {
    DEFAULT_MAX_POOLED
}

fn default_idle_timeout() -> u64 {
    300
}
