//! Function flags carried by the auth handshake

use std::fmt;

/// Function flag constants
pub mod consts {
    /// No optional function requested
    pub const FUNC_NONE: u8 = 0x00;
    /// Multiplexing requested
    pub const FUNC_MUX: u8 = 0x01;
}

/// Capability bitmask sent by the client during the handshake
///
/// Only [`consts::FUNC_MUX`] is defined. Unknown bits survive a decode
/// untouched so newer peers can add functions without breaking older ones.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FuncFlag(pub u8);

impl FuncFlag {
    /// Create flags from a raw byte
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// No functions requested
    pub const fn none() -> Self {
        Self(consts::FUNC_NONE)
    }

    /// Multiplexing requested
    pub const fn mux() -> Self {
        Self(consts::FUNC_MUX)
    }

    /// Check if the MUX bit is set
    pub const fn is_mux(&self) -> bool {
        self.0 & consts::FUNC_MUX != 0
    }

    /// Set the MUX bit
    pub const fn with_mux(self) -> Self {
        Self(self.0 | consts::FUNC_MUX)
    }

    /// Clear the MUX bit
    pub const fn without_mux(self) -> Self {
        Self(self.0 & !consts::FUNC_MUX)
    }

    /// Get raw byte value
    pub const fn as_u8(&self) -> u8 {
        self.0
    }
}

impl From<u8> for FuncFlag {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<FuncFlag> for u8 {
    fn from(flags: FuncFlag) -> Self {
        flags.0
    }
}

impl fmt::Debug for FuncFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = self.0 & !consts::FUNC_MUX;
        match (self.is_mux(), unknown) {
            (false, 0) => write!(f, "NONE"),
            (true, 0) => write!(f, "MUX"),
            (false, bits) => write!(f, "{:#04x}", bits),
            (true, bits) => write!(f, "MUX|{:#04x}", bits),
        }
    }
}

impl fmt::Display for FuncFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
