//! Fatal error kinds the execution engine can raise.
//!
//! Non-fatal conditions (DIV by zero, unknown opcode) never produce an
//! `Err` — they fold into the normal control flow per the error handling
//! design (saturated write, NOP advance).

use std::fmt;

use library_tape::LibraryError;

/// A fatal error that terminates the current block.
#[derive(Debug)]
pub enum VmError {
    /// Unknown CALL mode, a missing required extra immediate, or an invalid
    /// library magic header.
    Decode(String),
    /// A negative address was supplied to LOAD/STORE/SLOAD/TXR.
    Addressing(String),
    /// A library name/index/ID could not be resolved.
    Resolution(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Addressing(msg) => write!(f, "addressing error: {msg}"),
            Self::Resolution(msg) => write!(f, "resolution error: {msg}"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<LibraryError> for VmError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::InvalidMagic => Self::Decode(err.to_string()),
            LibraryError::IndexNotFound(_) | LibraryError::NameNotFound(_) => {
                Self::Resolution(err.to_string())
            }
        }
    }
}
