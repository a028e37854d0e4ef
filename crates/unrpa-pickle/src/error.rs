//! Error types for pickle decoding.

use thiserror::Error;

/// Errors that can occur while decoding a pickle stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Low-level read error (truncated stream, missing newline).
    #[error("{0}")]
    Common(#[from] unrpa_common::Error),

    /// Opcode byte not part of the supported protocol subset.
    #[error("unknown pickle opcode {opcode:#04x} at offset {position}")]
    UnknownOpcode { opcode: u8, position: usize },

    /// Protocol number newer than any known pickle protocol.
    #[error("unsupported pickle protocol: {0}")]
    UnsupportedProtocol(u8),

    /// An opcode needed more stack items than were present.
    #[error("pickle stack underflow")]
    StackUnderflow,

    /// An opcode needed a mark that was never pushed.
    #[error("pickle mark not found")]
    MissingMark,

    /// Memo lookup for a key that was never stored.
    #[error("pickle memo key {0} not found")]
    MemoMissing(u64),

    /// The stream ended without a STOP opcode.
    #[error("pickle stream ended without STOP")]
    MissingStop,

    /// A global reference other than the whitelisted ones.
    #[error("unsupported pickle global: {module}.{name}")]
    UnsupportedGlobal { module: String, name: String },

    /// Operand of an opcode had the wrong shape.
    #[error("invalid pickle data: {0}")]
    Invalid(String),

    /// Integer too wide to represent.
    #[error("pickle integer of {0} bytes is too large")]
    IntegerTooLarge(usize),
}

/// Result type for pickle operations.
pub type Result<T> = std::result::Result<T, Error>;
