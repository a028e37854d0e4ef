//! Byte-level decoding errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended inside a field.
    #[error("truncated stream: field needs {needed} bytes, {available} left")]
    UnexpectedEof { needed: usize, available: usize },

    /// A text field ran to the end of the stream without its `\n`.
    #[error("text field has no newline terminator")]
    MissingNewline,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A text field that must be UTF-8 is not.
    #[error("invalid UTF-8 in text field: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
