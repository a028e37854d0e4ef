//! Error types for the RPA crate.

use thiserror::Error;

/// Errors that can occur when working with RPA archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No known dialect matched the archive's extension or first line.
    #[error(
        "the archive header is not recognized; if you know the archive version, \
         force it with --force"
    )]
    UnrecognizedHeader,

    /// The dialect is known but has no decoder.
    #[error(
        "the archive uses the {version} format, which is not supported; \
         supply the index location manually with --offset and --key"
    )]
    UnsupportedFormat { version: &'static str },

    /// The first line did not have the fields its dialect requires.
    #[error("malformed {version} header: {reason}")]
    MalformedHeader {
        version: &'static str,
        reason: String,
    },

    /// The index could not be inflated.
    #[error("failed to decompress index: {0}")]
    Decompression(String),

    /// The index could not be unpickled.
    #[error("failed to decode index: {0}")]
    Pickle(#[from] unrpa_pickle::Error),

    /// The index decoded, but not into the expected shape.
    #[error("malformed index: {0}")]
    MalformedIndex(String),

    /// Entry has no byte range.
    #[error("entry {0} has no data segments")]
    EmptyEntry(String),

    /// Entry prefix is longer than the entry itself.
    #[error("entry {path} has a {prefix}-byte prefix but is only {length} bytes long")]
    PrefixTooLong {
        path: String,
        length: u64,
        prefix: usize,
    },

    /// Entry path would escape the extraction directory.
    #[error("refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A single file failed during bulk extraction.
    #[error(
        "failed to extract {path}; use --continue-on-error to extract as much \
         of the archive as possible"
    )]
    Extraction {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Caller supplied contradictory or incomplete options.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Forced version name does not match any known dialect.
    #[error("unknown archive version {name:?}; expected one of: {known}")]
    UnknownVersion { name: String, known: String },
}

/// Broad classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No dialect matched and none was forced.
    FormatUnrecognized,
    /// The dialect has no decoder and no manual override was given.
    FormatUnsupported,
    /// Header, compression or index structure is broken.
    MalformedIndex,
    /// Seeking, reading or writing a single file failed.
    ExtractionIo,
    /// Options were rejected before any archive I/O.
    InvalidInput,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnrecognizedHeader => ErrorKind::FormatUnrecognized,
            Error::UnsupportedFormat { .. } => ErrorKind::FormatUnsupported,
            Error::MalformedHeader { .. }
            | Error::Decompression(_)
            | Error::Pickle(_)
            | Error::MalformedIndex(_) => ErrorKind::MalformedIndex,
            Error::Io(_)
            | Error::EmptyEntry(_)
            | Error::PrefixTooLong { .. }
            | Error::UnsafePath(_)
            | Error::EntryNotFound(_)
            | Error::Extraction { .. } => ErrorKind::ExtractionIo,
            Error::InvalidInput(_) | Error::UnknownVersion { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Result type for RPA operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::UnrecognizedHeader.kind(), ErrorKind::FormatUnrecognized);
        assert_eq!(
            Error::UnsupportedFormat { version: "ZiX-12B" }.kind(),
            ErrorKind::FormatUnsupported
        );
        assert_eq!(
            Error::Decompression("bad".into()).kind(),
            ErrorKind::MalformedIndex
        );
        assert_eq!(
            Error::Extraction {
                path: "a".into(),
                source: Box::new(Error::EmptyEntry("a".into())),
            }
            .kind(),
            ErrorKind::ExtractionIo
        );
        assert_eq!(
            Error::InvalidInput("x".into()).kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_unsupported_message_mentions_override() {
        let message = Error::UnsupportedFormat { version: "ZiX-12B" }.to_string();
        assert!(message.contains("ZiX-12B"));
        assert!(message.contains("--offset"));
    }
}
