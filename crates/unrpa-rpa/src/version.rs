//! Archive dialect registry.
//!
//! Every Ren'Py archive dialect is identified by the archive's file
//! extension or by the first line of the file, and each encodes the index
//! location (and optionally an obfuscation key) in that line differently.

use std::fmt;

use crate::{Error, Result};

/// Location of the compressed index and the key that obfuscates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetKey {
    /// Absolute byte offset of the zlib-compressed index.
    pub offset: u64,
    /// XOR key applied to every entry offset and length, if any.
    pub key: Option<u64>,
}

impl OffsetKey {
    /// Unobfuscated index at `offset`.
    pub const fn plain(offset: u64) -> Self {
        Self { offset, key: None }
    }

    /// Obfuscated index at `offset`.
    pub const fn keyed(offset: u64, key: u64) -> Self {
        Self {
            offset,
            key: Some(key),
        }
    }

    /// Build a manual override from separately supplied parts.
    ///
    /// Both parts or neither must be given.
    pub fn from_parts(offset: Option<u64>, key: Option<u64>) -> Result<Option<Self>> {
        match (offset, key) {
            (Some(offset), Some(key)) => Ok(Some(Self::keyed(offset, key))),
            (None, None) => Ok(None),
            _ => Err(Error::InvalidInput(
                "the offset and the key must be supplied together".to_string(),
            )),
        }
    }
}

/// A known archive dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// `.rpi` index file, no header.
    Rpa1,
    /// `RPA-2.0 <offset>`
    Rpa2,
    /// `RPA-3.0 <offset> <key>`
    Rpa3,
    /// `ALT-1.0 <key ^ 0xDABE8DF0> <offset>`
    Alt1,
    /// `ZiX-12B`, detectable but not decodable.
    Zix12b,
}

/// All dialects in detection order.
pub static VERSIONS: [Version; 5] = [
    Version::Rpa1,
    Version::Rpa2,
    Version::Rpa3,
    Version::Alt1,
    Version::Zix12b,
];

impl Version {
    /// Constant XORed into the key field of ALT-1.0 headers.
    pub const ALT1_EXTRA_KEY: u64 = 0xDABE_8DF0;

    /// Display name, e.g. `RPA-3.0`.
    pub const fn name(self) -> &'static str {
        match self {
            Version::Rpa1 => "RPA-1.0",
            Version::Rpa2 => "RPA-2.0",
            Version::Rpa3 => "RPA-3.0",
            Version::Alt1 => "ALT-1.0",
            Version::Zix12b => "ZiX-12B",
        }
    }

    /// Magic the first line starts with, for header-based dialects.
    pub const fn header(self) -> Option<&'static [u8]> {
        match self {
            Version::Rpa1 => None,
            Version::Rpa2 => Some(b"RPA-2.0"),
            Version::Rpa3 => Some(b"RPA-3.0"),
            Version::Alt1 => Some(b"ALT-1.0"),
            Version::Zix12b => Some(b"ZiX-12B"),
        }
    }

    /// Whether the index location can be derived from the header.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Version::Zix12b)
    }

    /// Check whether a file with this extension and first line uses this dialect.
    ///
    /// `extension` is compared case-insensitively and may carry a leading dot.
    pub fn matches(self, extension: &str, first_line: &[u8]) -> bool {
        match self.header() {
            Some(header) => first_line.starts_with(header),
            None => extension
                .trim_start_matches('.')
                .eq_ignore_ascii_case("rpi"),
        }
    }

    /// Parse the first line of the archive into the index location.
    pub fn find_offset_and_key(self, first_line: &[u8]) -> Result<OffsetKey> {
        match self {
            Version::Rpa1 => Ok(OffsetKey::plain(0)),
            Version::Rpa2 => {
                let field = first_line.get(8..).ok_or_else(|| self.malformed("line too short"))?;
                Ok(OffsetKey::plain(self.parse_hex(field)?))
            }
            Version::Rpa3 => {
                let fields = split_fields(first_line);
                let offset = self.parse_hex(self.field(&fields, 1)?)?;
                let key = self.parse_hex(self.field(&fields, 2)?)?;
                Ok(OffsetKey::keyed(offset, key))
            }
            Version::Alt1 => {
                let fields = split_fields(first_line);
                let key = self.parse_hex(self.field(&fields, 1)?)? ^ Self::ALT1_EXTRA_KEY;
                let offset = self.parse_hex(self.field(&fields, 2)?)?;
                Ok(OffsetKey::keyed(offset, key))
            }
            Version::Zix12b => Err(Error::UnsupportedFormat {
                version: self.name(),
            }),
        }
    }

    /// Look up a dialect by display name, ignoring case.
    pub fn from_name(name: &str) -> Result<Self> {
        VERSIONS
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownVersion {
                name: name.to_string(),
                known: known_names(),
            })
    }

    fn field<'a>(self, fields: &[&'a [u8]], index: usize) -> Result<&'a [u8]> {
        fields
            .get(index)
            .copied()
            .ok_or_else(|| self.malformed(format!("missing header field {index}")))
    }

    /// Parse a hex field the way Python's `int(field, 16)` does.
    fn parse_hex(self, field: &[u8]) -> Result<u64> {
        let text = std::str::from_utf8(field)
            .map_err(|_| self.malformed("header field is not ASCII"))?
            .trim_matches(is_python_whitespace);
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);

        u64::from_str_radix(digits, 16)
            .map_err(|_| self.malformed(format!("{text:?} is not a hexadecimal number")))
    }

    fn malformed(self, reason: impl Into<String>) -> Error {
        Error::MalformedHeader {
            version: self.name(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Find the first dialect matching a file's extension and first line.
pub fn detect(extension: &str, first_line: &[u8]) -> Option<Version> {
    VERSIONS
        .iter()
        .copied()
        .find(|v| v.matches(extension, first_line))
}

/// Comma-separated list of dialect names.
pub fn known_names() -> String {
    VERSIONS
        .iter()
        .map(|v| v.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_python_whitespace(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b'
}

/// Split on runs of ASCII whitespace, like `bytes.split()`.
fn split_fields(line: &[u8]) -> Vec<&[u8]> {
    line.split(|&b| is_python_whitespace(char::from(b)))
        .filter(|field| !field.is_empty())
        .collect()
}
