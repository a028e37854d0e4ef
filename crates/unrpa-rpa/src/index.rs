//! Archive index: the table mapping packed file paths to byte ranges.

use std::path::MAIN_SEPARATOR;

use indexmap::IndexMap;
use unrpa_pickle::Value;

use crate::{Error, Result};

/// One byte range of a packed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute offset of the stored bytes in the archive.
    pub offset: u64,
    /// Total length of the file, prefix included.
    pub length: u64,
    /// Leading bytes kept in the index instead of the archive body.
    pub prefix: Vec<u8>,
}

/// An index tuple as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRaw {
    /// `(offset, length)`
    Pair { offset: u64, length: u64 },
    /// `(offset, length, prefix)`
    Triple {
        offset: u64,
        length: u64,
        prefix: Vec<u8>,
    },
}

impl EntryRaw {
    /// Normalize to a [`Segment`], removing the archive's obfuscation.
    ///
    /// Pairs gain an empty prefix. With a key, offset and length are both
    /// XORed with it; the prefix is never touched.
    pub fn into_segment(self, key: Option<u64>) -> Segment {
        let (offset, length, prefix) = match self {
            EntryRaw::Pair { offset, length } => (offset, length, Vec::new()),
            EntryRaw::Triple {
                offset,
                length,
                prefix,
            } => (offset, length, prefix),
        };
        let key = key.unwrap_or(0);

        Segment {
            offset: offset ^ key,
            length: length ^ key,
            prefix,
        }
    }

    /// Number of fields in the wire tuple.
    pub fn width(&self) -> usize {
        match self {
            EntryRaw::Pair { .. } => 2,
            EntryRaw::Triple { .. } => 3,
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let fields = value.as_sequence().ok_or_else(|| {
            Error::MalformedIndex(format!("expected an entry tuple, got {}", value.type_name()))
        })?;

        match fields {
            [offset, length] => Ok(EntryRaw::Pair {
                offset: to_u64(offset)?,
                length: to_u64(length)?,
            }),
            [offset, length, prefix] => Ok(EntryRaw::Triple {
                offset: to_u64(offset)?,
                length: to_u64(length)?,
                prefix: to_prefix(prefix)?,
            }),
            other => Err(Error::MalformedIndex(format!(
                "expected an entry with 2 or 3 fields, got {}",
                other.len()
            ))),
        }
    }
}

/// Path key as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPath {
    /// Python 2 `str`, unpickled as bytes.
    Bytes(Vec<u8>),
    /// Already-decoded text.
    Text(String),
}

impl RawPath {
    /// Decode to text and switch `/` to the platform separator.
    pub fn normalize(self) -> Result<String> {
        let text = match self {
            RawPath::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|e| Error::MalformedIndex(format!("path is not valid UTF-8: {e}")))?,
            RawPath::Text(text) => text,
        };

        Ok(if MAIN_SEPARATOR == '/' {
            text
        } else {
            text.replace('/', &MAIN_SEPARATOR.to_string())
        })
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(bytes) => Ok(RawPath::Bytes(bytes.clone())),
            Value::Str(text) => Ok(RawPath::Text(text.clone())),
            other => Err(Error::MalformedIndex(format!(
                "expected a path, got {}",
                other.type_name()
            ))),
        }
    }
}

/// A packed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    path: String,
    segments: Vec<Segment>,
}

impl IndexEntry {
    /// Create an entry from a normalized path and its segments.
    pub fn new(path: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            path: path.into(),
            segments,
        }
    }

    /// Normalized path relative to the extraction root.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All segments, in index order.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The segment used for extraction.
    #[inline]
    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments.first()
    }
}

/// Decoded archive index.
///
/// Iteration follows the order paths first appeared in the pickle; a path
/// that appears again replaces the earlier entry in place.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: IndexMap<String, IndexEntry>,
}

impl ArchiveIndex {
    /// Build an index from wire-shaped entries, deobfuscating with `key`.
    ///
    /// A keyed entry must have at least one tuple, and all of its tuples
    /// must share the width of the first.
    pub fn from_raw<I>(raw: I, key: Option<u64>) -> Result<Self>
    where
        I: IntoIterator<Item = (RawPath, Vec<EntryRaw>)>,
    {
        let mut entries = IndexMap::new();

        for (raw_path, raw_entries) in raw {
            let path = raw_path.normalize()?;
            if key.is_some() {
                check_keyed_shape(&path, &raw_entries)?;
            }
            let segments = raw_entries
                .into_iter()
                .map(|raw| raw.into_segment(key))
                .collect();
            entries.insert(path.clone(), IndexEntry::new(path, segments));
        }

        Ok(Self { entries })
    }

    /// Build an index from an unpickled value.
    ///
    /// The value must be a dict mapping paths to lists of entry tuples.
    pub fn from_value(value: &Value, key: Option<u64>) -> Result<Self> {
        let pairs = value.as_dict().ok_or_else(|| {
            Error::MalformedIndex(format!("expected a dict, got {}", value.type_name()))
        })?;

        let raw = pairs
            .iter()
            .map(|(path, data)| {
                let path = RawPath::from_value(path)?;
                let tuples = data.as_sequence().ok_or_else(|| {
                    Error::MalformedIndex(format!(
                        "expected a list of entries, got {}",
                        data.type_name()
                    ))
                })?;
                let tuples = tuples
                    .iter()
                    .map(EntryRaw::from_value)
                    .collect::<Result<Vec<_>>>()?;
                Ok((path, tuples))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_raw(raw, key)
    }

    /// Number of distinct paths.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by normalized path.
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    /// Entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.entries.values()
    }

    /// Paths sorted lexicographically.
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

fn check_keyed_shape(path: &str, raw_entries: &[EntryRaw]) -> Result<()> {
    let width = raw_entries
        .first()
        .map(EntryRaw::width)
        .ok_or_else(|| Error::MalformedIndex(format!("{path}: obfuscated entry has no tuples")))?;

    match raw_entries.iter().find(|raw| raw.width() != width) {
        Some(odd) => Err(Error::MalformedIndex(format!(
            "{path}: obfuscated entry mixes {width}-field and {}-field tuples",
            odd.width()
        ))),
        None => Ok(()),
    }
}

fn to_u64(value: &Value) -> Result<u64> {
    let int = value.as_int().ok_or_else(|| {
        Error::MalformedIndex(format!("expected an integer, got {}", value.type_name()))
    })?;
    u64::try_from(int)
        .map_err(|_| Error::MalformedIndex(format!("integer {int} does not fit in 64 bits")))
}

fn to_prefix(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        Value::Str(text) => Ok(text.as_bytes().to_vec()),
        Value::None => Ok(Vec::new()),
        other => Err(Error::MalformedIndex(format!(
            "expected a byte string prefix, got {}",
            other.type_name()
        ))),
    }
}
