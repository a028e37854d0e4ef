//! Options controlling how an archive is opened.

use crate::{OffsetKey, Version};

/// How to resolve the dialect and index location of an archive.
///
/// # Example
///
/// ```
/// use unrpa_rpa::{OffsetKey, OpenOptions, Version};
///
/// let options = OpenOptions::new()
///     .version(Some(Version::Zix12b))
///     .offset_and_key(Some(OffsetKey::keyed(0x1000, 0x42)));
///
/// assert_eq!(options.forced_version(), Some(Version::Zix12b));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    version: Option<Version>,
    offset_and_key: Option<OffsetKey>,
}

impl OpenOptions {
    /// Detect everything from the archive itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a dialect instead of detecting it.
    pub fn version(mut self, version: Option<Version>) -> Self {
        self.version = version;
        self
    }

    /// Use this index location instead of parsing the header.
    pub fn offset_and_key(mut self, offset_and_key: Option<OffsetKey>) -> Self {
        self.offset_and_key = offset_and_key;
        self
    }

    /// The forced dialect, if any.
    pub fn forced_version(&self) -> Option<Version> {
        self.version
    }

    /// The manual index location, if any.
    pub fn manual_offset_and_key(&self) -> Option<OffsetKey> {
        self.offset_and_key
    }
}
