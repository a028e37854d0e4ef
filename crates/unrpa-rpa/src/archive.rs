//! RPA archive reader.
//!
//! Opening an archive resolves its dialect, loads the index and keeps it
//! in memory. Every extraction then opens the archive file again, seeks to
//! the entry and reads exactly its bytes.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, trace};

use crate::decompress;
use crate::{ArchiveIndex, Error, IndexEntry, OffsetKey, OpenOptions, Result, Version};

/// Longest first line read when detecting the dialect.
///
/// `.rpi` files have no text header, so this keeps detection from reading
/// the whole index looking for a newline.
pub const MAX_HEADER_LINE: u64 = 4096;

/// Progress of [`RpaArchive::extract_all`], reported before each file.
#[derive(Debug, Clone, Copy)]
pub struct ExtractProgress<'a> {
    /// Zero-based position in index order.
    pub index: usize,
    /// Number of entries in the archive.
    pub total: usize,
    /// Path of the entry about to be extracted.
    pub path: &'a str,
}

/// Outcome of [`RpaArchive::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Files written successfully.
    pub extracted: usize,
    /// Files skipped because of an error, with that error.
    pub failures: Vec<(String, Error)>,
}

impl ExtractReport {
    /// Whether every file was extracted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An opened RPA archive with its index loaded.
pub struct RpaArchive {
    /// File the index was read from
    path: PathBuf,
    /// File the payload bytes are read from
    data_path: PathBuf,
    name: String,
    version: Version,
    offset_and_key: OffsetKey,
    index: ArchiveIndex,
}

impl RpaArchive {
    /// Open an archive, detecting its dialect from the file itself.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &OpenOptions::new())
    }

    /// Open an archive with a forced dialect and/or manual index location.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let version = resolve_version(path, options)?;

        let offset_and_key = match options.manual_offset_and_key() {
            Some(manual) => {
                debug!(offset = manual.offset, key = ?manual.key, "using manual index location");
                manual
            }
            None => version.find_offset_and_key(&read_first_line(path)?)?,
        };

        let index = load_index(path, offset_and_key)?;
        debug!(entries = index.len(), "index loaded");

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            data_path: data_path(path, version),
            name,
            version,
            offset_and_key,
            index,
        })
    }

    /// Path the archive was opened from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive file name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dialect the archive was read as.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Index location and key the archive was read with.
    #[inline]
    pub fn offset_and_key(&self) -> OffsetKey {
        self.offset_and_key
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the archive has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The loaded index.
    #[inline]
    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.index.iter()
    }

    /// Look up an entry by normalized path.
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.index.get(path)
    }

    /// All entry paths, sorted lexicographically.
    pub fn list_paths(&self) -> Vec<&str> {
        self.index.sorted_paths()
    }

    /// Read the contents of an entry.
    ///
    /// Uses the entry's first segment: the prefix followed by
    /// `length - prefix.len()` bytes read from the segment offset. A
    /// truncated archive is reported as an I/O error.
    pub fn extract(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let segment = entry
            .first_segment()
            .ok_or_else(|| Error::EmptyEntry(entry.path().to_string()))?;

        let stored = segment
            .length
            .checked_sub(segment.prefix.len() as u64)
            .ok_or_else(|| Error::PrefixTooLong {
                path: entry.path().to_string(),
                length: segment.length,
                prefix: segment.prefix.len(),
            })?;

        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(segment.offset))?;

        let mut data = segment.prefix.clone();
        let read = file.take(stored).read_to_end(&mut data)? as u64;
        if read != stored {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{}: expected {} bytes at offset {}, archive ended after {}",
                    entry.path(),
                    stored,
                    segment.offset,
                    read
                ),
            )));
        }

        Ok(data)
    }

    /// Look up an entry by path and read it.
    pub fn extract_path(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self
            .get(path)
            .ok_or_else(|| Error::EntryNotFound(path.to_string()))?;
        self.extract(entry)
    }

    /// Extract every entry below `destination`, in index order.
    ///
    /// With `continue_on_error` a failing file is logged, recorded in the
    /// report and skipped. Otherwise the first failure stops extraction;
    /// files already written are left in place.
    pub fn extract_all<F>(
        &self,
        destination: &Path,
        mut on_progress: F,
        continue_on_error: bool,
    ) -> Result<ExtractReport>
    where
        F: FnMut(&ExtractProgress<'_>),
    {
        let total = self.index.len();
        let mut report = ExtractReport::default();

        for (index, entry) in self.index.iter().enumerate() {
            on_progress(&ExtractProgress {
                index,
                total,
                path: entry.path(),
            });

            match self.extract_to(destination, entry) {
                Ok(()) => report.extracted += 1,
                Err(e) if continue_on_error => {
                    error!(path = entry.path(), "extraction failed, continuing: {}", e);
                    report.failures.push((entry.path().to_string(), e));
                }
                Err(e) => {
                    return Err(Error::Extraction {
                        path: entry.path().to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(report)
    }

    fn extract_to(&self, destination: &Path, entry: &IndexEntry) -> Result<()> {
        let output = destination.join(safe_relative_path(entry.path())?);

        if let Some(parent) = output.parent() {
            trace!("creating directory structure: {}", parent.display());
            fs::create_dir_all(parent)?;
        }

        let data = self.extract(entry)?;
        fs::write(&output, data)?;
        Ok(())
    }
}

impl std::fmt::Debug for RpaArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpaArchive")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("entries", &self.index.len())
            .finish()
    }
}

/// Decide which dialect to read `path` as.
///
/// A forced version skips detection. An unsupported dialect is rejected
/// here, before any index I/O, unless a manual index location was given.
pub fn resolve_version(path: &Path, options: &OpenOptions) -> Result<Version> {
    let version = match options.forced_version() {
        Some(version) => version,
        None => {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            let first_line = read_first_line(path)?;
            crate::detect(&extension, &first_line).ok_or(Error::UnrecognizedHeader)?
        }
    };
    debug!(%version, forced = options.forced_version().is_some(), "archive version resolved");

    if !version.is_supported() && options.manual_offset_and_key().is_none() {
        return Err(Error::UnsupportedFormat {
            version: version.name(),
        });
    }

    Ok(version)
}

/// Read the first line of a file, newline included, up to [`MAX_HEADER_LINE`] bytes.
pub fn read_first_line(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file).take(MAX_HEADER_LINE);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    Ok(line)
}

fn load_index(path: &Path, location: OffsetKey) -> Result<ArchiveIndex> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(location.offset))?;

    let mut compressed = Vec::new();
    file.read_to_end(&mut compressed)?;
    debug!(
        offset = location.offset,
        bytes = compressed.len(),
        obfuscated = location.key.is_some(),
        "reading index"
    );

    let pickled = decompress::decompress_zlib(&compressed)?;
    let value = unrpa_pickle::loads(&pickled)?;
    ArchiveIndex::from_value(&value, location.key)
}

/// RPA-1.0 keeps the index in `name.rpi` and the data in `name.rpa`; the
/// `.rpi` itself is read when the sibling is missing.
fn data_path(path: &Path, version: Version) -> PathBuf {
    if version == Version::Rpa1 {
        let sibling = path.with_extension("rpa");
        if sibling.is_file() {
            return sibling;
        }
    }
    path.to_path_buf()
}

/// Reject paths that would land outside the extraction root.
fn safe_relative_path(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    let is_safe = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if is_safe {
        Ok(candidate)
    } else {
        Err(Error::UnsafePath(path.to_string()))
    }
}
