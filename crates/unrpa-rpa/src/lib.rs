//! Reader for Ren'Py archives (`.rpa` / `.rpi`).
//!
//! An RPA archive is a single file holding many packed files and a
//! zlib-compressed, pickled index of their locations. Several dialects
//! exist, told apart by the first line of the file:
//!
//! - RPA-1.0: `.rpi` index file, data in the matching `.rpa` when present
//! - RPA-2.0: `RPA-2.0 <offset>`
//! - RPA-3.0: `RPA-3.0 <offset> <key>`, entries XOR-obfuscated
//! - ALT-1.0: `ALT-1.0 <key> <offset>`, key itself masked
//! - ZiX-12B: detected but not decodable without a manual offset and key
//!
//! # Example
//!
//! ```no_run
//! use unrpa_rpa::RpaArchive;
//!
//! let archive = RpaArchive::open("archive.rpa")?;
//!
//! for path in archive.list_paths() {
//!     println!("{}", path);
//! }
//!
//! if let Some(entry) = archive.get("script.rpyc") {
//!     let data = archive.extract(entry)?;
//! }
//! # Ok::<(), unrpa_rpa::Error>(())
//! ```

mod archive;
mod decompress;
mod error;
mod index;
mod options;
mod version;

#[cfg(test)]
mod testutil;

pub use archive::{
    read_first_line, resolve_version, ExtractProgress, ExtractReport, RpaArchive, MAX_HEADER_LINE,
};
pub use error::{Error, ErrorKind, Result};
pub use index::{ArchiveIndex, EntryRaw, IndexEntry, RawPath, Segment};
pub use options::OpenOptions;
pub use version::{detect, known_names, OffsetKey, Version, VERSIONS};
