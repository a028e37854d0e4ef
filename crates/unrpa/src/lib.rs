//! unrpa - Ren'Py archive extraction library.
//!
//! This crate provides a unified interface to the unrpa crates.
//!
//! # Crates
//!
//! - [`unrpa_common`] - Common utilities (binary reading)
//! - [`unrpa_pickle`] - Pickle decoding for archive indexes
//! - [`unrpa_rpa`] - RPA dialect detection, index loading and extraction
//!
//! # Example
//!
//! ```no_run
//! use unrpa::prelude::*;
//!
//! let options = OpenOptions::new().version(Some(Version::from_name("rpa-3.0")?));
//! let archive = RpaArchive::open_with("archive.rpa", &options)?;
//!
//! let report = archive.extract_all("out".as_ref(), |p| println!("{}", p.path), true)?;
//! println!("{} files, {} failures", report.extracted, report.failures.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use unrpa_common as common;
pub use unrpa_pickle as pickle;
pub use unrpa_rpa as rpa;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use unrpa_rpa::{
        ArchiveIndex, Error, ErrorKind, ExtractProgress, ExtractReport, IndexEntry, OffsetKey,
        OpenOptions, RpaArchive, Version, VERSIONS,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
