//! Shared building blocks for the unrpa crates.
//!
//! [`BinaryReader`] walks decompressed index streams field by field, and
//! [`Error`] describes what can go wrong while doing so.

mod error;
mod reader;

pub use error::{Error, Result};
pub use reader::BinaryReader;
