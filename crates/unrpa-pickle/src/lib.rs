//! Pickle decoder for Ren'Py archive indexes.
//!
//! Ren'Py stores the archive index as a pickled Python dictionary. Depending
//! on the Ren'Py build the pickle was written by Python 2 (protocol 2, with
//! `str` keys arriving as byte strings) or Python 3 (protocol 2 through 5).
//! This crate decodes the data-only subset of the protocol those writers
//! emit into a [`Value`] tree:
//!
//! - dictionaries, lists and tuples
//! - integers of any width up to 128 bits, floats, booleans and `None`
//! - byte strings and text strings
//! - `_codecs.encode(text, "latin1")`, the form Python 3 uses for `bytes`
//!   under protocol 2
//!
//! No arbitrary object construction is performed; any other global is
//! rejected.
//!
//! # Example
//!
//! ```
//! use unrpa_pickle::{loads, Value};
//!
//! // {"a": 1} pickled with protocol 2
//! let data = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01K\x01s.";
//! let value = loads(data)?;
//!
//! assert_eq!(value.as_dict().map(|d| d.len()), Some(1));
//! # Ok::<(), unrpa_pickle::Error>(())
//! ```

mod error;
mod opcode;
mod unpickler;
mod value;

pub use error::{Error, Result};
pub use unpickler::{loads, Unpickler};
pub use value::Value;
