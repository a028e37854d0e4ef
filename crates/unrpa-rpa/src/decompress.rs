//! Decompression of the archive index.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::{Error, Result};

/// Inflate a zlib stream.
///
/// Bytes after the end of the stream are ignored, so the caller may pass
/// everything from the index offset to the end of the archive. The output
/// size is unknown up front, so the buffer grows with what is inflated.
pub fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut output = Vec::new();

    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    Ok(output)
}
