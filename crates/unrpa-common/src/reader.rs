//! Forward-only cursor over an in-memory byte stream.
//!
//! Decoded archive indexes are small enough to hold in memory, so the
//! decoders walk a borrowed slice instead of an `io::Read`. Every read
//! returns borrowed data and fails with [`Error::UnexpectedEof`] when the
//! stream is shorter than the requested width.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::{Error, Result};

/// Cursor that splits fields off the front of a byte slice.
///
/// # Example
///
/// ```
/// use unrpa_common::BinaryReader;
///
/// let stream = b"\x01\x02\x03\x0442\n";
/// let mut reader = BinaryReader::new(stream);
///
/// assert_eq!(reader.read_u32().unwrap(), 0x04030201);
/// assert_eq!(reader.read_line().unwrap(), b"42");
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    start: usize,
    rest: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub const fn new(stream: &'a [u8]) -> Self {
        Self {
            start: stream.len(),
            rest: stream,
        }
    }

    /// Bytes consumed so far.
    #[inline]
    pub const fn position(&self) -> usize {
        self.start - self.rest.len()
    }

    #[inline]
    pub const fn remaining(&self) -> usize {
        self.rest.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    /// Split `count` bytes off the front of the stream.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.rest.len() {
            return Err(Error::UnexpectedEof {
                needed: count,
                available: self.rest.len(),
            });
        }
        let (field, rest) = self.rest.split_at(count);
        self.rest = rest;
        Ok(field)
    }

    /// Like [`read_bytes`](Self::read_bytes) for lengths decoded from 64-bit fields.
    pub fn read_bytes_u64(&mut self, count: u64) -> Result<&'a [u8]> {
        match usize::try_from(count) {
            Ok(count) => self.read_bytes(count),
            Err(_) => Err(Error::UnexpectedEof {
                needed: usize::MAX,
                available: self.rest.len(),
            }),
        }
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bytes(2)?.read_u16::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_bytes(4)?.read_u32::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_bytes(4)?.read_i32::<LittleEndian>()?)
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.read_bytes(8)?.read_u64::<LittleEndian>()?)
    }

    /// Big-endian IEEE 754 double, the only big-endian field in a pickle.
    #[inline]
    pub fn read_f64_be(&mut self) -> Result<f64> {
        Ok(self.read_bytes(8)?.read_f64::<BigEndian>()?)
    }

    /// Take everything up to the next `\n`; the terminator is consumed
    /// but not returned. Nothing is consumed when there is no terminator.
    pub fn read_line(&mut self) -> Result<&'a [u8]> {
        let end = memchr::memchr(b'\n', self.rest).ok_or(Error::MissingNewline)?;
        let line = self.read_bytes(end + 1)?;
        Ok(&line[..end])
    }

    pub fn read_line_str(&mut self) -> Result<&'a str> {
        Ok(std::str::from_utf8(self.read_line()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_fields() {
        let stream = [
            0x01u8, 0x02, 0x03, 0x04, // 0x04030201
            0xFF, 0xFF, 0xFF, 0xFF, // -1
            0x34, 0x12, // 0x1234
            0x08, 0, 0, 0, 0, 0, 0, 0x01,
        ];
        let mut reader = BinaryReader::new(&stream);

        assert_eq!(reader.read_u32().unwrap(), 0x04030201);
        assert_eq!(reader.read_i32().unwrap(), -1);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.position(), 10);
        assert_eq!(reader.read_u64().unwrap(), 0x0100_0000_0000_0008);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_binfloat_is_big_endian() {
        let stream = (-2.25f64).to_be_bytes();
        let mut reader = BinaryReader::new(&stream);

        assert_eq!(reader.read_f64_be().unwrap(), -2.25);
    }

    #[test]
    fn test_lines() {
        let mut reader = BinaryReader::new(b"I42\n\nVtail\n");

        assert_eq!(reader.read_line_str().unwrap(), "I42");
        assert_eq!(reader.read_line().unwrap(), b"");
        assert_eq!(reader.read_line().unwrap(), b"Vtail");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_unterminated_line_consumes_nothing() {
        let mut reader = BinaryReader::new(b"\x8aunterminated");
        reader.read_u8().unwrap();

        assert!(matches!(reader.read_line(), Err(Error::MissingNewline)));
        assert_eq!(reader.position(), 1);
    }

    #[test]
    fn test_short_stream() {
        let mut reader = BinaryReader::new(&[0x01, 0x02]);

        assert!(matches!(
            reader.read_u32(),
            Err(Error::UnexpectedEof { needed: 4, available: 2 })
        ));
        assert!(matches!(
            reader.read_bytes_u64(u64::MAX),
            Err(Error::UnexpectedEof { available: 2, .. })
        ));
        assert_eq!(reader.position(), 0);
    }
}
