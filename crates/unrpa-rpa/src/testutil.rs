//! Fixture builders shared by the crate's tests.

use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Index key as the pickler would write it.
pub enum Key<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

/// Index tuple as the pickler would write it.
pub enum Tuple<'a> {
    Pair(u64, u64),
    Triple(u64, u64, &'a [u8]),
}

/// Pickle an index dict with protocol 2 opcodes.
pub fn pickle_index(entries: &[(Key<'_>, Vec<Tuple<'_>>)]) -> Vec<u8> {
    let mut out = vec![0x80, 0x02, b'}'];

    for (key, tuples) in entries {
        match key {
            Key::Text(text) => {
                out.push(b'X');
                out.extend_from_slice(&(text.len() as u32).to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            Key::Bytes(bytes) => {
                out.push(b'T');
                out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }

        out.push(b']');
        for tuple in tuples {
            match tuple {
                Tuple::Pair(offset, length) => {
                    push_long(&mut out, *offset);
                    push_long(&mut out, *length);
                    out.push(0x86);
                }
                Tuple::Triple(offset, length, prefix) => {
                    push_long(&mut out, *offset);
                    push_long(&mut out, *length);
                    out.push(b'C');
                    out.push(prefix.len() as u8);
                    out.extend_from_slice(prefix);
                    out.push(0x87);
                }
            }
            out.push(b'a');
        }
        out.push(b's');
    }

    out.push(b'.');
    out
}

/// LONG1 encoding of an unsigned value.
fn push_long(out: &mut Vec<u8>, value: u64) {
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 && bytes[bytes.len() - 1] == 0 && bytes[bytes.len() - 2] & 0x80 == 0 {
        bytes.pop();
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        bytes.push(0);
    }

    out.push(0x8a);
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Fixed-width RPA-3.0 header line, as Ren'Py writes it.
pub fn rpa3_header(offset: u64, key: u64) -> Vec<u8> {
    format!("RPA-3.0 {offset:016x} {key:08x}\n").into_bytes()
}

/// Length of an [`rpa3_header`] line.
pub const RPA3_HEADER_LEN: u64 = 34;

/// Write `header`, `payload` and the compressed index back to back.
pub fn write_archive(path: &Path, header: &[u8], payload: &[u8], index_pickle: &[u8]) {
    let mut data = Vec::new();
    data.extend_from_slice(header);
    data.extend_from_slice(payload);
    data.extend_from_slice(&zlib(index_pickle));
    std::fs::write(path, data).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_pickle_decodes() {
        let data = pickle_index(&[(Key::Text("a"), vec![Tuple::Pair(0x80, 0xFFFF_FFFF)])]);
        let value = unrpa_pickle::loads(&data).unwrap();
        let pairs = value.as_dict().unwrap();

        assert_eq!(
            pairs[0].1,
            unrpa_pickle::Value::List(vec![unrpa_pickle::Value::Tuple(vec![
                unrpa_pickle::Value::Int(0x80),
                unrpa_pickle::Value::Int(0xFFFF_FFFF),
            ])])
        );
        assert_eq!(rpa3_header(0, 0).len() as u64, RPA3_HEADER_LEN);
    }
}
