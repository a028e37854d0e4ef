//! Stack machine that executes pickle opcodes.

use std::collections::HashMap;

use unrpa_common::BinaryReader;

use crate::opcode as op;
use crate::{Error, Result, Value};

/// Decode a complete pickle stream into a [`Value`].
pub fn loads(data: &[u8]) -> Result<Value> {
    Unpickler::new(data).load()
}

/// Pickle virtual machine over an in-memory buffer.
///
/// Marks are kept on a separate stack of positions into the value stack,
/// so `Value` never has to represent them.
#[derive(Debug)]
pub struct Unpickler<'a> {
    reader: BinaryReader<'a>,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u64, Value>,
}

impl<'a> Unpickler<'a> {
    /// Create an unpickler over a byte buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BinaryReader::new(data),
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    /// Run opcodes until STOP and return the top of the stack.
    pub fn load(mut self) -> Result<Value> {
        loop {
            let position = self.reader.position();
            let opcode = match self.reader.read_u8() {
                Ok(opcode) => opcode,
                Err(_) => return Err(Error::MissingStop),
            };

            if opcode == op::STOP {
                return self.pop();
            }

            self.dispatch(opcode, position)?;
        }
    }

    fn dispatch(&mut self, opcode: u8, position: usize) -> Result<()> {
        match opcode {
            op::PROTO => {
                let protocol = self.reader.read_u8()?;
                if protocol > op::HIGHEST_PROTOCOL {
                    return Err(Error::UnsupportedProtocol(protocol));
                }
            }
            // Frame sizes are advisory, the opcodes follow inline.
            op::FRAME => {
                self.reader.read_u64()?;
            }

            op::MARK => self.marks.push(self.stack.len()),
            op::POP => {
                if self.marks.last() == Some(&self.stack.len()) {
                    self.pop_mark()?;
                } else {
                    self.pop()?;
                }
            }
            op::POP_MARK => {
                self.pop_mark()?;
            }
            op::DUP => {
                let top = self.top()?.clone();
                self.stack.push(top);
            }

            op::NONE => self.stack.push(Value::None),
            op::NEWTRUE => self.stack.push(Value::Bool(true)),
            op::NEWFALSE => self.stack.push(Value::Bool(false)),
            op::INT => {
                let line = self.reader.read_line_str()?;
                let value = match line.trim() {
                    "00" => Value::Bool(false),
                    "01" => Value::Bool(true),
                    text => Value::Int(parse_decimal(text)?),
                };
                self.stack.push(value);
            }
            op::LONG => {
                let line = self.reader.read_line_str()?;
                let text = line.trim().trim_end_matches('L');
                self.stack.push(Value::Int(parse_decimal(text)?));
            }
            op::BININT => {
                let value = self.reader.read_i32()?;
                self.stack.push(Value::Int(value.into()));
            }
            op::BININT1 => {
                let value = self.reader.read_u8()?;
                self.stack.push(Value::Int(value.into()));
            }
            op::BININT2 => {
                let value = self.reader.read_u16()?;
                self.stack.push(Value::Int(value.into()));
            }
            op::LONG1 => {
                let len = self.reader.read_u8()? as usize;
                let bytes = self.reader.read_bytes(len)?;
                self.stack.push(Value::Int(decode_long(bytes)?));
            }
            op::LONG4 => {
                let len = self.read_signed_len()?;
                let bytes = self.reader.read_bytes(len)?;
                self.stack.push(Value::Int(decode_long(bytes)?));
            }
            op::BINFLOAT => {
                let value = self.reader.read_f64_be()?;
                self.stack.push(Value::Float(value));
            }

            op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                let len = self.reader.read_u8()? as usize;
                let bytes = self.reader.read_bytes(len)?;
                self.stack.push(Value::Bytes(bytes.to_vec()));
            }
            op::BINSTRING => {
                let len = self.read_signed_len()?;
                let bytes = self.reader.read_bytes(len)?;
                self.stack.push(Value::Bytes(bytes.to_vec()));
            }
            op::BINBYTES => {
                let len = self.reader.read_u32()? as usize;
                let bytes = self.reader.read_bytes(len)?;
                self.stack.push(Value::Bytes(bytes.to_vec()));
            }
            op::BINBYTES8 => {
                let len = self.reader.read_u64()?;
                let bytes = self.reader.read_bytes_u64(len)?;
                self.stack.push(Value::Bytes(bytes.to_vec()));
            }
            op::SHORT_BINUNICODE => {
                let len = self.reader.read_u8()? as usize;
                let text = decode_utf8(self.reader.read_bytes(len)?)?;
                self.stack.push(Value::Str(text));
            }
            op::BINUNICODE => {
                let len = self.reader.read_u32()? as usize;
                let text = decode_utf8(self.reader.read_bytes(len)?)?;
                self.stack.push(Value::Str(text));
            }
            op::BINUNICODE8 => {
                let len = self.reader.read_u64()?;
                let text = decode_utf8(self.reader.read_bytes_u64(len)?)?;
                self.stack.push(Value::Str(text));
            }
            op::UNICODE => {
                let line = self.reader.read_line()?;
                self.stack.push(Value::Str(decode_raw_unicode_escape(line)?));
            }

            op::EMPTY_DICT => self.stack.push(Value::Dict(Vec::new())),
            op::EMPTY_LIST => self.stack.push(Value::List(Vec::new())),
            op::EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new())),
            op::TUPLE => {
                let items = self.pop_mark()?;
                self.stack.push(Value::Tuple(items));
            }
            op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                let count = usize::from(opcode - op::TUPLE1 + 1);
                let items = self.pop_n(count)?;
                self.stack.push(Value::Tuple(items));
            }
            op::LIST => {
                let items = self.pop_mark()?;
                self.stack.push(Value::List(items));
            }
            op::DICT => {
                let items = self.pop_mark()?;
                self.stack.push(Value::Dict(pair_up(items)?));
            }
            op::APPEND => {
                let item = self.pop()?;
                self.top_list()?.push(item);
            }
            op::APPENDS => {
                let items = self.pop_mark()?;
                self.top_list()?.extend(items);
            }
            op::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.top_dict()?.push((key, value));
            }
            op::SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = pair_up(items)?;
                self.top_dict()?.extend(pairs);
            }

            op::PUT => {
                let key = parse_memo_key(self.reader.read_line_str()?)?;
                self.memoize(key)?;
            }
            op::BINPUT => {
                let key = self.reader.read_u8()?;
                self.memoize(key.into())?;
            }
            op::LONG_BINPUT => {
                let key = self.reader.read_u32()?;
                self.memoize(key.into())?;
            }
            op::MEMOIZE => {
                let key = self.memo.len() as u64;
                self.memoize(key)?;
            }
            op::GET => {
                let key = parse_memo_key(self.reader.read_line_str()?)?;
                self.recall(key)?;
            }
            op::BINGET => {
                let key = self.reader.read_u8()?;
                self.recall(key.into())?;
            }
            op::LONG_BINGET => {
                let key = self.reader.read_u32()?;
                self.recall(key.into())?;
            }

            op::GLOBAL => {
                let module = self.reader.read_line_str()?.to_string();
                let name = self.reader.read_line_str()?.to_string();
                self.stack.push(Value::Global { module, name });
            }
            op::STACK_GLOBAL => {
                let name = self.pop()?;
                let module = self.pop()?;
                match (module, name) {
                    (Value::Str(module), Value::Str(name)) => {
                        self.stack.push(Value::Global { module, name });
                    }
                    (module, name) => {
                        return Err(Error::Invalid(format!(
                            "STACK_GLOBAL expects two strings, got {} and {}",
                            module.type_name(),
                            name.type_name()
                        )));
                    }
                }
            }
            op::REDUCE => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let value = reduce(callable, args)?;
                self.stack.push(value);
            }

            _ => return Err(Error::UnknownOpcode { opcode, position }),
        }

        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if let Some(&mark) = self.marks.last() {
            if self.stack.len() <= mark {
                return Err(Error::StackUnderflow);
            }
        }
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() < floor + count {
            return Err(Error::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self.marks.pop().ok_or(Error::MissingMark)?;
        if mark > self.stack.len() {
            return Err(Error::StackUnderflow);
        }
        Ok(self.stack.split_off(mark))
    }

    fn top(&self) -> Result<&Value> {
        self.stack.last().ok_or(Error::StackUnderflow)
    }

    fn top_list(&mut self) -> Result<&mut Vec<Value>> {
        match self.stack.last_mut() {
            Some(Value::List(items)) => Ok(items),
            Some(other) => Err(Error::Invalid(format!(
                "cannot append to {}",
                other.type_name()
            ))),
            None => Err(Error::StackUnderflow),
        }
    }

    fn top_dict(&mut self) -> Result<&mut Vec<(Value, Value)>> {
        match self.stack.last_mut() {
            Some(Value::Dict(pairs)) => Ok(pairs),
            Some(other) => Err(Error::Invalid(format!(
                "cannot set item on {}",
                other.type_name()
            ))),
            None => Err(Error::StackUnderflow),
        }
    }

    fn memoize(&mut self, key: u64) -> Result<()> {
        let value = self.top()?.clone();
        self.memo.insert(key, value);
        Ok(())
    }

    fn recall(&mut self, key: u64) -> Result<()> {
        let value = self.memo.get(&key).cloned().ok_or(Error::MemoMissing(key))?;
        self.stack.push(value);
        Ok(())
    }

    fn read_signed_len(&mut self) -> Result<usize> {
        let len = self.reader.read_i32()?;
        usize::try_from(len).map_err(|_| Error::Invalid(format!("negative length {len}")))
    }
}

/// Evaluate the few callables a data-only pickle may reference.
fn reduce(callable: Value, args: Value) -> Result<Value> {
    let (module, name) = match callable {
        Value::Global { module, name } => (module, name),
        other => {
            return Err(Error::Invalid(format!(
                "REDUCE target is {}, not a global",
                other.type_name()
            )));
        }
    };
    let args = match args {
        Value::Tuple(args) => args,
        other => {
            return Err(Error::Invalid(format!(
                "REDUCE arguments are {}, not a tuple",
                other.type_name()
            )));
        }
    };

    match (module.as_str(), name.as_str(), args.as_slice()) {
        // Python 3 writes `bytes` objects as `_codecs.encode(text, "latin1")` under protocol 2.
        ("_codecs", "encode", [Value::Str(text), Value::Str(encoding)])
            if is_latin1(encoding) =>
        {
            encode_latin1(text).map(Value::Bytes)
        }
        ("__builtin__" | "builtins", "bytes", []) => Ok(Value::Bytes(Vec::new())),
        _ => Err(Error::UnsupportedGlobal {
            module: module.clone(),
            name: name.clone(),
        }),
    }
}

fn is_latin1(encoding: &str) -> bool {
    matches!(
        encoding.to_ascii_lowercase().as_str(),
        "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1"
    )
}

fn encode_latin1(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| Error::Invalid(format!("character {c:?} is not latin-1")))
        })
        .collect()
}

fn pair_up(items: Vec<Value>) -> Result<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(Error::Invalid("odd number of items for dict".to_string()));
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn parse_decimal(text: &str) -> Result<i128> {
    text.parse::<i128>()
        .map_err(|_| Error::Invalid(format!("bad integer literal {text:?}")))
}

fn parse_memo_key(text: &str) -> Result<u64> {
    text.trim()
        .parse::<u64>()
        .map_err(|_| Error::Invalid(format!("bad memo key {text:?}")))
}

/// Decode a little-endian two's complement integer.
fn decode_long(bytes: &[u8]) -> Result<i128> {
    if bytes.len() > 16 {
        return Err(Error::IntegerTooLarge(bytes.len()));
    }

    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative { [0xFF; 16] } else { [0; 16] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i128::from_le_bytes(buf))
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Invalid(format!("invalid UTF-8 in string: {e}")))
}

/// Decode Python's `raw-unicode-escape`: latin-1 bytes plus `\uXXXX` and
/// `\UXXXXXXXX` escapes.
fn decode_raw_unicode_escape(bytes: &[u8]) -> Result<String> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(char::from(bytes[i]));
            i += 1;
            continue;
        }

        let run = bytes[i..].iter().take_while(|&&b| b == b'\\').count();
        let width = match bytes.get(i + run) {
            Some(b'u') if run % 2 == 1 => 4,
            Some(b'U') if run % 2 == 1 => 8,
            _ => 0,
        };

        // Only the last backslash of an odd run starts an escape.
        let literal = if width == 0 { run } else { run - 1 };
        out.extend(std::iter::repeat('\\').take(literal));
        i += run;
        if width == 0 {
            continue;
        }

        let digits = bytes
            .get(i + 1..i + 1 + width)
            .ok_or_else(|| Error::Invalid("truncated unicode escape".to_string()))?;
        let code = std::str::from_utf8(digits)
            .ok()
            .and_then(|d| u32::from_str_radix(d, 16).ok())
            .and_then(char::from_u32)
            .ok_or_else(|| Error::Invalid("bad unicode escape".to_string()))?;
        out.push(code);
        i += 1 + width;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_pairs(value: &Value) -> &[(Value, Value)] {
        value.as_dict().expect("expected dict")
    }

    #[test]
    fn test_protocol2_python3_dict() {
        // pickle.dumps({"a": 1}, 2)
        let data = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01K\x01s.";
        let value = loads(data).unwrap();

        assert_eq!(
            dict_pairs(&value),
            &[(Value::Str("a".into()), Value::Int(1))]
        );
    }

    #[test]
    fn test_python2_index_with_binstring_and_memo() {
        // {'x.txt': [(1024, 5, '')]} as written by Python 2, protocol 2.
        let data = b"\x80\x02}q\x01U\x05x.txtq\x02]q\x03M\x00\x04K\x05U\x00q\x04\x87q\x05as.";
        let value = loads(data).unwrap();
        let pairs = dict_pairs(&value);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, Value::Bytes(b"x.txt".to_vec()));
        assert_eq!(
            pairs[0].1,
            Value::List(vec![Value::Tuple(vec![
                Value::Int(1024),
                Value::Int(5),
                Value::Bytes(Vec::new()),
            ])])
        );
    }

    #[test]
    fn test_setitems_with_mark_and_binget() {
        // {'a': b'', 'b': b''} sharing one memoized empty byte string.
        let data = b"\x80\x03}q\x00(X\x01\x00\x00\x00aC\x00q\x01X\x01\x00\x00\x00bh\x01u.";
        let value = loads(data).unwrap();
        let pairs = dict_pairs(&value);

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0, Value::Str("b".into()));
        assert_eq!(pairs[1].1, Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_protocol4_frame_and_memoize() {
        // pickle.dumps({"k": (7, 8)}, 4)
        let mut data = vec![0x80, 0x04, 0x95];
        let body = b"}\x94\x8c\x01k\x94K\x07K\x08\x86\x94s.";
        data.extend_from_slice(&(body.len() as u64).to_le_bytes());
        data.extend_from_slice(body);

        let value = loads(&data).unwrap();
        assert_eq!(
            dict_pairs(&value),
            &[(
                Value::Str("k".into()),
                Value::Tuple(vec![Value::Int(7), Value::Int(8)])
            )]
        );
    }

    #[test]
    fn test_long1_values() {
        // LONG1 with 5 bytes: 0x00_FF_FF_FF_FF
        let data = b"\x80\x02\x8a\x05\xff\xff\xff\xff\x00.";
        assert_eq!(loads(data).unwrap(), Value::Int(0xFFFF_FFFF));

        // LONG1 with 1 byte: -1
        let data = b"\x80\x02\x8a\x01\xff.";
        assert_eq!(loads(data).unwrap(), Value::Int(-1));

        // LONG1 with zero length: 0
        let data = b"\x80\x02\x8a\x00.";
        assert_eq!(loads(data).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_text_protocol_ints() {
        assert_eq!(loads(b"I42\n.").unwrap(), Value::Int(42));
        assert_eq!(loads(b"I01\n.").unwrap(), Value::Bool(true));
        assert_eq!(loads(b"L12345678901234567890L\n.").unwrap(), Value::Int(12345678901234567890));
    }

    #[test]
    fn test_codecs_encode_bytes() {
        // _codecs.encode("\xe9a", "latin1") as Python 3 writes bytes under protocol 2.
        let data = b"\x80\x02c_codecs\nencode\nq\x00X\x03\x00\x00\x00\xc3\xa9aq\x01X\x06\x00\x00\x00latin1q\x02\x86q\x03Rq\x04.";
        assert_eq!(loads(data).unwrap(), Value::Bytes(vec![0xE9, b'a']));
    }

    #[test]
    fn test_empty_builtin_bytes() {
        let data = b"\x80\x02c__builtin__\nbytes\nq\x00)Rq\x01.";
        assert_eq!(loads(data).unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_rejects_arbitrary_global() {
        let data = b"\x80\x02cos\nsystem\nX\x02\x00\x00\x00ls\x85R.";
        assert!(matches!(
            loads(data),
            Err(Error::UnsupportedGlobal { ref module, .. }) if module == "os"
        ));
    }

    #[test]
    fn test_unicode_raw_escape() {
        assert_eq!(
            loads(b"Vcaf\\u00e9\n.").unwrap(),
            Value::Str("caf\u{e9}".into())
        );
    }

    #[test]
    fn test_unicode_escaped_backslash() {
        assert_eq!(
            decode_raw_unicode_escape(br"a\\u0041").unwrap(),
            r"a\\u0041"
        );
        assert_eq!(decode_raw_unicode_escape(br"\\\u0041").unwrap(), r"\\A");
        assert_eq!(
            decode_raw_unicode_escape(br"C:\\path\U0001F600").unwrap(),
            "C:\\\\path\u{1F600}"
        );
        assert!(decode_raw_unicode_escape(br"\u00").is_err());
    }

    #[test]
    fn test_truncated_stream() {
        assert!(matches!(loads(b"\x80\x02}"), Err(Error::MissingStop)));
        assert!(matches!(loads(b"\x80\x02X\x05\x00\x00\x00ab"), Err(Error::Common(_))));
    }

    #[test]
    fn test_unknown_opcode_and_protocol() {
        assert!(matches!(
            loads(b"\x80\x02\xff."),
            Err(Error::UnknownOpcode { opcode: 0xff, position: 2 })
        ));
        assert!(matches!(loads(b"\x80\x09."), Err(Error::UnsupportedProtocol(9))));
    }

    #[test]
    fn test_stack_errors() {
        assert!(matches!(loads(b"."), Err(Error::StackUnderflow)));
        assert!(matches!(loads(b"t."), Err(Error::MissingMark)));
        // Popping across a mark is not allowed.
        assert!(matches!(loads(b"K\x01(s."), Err(Error::StackUnderflow)));
    }
}
