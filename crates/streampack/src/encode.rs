//! Typed writers.
//!
//! Composite writers reserve their length prefix, descend, then back-patch. On any
//! error the write cursor is rewound to where the failed value started.

use crate::Error;
use crate::MAX_DEPTH;
use crate::Result;
use crate::Stream;
use crate::tag;
use crate::value::Map;
use crate::value::Value;

fn len_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::TooLarge(n))
}

impl Stream {
    /// Encodes nil.
    pub fn write_nil(&mut self) {
        self.put_byte(tag::NIL);
    }

    /// Encodes a boolean.
    pub fn write_bool(&mut self, v: bool) {
        self.put_byte(if v { tag::TRUE } else { tag::FALSE });
    }

    /// Encodes a 64-bit float. Positive zero takes a single byte.
    pub fn write_float64(&mut self, v: f64) {
        if v.to_bits() == 0 {
            self.put_byte(tag::FLOAT64_ZERO);
        } else {
            let b = v.to_le_bytes();
            self.put_bytes(&[tag::FLOAT64, b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        }
    }

    /// Encodes a signed integer in the smallest of: inline, 2, 4 or 8 bytes.
    pub fn write_int64(&mut self, v: i64) {
        if (-7..=32).contains(&v) {
            self.put_byte((v + tag::INT64_INLINE_BIAS) as u8);
        } else if (-32_768..32_768).contains(&v) {
            let b = ((v + 32_768) as u16).to_le_bytes();
            self.put_bytes(&[tag::INT64_2, b[0], b[1]]);
        } else if (-2_147_483_648..2_147_483_648).contains(&v) {
            let b = ((v + 2_147_483_648) as u32).to_le_bytes();
            self.put_bytes(&[tag::INT64_4, b[0], b[1], b[2], b[3]]);
        } else {
            let b = ((v as u64) ^ (1 << 63)).to_le_bytes();
            self.put_bytes(&[tag::INT64_8, b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        }
    }

    /// Encodes an unsigned integer in the smallest of: inline, 2, 4 or 8 bytes.
    pub fn write_uint64(&mut self, v: u64) {
        if v <= 9 {
            self.put_byte(tag::UINT64_INLINE_MIN + v as u8);
        } else if v <= u16::MAX as u64 {
            let b = (v as u16).to_le_bytes();
            self.put_bytes(&[tag::UINT64_2, b[0], b[1]]);
        } else if v <= u32::MAX as u64 {
            let b = (v as u32).to_le_bytes();
            self.put_bytes(&[tag::UINT64_4, b[0], b[1], b[2], b[3]]);
        } else {
            let b = v.to_le_bytes();
            self.put_bytes(&[tag::UINT64_8, b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        }
    }

    /// Encodes a UTF-8 string followed by a terminating zero.
    pub fn write_string(&mut self, v: &str) -> Result<()> {
        let len = v.len();
        if len == 0 {
            self.put_byte(tag::STRING_EMPTY);
        } else if len <= tag::INLINE_LEN_MAX {
            self.put_byte(tag::STRING_EMPTY + len as u8);
            self.put_bytes(v.as_bytes());
            self.put_byte(0);
        } else {
            let b = len_u32(len)?.to_le_bytes();
            self.put_bytes(&[tag::STRING_LONG, b[0], b[1], b[2], b[3]]);
            self.put_bytes(v.as_bytes());
            self.put_byte(0);
        }
        Ok(())
    }

    /// Encodes a raw byte blob.
    pub fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = v.len();
        if len == 0 {
            self.put_byte(tag::BYTES_EMPTY);
        } else if len <= tag::INLINE_LEN_MAX {
            self.put_byte(tag::BYTES_EMPTY + len as u8);
            self.put_bytes(v);
        } else {
            let b = len_u32(len)?.to_le_bytes();
            self.put_bytes(&[tag::BYTES_LONG, b[0], b[1], b[2], b[3]]);
            self.put_bytes(v);
        }
        Ok(())
    }

    /// Encodes an array.
    ///
    /// # Errors
    /// `Error::WriteOverflow` if nesting exceeds `MAX_DEPTH`; the write cursor is left
    /// at the start of the array.
    pub fn write_array(&mut self, v: &[Value]) -> Result<()> {
        self.write_array_depth(v, MAX_DEPTH)
    }

    /// Encodes a map of string keys.
    ///
    /// # Errors
    /// Same contract as [`Stream::write_array`].
    pub fn write_map(&mut self, v: &Map) -> Result<()> {
        self.write_map_depth(v, MAX_DEPTH)
    }

    /// Encodes any value.
    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        self.write_value_depth(v, MAX_DEPTH)
    }

    fn write_value_depth(&mut self, v: &Value, depth: usize) -> Result<()> {
        match v {
            Value::Nil => self.write_nil(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int64(i) => self.write_int64(*i),
            Value::Uint64(u) => self.write_uint64(*u),
            Value::Float64(f) => self.write_float64(*f),
            Value::String(s) => self.write_string(s)?,
            Value::Bytes(b) => self.write_bytes(b)?,
            Value::Array(a) => self.write_array_depth(a, depth)?,
            Value::Map(m) => self.write_map_depth(m, depth)?,
        }
        Ok(())
    }

    /// Writes the container tag and a zeroed total-length (plus count for long form).
    /// Returns the container start position.
    fn begin_container(&mut self, count: usize, empty: u8, long: u8) -> Result<usize> {
        let start = self.write_pos;
        if count <= tag::INLINE_COUNT_MAX {
            self.put_bytes(&[empty + count as u8, 0, 0, 0, 0]);
        } else {
            let c = len_u32(count)?.to_le_bytes();
            self.put_bytes(&[long, 0, 0, 0, 0, c[0], c[1], c[2], c[3]]);
        }
        Ok(start)
    }

    fn end_container(&mut self, start: usize) -> Result<()> {
        let total = len_u32(self.write_pos - start)?;
        self.patch_bytes(start + 1, &total.to_le_bytes());
        Ok(())
    }

    fn write_array_depth(&mut self, v: &[Value], depth: usize) -> Result<()> {
        if depth == 0 {
            return Err(Error::WriteOverflow);
        }
        if v.is_empty() {
            self.put_byte(tag::ARRAY_EMPTY);
            return Ok(());
        }
        let start = self.begin_container(v.len(), tag::ARRAY_EMPTY, tag::ARRAY_LONG)?;
        let result = v
            .iter()
            .try_for_each(|item| self.write_value_depth(item, depth - 1))
            .and_then(|_| self.end_container(start));
        if result.is_err() {
            self.write_pos = start;
        }
        result
    }

    fn write_map_depth(&mut self, v: &Map, depth: usize) -> Result<()> {
        if depth == 0 {
            return Err(Error::WriteOverflow);
        }
        if v.is_empty() {
            self.put_byte(tag::MAP_EMPTY);
            return Ok(());
        }
        let start = self.begin_container(v.len(), tag::MAP_EMPTY, tag::MAP_LONG)?;
        let result = v
            .iter()
            .try_for_each(|(key, item)| {
                self.write_string(key)?;
                self.write_value_depth(item, depth - 1)
            })
            .and_then(|_| self.end_container(start));
        if result.is_err() {
            self.write_pos = start;
        }
        result
    }
}
