//! Typed readers.
//!
//! Every `peek_*` helper decodes at an explicit position and returns the value with the
//! position just past it, without touching any cursor. The public `read_*` methods move
//! the read cursor only after the helper succeeded, which gives the all-or-nothing rule
//! for free.

use std::borrow::Cow;

use crate::Error;
use crate::MAX_DEPTH;
use crate::Result;
use crate::Stream;
use crate::tag;
use crate::value::Map;
use crate::value::Value;

/// Location of a container body.
pub(crate) struct ContainerSpan {
    pub count: usize,
    pub body: usize,
    pub end: usize,
}

impl Stream {
    // ------------------------------------------------------------------
    //  Scalars
    // ------------------------------------------------------------------

    pub(crate) fn peek_nil(&self, pos: usize) -> Result<usize> {
        match self.byte_at(pos)? {
            tag::NIL => Ok(pos + 1),
            b => Err(Error::InvalidTag(b)),
        }
    }

    pub(crate) fn peek_bool(&self, pos: usize) -> Result<(bool, usize)> {
        match self.byte_at(pos)? {
            tag::TRUE => Ok((true, pos + 1)),
            tag::FALSE => Ok((false, pos + 1)),
            b => Err(Error::InvalidTag(b)),
        }
    }

    pub(crate) fn peek_float64(&self, pos: usize) -> Result<(f64, usize)> {
        match self.byte_at(pos)? {
            tag::FLOAT64_ZERO => Ok((0.0, pos + 1)),
            tag::FLOAT64 => Ok((f64::from_le_bytes(self.array_at(pos + 1)?), pos + 9)),
            b => Err(Error::InvalidTag(b)),
        }
    }

    pub(crate) fn peek_int64(&self, pos: usize) -> Result<(i64, usize)> {
        match self.byte_at(pos)? {
            b @ tag::INT64_INLINE_MIN..=tag::INT64_INLINE_MAX => {
                Ok((b as i64 - tag::INT64_INLINE_BIAS, pos + 1))
            }
            tag::INT64_2 => {
                let v = u16::from_le_bytes(self.array_at(pos + 1)?) as i64 - 32_768;
                Ok((v, pos + 3))
            }
            tag::INT64_4 => {
                let v = u32::from_le_bytes(self.array_at(pos + 1)?) as i64 - 2_147_483_648;
                Ok((v, pos + 5))
            }
            tag::INT64_8 => {
                let v = (u64::from_le_bytes(self.array_at(pos + 1)?) ^ (1 << 63)) as i64;
                Ok((v, pos + 9))
            }
            b => Err(Error::InvalidTag(b)),
        }
    }

    pub(crate) fn peek_uint64(&self, pos: usize) -> Result<(u64, usize)> {
        match self.byte_at(pos)? {
            b @ tag::UINT64_INLINE_MIN..=tag::UINT64_INLINE_MAX => {
                Ok(((b - tag::UINT64_INLINE_MIN) as u64, pos + 1))
            }
            tag::UINT64_2 => Ok((u16::from_le_bytes(self.array_at(pos + 1)?) as u64, pos + 3)),
            tag::UINT64_4 => Ok((u32::from_le_bytes(self.array_at(pos + 1)?) as u64, pos + 5)),
            tag::UINT64_8 => Ok((u64::from_le_bytes(self.array_at(pos + 1)?), pos + 9)),
            b => Err(Error::InvalidTag(b)),
        }
    }

    // ------------------------------------------------------------------
    //  Blobs
    // ------------------------------------------------------------------

    /// Validates a string at `pos`. Returns `(data_pos, len, end)`.
    fn string_span(&self, pos: usize) -> Result<(usize, usize, usize)> {
        let (data, len) = match self.byte_at(pos)? {
            tag::STRING_EMPTY => return Ok((pos + 1, 0, pos + 1)),
            b @ 129..=190 => (pos + 1, (b - tag::STRING_EMPTY) as usize),
            tag::STRING_LONG => (pos + 5, self.u32_at(pos + 1)? as usize),
            b => return Err(Error::InvalidTag(b)),
        };
        let zero_pos = data.checked_add(len).ok_or(Error::UnexpectedEnd)?;
        if self.byte_at(zero_pos)? != 0 {
            return Err(Error::MissingTerminator);
        }
        let bytes = self.bytes_at(data, len)?;
        if std::str::from_utf8(&bytes).is_err() {
            return Err(Error::InvalidUtf8);
        }
        Ok((data, len, zero_pos + 1))
    }

    fn text_at(&self, data: usize, len: usize) -> Result<Cow<'_, str>> {
        match self.bytes_at(data, len)? {
            Cow::Borrowed(b) => std::str::from_utf8(b).map(Cow::Borrowed).map_err(|_| Error::InvalidUtf8),
            Cow::Owned(v) => String::from_utf8(v).map(Cow::Owned).map_err(|_| Error::InvalidUtf8),
        }
    }

    pub(crate) fn peek_string(&self, pos: usize) -> Result<(Cow<'_, str>, usize)> {
        let (data, len, end) = self.string_span(pos)?;
        Ok((self.text_at(data, len)?, end))
    }

    /// Returns `(data_pos, len, end)` for a byte blob at `pos`.
    fn bytes_span(&self, pos: usize) -> Result<(usize, usize, usize)> {
        let (data, len) = match self.byte_at(pos)? {
            tag::BYTES_EMPTY | tag::NIL => return Ok((pos + 1, 0, pos + 1)),
            b @ 193..=254 => (pos + 1, (b - tag::BYTES_EMPTY) as usize),
            tag::BYTES_LONG => (pos + 5, self.u32_at(pos + 1)? as usize),
            b => return Err(Error::InvalidTag(b)),
        };
        let end = data.checked_add(len).ok_or(Error::UnexpectedEnd)?;
        if end > self.write_pos {
            return Err(Error::UnexpectedEnd);
        }
        Ok((data, len, end))
    }

    /// A nil in byte position reads as an empty blob.
    pub(crate) fn peek_bytes(&self, pos: usize) -> Result<(Cow<'_, [u8]>, usize)> {
        let (data, len, end) = self.bytes_span(pos)?;
        Ok((self.bytes_at(data, len)?, end))
    }

    // ------------------------------------------------------------------
    //  Containers
    // ------------------------------------------------------------------

    /// Parses a container header. `empty` and `long` select arrays or maps. Nil is
    /// accepted as an empty container.
    pub(crate) fn container_span(&self, pos: usize, empty: u8, long: u8) -> Result<ContainerSpan> {
        let b = self.byte_at(pos)?;
        let (count, body) = if b == empty || b == tag::NIL {
            return Ok(ContainerSpan { count: 0, body: pos + 1, end: pos + 1 });
        } else if b > empty && b < long {
            ((b - empty) as usize, pos + 5)
        } else if b == long {
            let count = self.u32_at(pos + 5)? as usize;
            if count <= tag::INLINE_COUNT_MAX {
                return Err(Error::LengthMismatch);
            }
            (count, pos + 9)
        } else {
            return Err(Error::InvalidTag(b));
        };
        let total = self.u32_at(pos + 1)? as usize;
        let end = pos.checked_add(total).ok_or(Error::LengthMismatch)?;
        // every item takes at least one byte
        if end < body || end - body < count {
            return Err(Error::LengthMismatch);
        }
        if end > self.write_pos {
            return Err(Error::UnexpectedEnd);
        }
        Ok(ContainerSpan { count, body, end })
    }

    pub(crate) fn peek_array(&self, pos: usize, depth: usize) -> Result<(Vec<Value>, usize)> {
        if depth == 0 {
            return Err(Error::ReadOverflow);
        }
        let span = self.container_span(pos, tag::ARRAY_EMPTY, tag::ARRAY_LONG)?;
        let mut items = Vec::with_capacity(span.count);
        let mut cur = span.body;
        for _ in 0..span.count {
            let (item, next) = self.peek_value(cur, depth - 1)?;
            items.push(item);
            cur = next;
        }
        if cur != span.end {
            return Err(Error::LengthMismatch);
        }
        Ok((items, cur))
    }

    pub(crate) fn peek_map(&self, pos: usize, depth: usize) -> Result<(Map, usize)> {
        if depth == 0 {
            return Err(Error::ReadOverflow);
        }
        let span = self.container_span(pos, tag::MAP_EMPTY, tag::MAP_LONG)?;
        let mut map = Map::with_capacity(span.count);
        let mut cur = span.body;
        for _ in 0..span.count {
            let (key, next) = self.peek_string(cur)?;
            let (item, next) = self.peek_value(next, depth - 1)?;
            if map.insert(key.into_owned(), item).is_some() {
                return Err(Error::LengthMismatch);
            }
            cur = next;
        }
        if cur != span.end {
            return Err(Error::LengthMismatch);
        }
        Ok((map, cur))
    }

    /// Decodes whatever value starts at `pos`.
    pub(crate) fn peek_value(&self, pos: usize, depth: usize) -> Result<(Value, usize)> {
        let b = self.byte_at(pos)?;
        match b {
            tag::NIL => Ok((Value::Nil, pos + 1)),
            tag::TRUE | tag::FALSE => self.peek_bool(pos).map(|(v, e)| (Value::Bool(v), e)),
            tag::FLOAT64_ZERO | tag::FLOAT64 => self.peek_float64(pos).map(|(v, e)| (Value::Float64(v), e)),
            tag::INT64_2..=tag::INT64_8 | tag::INT64_INLINE_MIN..=tag::INT64_INLINE_MAX => {
                self.peek_int64(pos).map(|(v, e)| (Value::Int64(v), e))
            }
            tag::UINT64_2..=tag::UINT64_8 | tag::UINT64_INLINE_MIN..=tag::UINT64_INLINE_MAX => {
                self.peek_uint64(pos).map(|(v, e)| (Value::Uint64(v), e))
            }
            tag::ARRAY_EMPTY..=tag::ARRAY_LONG => self.peek_array(pos, depth).map(|(v, e)| (Value::Array(v), e)),
            tag::MAP_EMPTY..=tag::MAP_LONG => self.peek_map(pos, depth).map(|(v, e)| (Value::Map(v), e)),
            tag::STRING_EMPTY..=tag::STRING_LONG => {
                self.peek_string(pos).map(|(v, e)| (Value::String(v.into_owned()), e))
            }
            tag::BYTES_EMPTY..=tag::BYTES_LONG => {
                self.peek_bytes(pos).map(|(v, e)| (Value::Bytes(v.into_owned()), e))
            }
            _ => Err(Error::InvalidTag(b)),
        }
    }

    /// Returns the position just past the value at `pos`, using lengths only.
    ///
    /// Containers are not descended into; their total-length is trusted after a bounds
    /// check. Strings are checked for their terminator.
    pub(crate) fn skip_value(&self, pos: usize) -> Result<usize> {
        let b = self.byte_at(pos)?;
        let end = match b {
            tag::NIL | tag::TRUE | tag::FALSE | tag::FLOAT64_ZERO => pos + 1,
            tag::FLOAT64 | tag::INT64_8 | tag::UINT64_8 => pos + 9,
            tag::INT64_2 | tag::UINT64_2 => pos + 3,
            tag::INT64_4 | tag::UINT64_4 => pos + 5,
            tag::INT64_INLINE_MIN..=tag::UINT64_INLINE_MAX => pos + 1,
            tag::ARRAY_EMPTY..=tag::ARRAY_LONG => self.container_span(pos, tag::ARRAY_EMPTY, tag::ARRAY_LONG)?.end,
            tag::MAP_EMPTY..=tag::MAP_LONG => self.container_span(pos, tag::MAP_EMPTY, tag::MAP_LONG)?.end,
            tag::STRING_EMPTY..=tag::STRING_LONG => self.string_span(pos)?.2,
            tag::BYTES_EMPTY..=tag::BYTES_LONG => self.bytes_span(pos)?.2,
            _ => return Err(Error::InvalidTag(b)),
        };
        if end > self.write_pos {
            return Err(Error::UnexpectedEnd);
        }
        Ok(end)
    }

    // ------------------------------------------------------------------
    //  Public readers
    // ------------------------------------------------------------------

    #[inline]
    fn advance<T>(&mut self, (value, end): (T, usize)) -> T {
        self.read_pos = end;
        value
    }

    /// Returns the tag byte at the read cursor without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.byte_at(self.read_pos)
    }

    pub fn read_nil(&mut self) -> Result<()> {
        self.read_pos = self.peek_nil(self.read_pos)?;
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let r = self.peek_bool(self.read_pos)?;
        Ok(self.advance(r))
    }

    pub fn read_float64(&mut self) -> Result<f64> {
        let r = self.peek_float64(self.read_pos)?;
        Ok(self.advance(r))
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        let r = self.peek_int64(self.read_pos)?;
        Ok(self.advance(r))
    }

    pub fn read_uint64(&mut self) -> Result<u64> {
        let r = self.peek_uint64(self.read_pos)?;
        Ok(self.advance(r))
    }

    /// Decodes an owned string.
    pub fn read_string(&mut self) -> Result<String> {
        let (text, end) = self.peek_string(self.read_pos)?;
        let text = text.into_owned();
        self.read_pos = end;
        Ok(text)
    }

    /// Decodes a string that borrows the frame when it does not span a boundary.
    pub fn read_unsafe_string(&mut self) -> Result<Cow<'_, str>> {
        let (data, len, end) = self.string_span(self.read_pos)?;
        self.read_pos = end;
        self.text_at(data, len)
    }

    /// Decodes an owned byte blob.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let (bytes, end) = self.peek_bytes(self.read_pos)?;
        let bytes = bytes.into_owned();
        self.read_pos = end;
        Ok(bytes)
    }

    /// Decodes a byte blob that borrows the frame when it does not span a boundary.
    pub fn read_unsafe_bytes(&mut self) -> Result<Cow<'_, [u8]>> {
        let (data, len, end) = self.bytes_span(self.read_pos)?;
        self.read_pos = end;
        self.bytes_at(data, len)
    }

    pub fn read_array(&mut self) -> Result<Vec<Value>> {
        let r = self.peek_array(self.read_pos, MAX_DEPTH)?;
        Ok(self.advance(r))
    }

    pub fn read_map(&mut self) -> Result<Map> {
        let r = self.peek_map(self.read_pos, MAX_DEPTH)?;
        Ok(self.advance(r))
    }

    /// Decodes the next value whatever its kind.
    pub fn read_value(&mut self) -> Result<Value> {
        let r = self.peek_value(self.read_pos, MAX_DEPTH)?;
        Ok(self.advance(r))
    }

    /// Skips the next value without decoding it.
    pub fn skip(&mut self) -> Result<()> {
        self.read_pos = self.skip_value(self.read_pos)?;
        Ok(())
    }
}
