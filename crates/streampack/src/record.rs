//! # Position Records
//!
//! Lazy access to the items of an array or map. Reading records walks the container
//! by length prefixes only; nothing inside the items is decoded until the caller asks
//! for it with [`Stream::value_at`].
//!
//! ## Format
//!
//! `[needs_copy: 1 bit][offset: 63 bits]`
//!
//! `needs_copy` is set when the item crosses a frame boundary, so a borrowed view of
//! it is impossible and a decoder has to copy.

use std::collections::HashMap;

use crate::Error;
use crate::FRAME_SIZE;
use crate::MAX_DEPTH;
use crate::Result;
use crate::Stream;
use crate::tag;
use crate::value::Value;

const NEEDS_COPY: u64 = 1 << 63;

/// A `(offset, needs_copy)` handle to a value inside a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PosRecord(u64);

impl PosRecord {
    pub fn new(pos: usize, needs_copy: bool) -> Self {
        let flag = if needs_copy { NEEDS_COPY } else { 0 };
        Self(pos as u64 | flag)
    }

    fn spanning(start: usize, end: usize) -> Self {
        let crosses = end > start && start / FRAME_SIZE != (end - 1) / FRAME_SIZE;
        Self::new(start, crosses)
    }

    /// Absolute stream position of the value's tag byte.
    pub fn pos(self) -> usize {
        (self.0 & !NEEDS_COPY) as usize
    }

    pub fn needs_copy(self) -> bool {
        self.0 & NEEDS_COPY != 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Stream {
    /// Reads an array as one record per item.
    ///
    /// # Errors
    /// Fails without moving the cursor if the header is malformed or the items do not
    /// fill the container exactly.
    pub fn read_array_records(&mut self) -> Result<Vec<PosRecord>> {
        let span = self.container_span(self.read_pos, tag::ARRAY_EMPTY, tag::ARRAY_LONG)?;
        let mut records = Vec::with_capacity(span.count);
        let mut cur = span.body;
        for _ in 0..span.count {
            let next = self.skip_value(cur)?;
            records.push(PosRecord::spanning(cur, next));
            cur = next;
        }
        if cur != span.end {
            return Err(Error::LengthMismatch);
        }
        self.read_pos = cur;
        Ok(records)
    }

    /// Reads a map as one record per value, keyed by the decoded key.
    pub fn read_map_records(&mut self) -> Result<HashMap<String, PosRecord>> {
        let span = self.container_span(self.read_pos, tag::MAP_EMPTY, tag::MAP_LONG)?;
        let mut records = HashMap::with_capacity(span.count);
        let mut cur = span.body;
        for _ in 0..span.count {
            let (key, next) = self.peek_string(cur)?;
            let key = key.into_owned();
            let end = self.skip_value(next)?;
            if records.insert(key, PosRecord::spanning(next, end)).is_some() {
                return Err(Error::LengthMismatch);
            }
            cur = end;
        }
        if cur != span.end {
            return Err(Error::LengthMismatch);
        }
        self.read_pos = cur;
        Ok(records)
    }

    /// Decodes the value a record points at. The read cursor is not moved.
    pub fn value_at(&self, record: PosRecord) -> Result<Value> {
        if record.pos() < crate::BODY_POS {
            return Err(Error::InvalidPosition(record.pos()));
        }
        self.peek_value(record.pos(), MAX_DEPTH).map(|(v, _)| v)
    }
}
