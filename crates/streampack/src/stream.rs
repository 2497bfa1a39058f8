//! # Stream
//!
//! A mutable byte sequence over an ordered list of pooled frames.
//!
//! ## Layout
//!
//! ```text
//! 0        8          16         24              44
//! [callback][session ][machine  ][   padding    ][ body ... ]
//! ```
//!
//! The read and write cursors are absolute positions; `pos / FRAME_SIZE` is the segment,
//! `pos % FRAME_SIZE` the offset inside it.
//!
//! ## Invariants
//! - `BODY_POS <= read_pos <= write_pos` after any public operation that moves a cursor.
//! - `frames` is never empty. Extra frames are only returned to the pool by `reset`.

use std::borrow::Cow;
use std::sync::LazyLock;

use crate::Error;
use crate::Result;
use crate::frame;
use crate::frame::FRAME_SIZE;
use crate::frame::Frame;
use crate::pool::Pool;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 44;

/// First body byte. Request and response bodies both start here.
pub const BODY_POS: usize = HEADER_SIZE;

const CALLBACK_ID_POS: usize = 0;
const SESSION_ID_POS: usize = 8;
const MACHINE_ID_POS: usize = 16;

static STREAM_POOL: LazyLock<Pool<Stream>> = LazyLock::new(|| Pool::new(Stream::alloc, Stream::identity));

/// A segmented byte buffer with a fixed header and typed codec.
///
/// Obtain one with [`Stream::new`] and hand it back with [`Stream::release`].
pub struct Stream {
    pub(crate) frames: Vec<Frame>,
    pub(crate) read_pos: usize,
    pub(crate) write_pos: usize,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("segments", &self.frames.len())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

#[inline]
pub(crate) fn locate(pos: usize) -> (usize, usize) {
    (pos / FRAME_SIZE, pos % FRAME_SIZE)
}

impl Stream {
    /// Takes a clean stream from the process-wide pool.
    pub fn new() -> Self {
        STREAM_POOL.get()
    }

    /// Rebuilds a stream from a complete transport buffer (header + body).
    ///
    /// The read cursor is placed at `BODY_POS`.
    ///
    /// # Errors
    /// Returns `Error::UnexpectedEnd` if `bytes` is shorter than the header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::UnexpectedEnd);
        }
        let mut stream = Self::new();
        stream.write_pos = 0;
        stream.put_bytes(bytes);
        stream.read_pos = BODY_POS;
        Ok(stream)
    }

    fn alloc() -> Self {
        Self {
            frames: vec![Box::new([0u8; FRAME_SIZE])],
            read_pos: BODY_POS,
            write_pos: BODY_POS,
        }
    }

    fn identity(stream: &Stream) -> usize {
        stream.frames[0].as_ptr() as usize
    }

    /// Zeroes the header, returns extra frames to the frame pool, and moves both
    /// cursors to `BODY_POS`.
    pub fn reset(&mut self) {
        self.frames[0][..HEADER_SIZE].fill(0);
        for extra in self.frames.drain(1..) {
            frame::put(extra);
        }
        self.read_pos = BODY_POS;
        self.write_pos = BODY_POS;
    }

    /// Resets the stream and returns it to the pool.
    pub fn release(mut self) {
        self.reset();
        STREAM_POOL.put(self);
    }

    /// Number of frames currently backing the stream.
    pub fn segments(&self) -> usize {
        self.frames.len()
    }

    // ------------------------------------------------------------------
    //  Header
    // ------------------------------------------------------------------

    fn header_u64(&self, pos: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.frames[0][pos..pos + 8]);
        u64::from_le_bytes(b)
    }

    fn set_header_u64(&mut self, pos: usize, v: u64) {
        self.frames[0][pos..pos + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn callback_id(&self) -> u64 {
        self.header_u64(CALLBACK_ID_POS)
    }

    pub fn set_callback_id(&mut self, v: u64) {
        self.set_header_u64(CALLBACK_ID_POS, v)
    }

    /// Session identifier. Transports may also treat it as a sequence number.
    pub fn session_id(&self) -> u64 {
        self.header_u64(SESSION_ID_POS)
    }

    pub fn set_session_id(&mut self, v: u64) {
        self.set_header_u64(SESSION_ID_POS, v)
    }

    pub fn machine_id(&self) -> u64 {
        self.header_u64(MACHINE_ID_POS)
    }

    pub fn set_machine_id(&mut self, v: u64) {
        self.set_header_u64(MACHINE_ID_POS, v)
    }

    /// Returns the raw 44-byte header.
    pub fn header(&self) -> &[u8] {
        &self.frames[0][..HEADER_SIZE]
    }

    /// Copies the header of `src` over this stream's header.
    pub fn copy_header_from(&mut self, src: &Stream) {
        self.frames[0][..HEADER_SIZE].copy_from_slice(&src.frames[0][..HEADER_SIZE]);
    }

    // ------------------------------------------------------------------
    //  Cursors
    // ------------------------------------------------------------------

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Moves the read cursor.
    ///
    /// # Errors
    /// `Error::InvalidPosition` if `pos` is beyond the write cursor.
    pub fn set_read_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.write_pos {
            return Err(Error::InvalidPosition(pos));
        }
        self.read_pos = pos;
        Ok(())
    }

    pub fn set_read_pos_to_body_start(&mut self) {
        self.read_pos = BODY_POS;
    }

    /// Moves the write cursor inside the allocated frames. Bytes beyond the old write
    /// cursor are whatever the frames last held. The read cursor is pulled back if it
    /// would pass the new write cursor.
    ///
    /// # Errors
    /// `Error::InvalidPosition` if `pos` is inside the header or past the last frame.
    pub fn set_write_pos(&mut self, pos: usize) -> Result<()> {
        if pos < BODY_POS || pos > self.frames.len() * FRAME_SIZE {
            return Err(Error::InvalidPosition(pos));
        }
        self.write_pos = pos;
        if self.read_pos > pos {
            self.read_pos = pos;
        }
        Ok(())
    }

    /// Drops the body; keeps the header and the frames.
    pub fn set_write_pos_to_body_start(&mut self) {
        self.write_pos = BODY_POS;
        self.read_pos = BODY_POS;
    }

    /// True when every written byte has been read.
    pub fn is_read_finish(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Bytes between the read and write cursors.
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    // ------------------------------------------------------------------
    //  Raw access
    // ------------------------------------------------------------------

    /// Returns every written byte (header included).
    ///
    /// Borrows the first frame when the stream still fits in it, otherwise copies.
    pub fn get_buffer_unsafe(&self) -> Cow<'_, [u8]> {
        if self.write_pos <= FRAME_SIZE {
            return Cow::Borrowed(&self.frames[0][..self.write_pos]);
        }
        let mut out = Vec::with_capacity(self.write_pos);
        let mut left = self.write_pos;
        for frame in &self.frames {
            let n = left.min(FRAME_SIZE);
            out.extend_from_slice(&frame[..n]);
            left -= n;
            if left == 0 {
                break;
            }
        }
        Cow::Owned(out)
    }

    /// Copies every written byte into a new vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.get_buffer_unsafe().into_owned()
    }

    /// Appends raw bytes at the write cursor without any encoding.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let (seg, idx) = locate(self.write_pos);
        let end = idx + bytes.len();
        if seg < self.frames.len() && end <= FRAME_SIZE {
            self.frames[seg][idx..end].copy_from_slice(bytes);
            self.write_pos += bytes.len();
        } else {
            self.put_bytes_slow(bytes);
        }
    }

    /// Writes across one or more frame boundaries, allocating frames as needed.
    fn put_bytes_slow(&mut self, bytes: &[u8]) {
        self.ensure_frames(self.write_pos + bytes.len());
        let mut pos = self.write_pos;
        let mut rest = bytes;
        while !rest.is_empty() {
            let (seg, idx) = locate(pos);
            let n = rest.len().min(FRAME_SIZE - idx);
            self.frames[seg][idx..idx + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            pos += n;
        }
        self.write_pos = pos;
    }

    #[inline]
    pub(crate) fn put_byte(&mut self, b: u8) {
        let (seg, idx) = locate(self.write_pos);
        if seg >= self.frames.len() {
            self.frames.push(frame::get());
        }
        self.frames[seg][idx] = b;
        self.write_pos += 1;
    }

    /// Overwrites already-written bytes at `pos`. Used to back-patch lengths.
    pub(crate) fn patch_bytes(&mut self, pos: usize, bytes: &[u8]) {
        debug_assert!(pos + bytes.len() <= self.write_pos);
        for (i, b) in bytes.iter().enumerate() {
            let (seg, idx) = locate(pos + i);
            self.frames[seg][idx] = *b;
        }
    }

    fn ensure_frames(&mut self, end: usize) {
        let needed = end.div_ceil(FRAME_SIZE).max(1);
        while self.frames.len() < needed {
            self.frames.push(frame::get());
        }
    }

    /// Reads one written byte without moving any cursor.
    #[inline]
    pub(crate) fn byte_at(&self, pos: usize) -> Result<u8> {
        if pos >= self.write_pos {
            return Err(Error::UnexpectedEnd);
        }
        let (seg, idx) = locate(pos);
        Ok(self.frames[seg][idx])
    }

    /// Returns `len` written bytes at `pos`: borrowed inside one frame, copied across two.
    pub(crate) fn bytes_at(&self, pos: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        let end = pos.checked_add(len).ok_or(Error::UnexpectedEnd)?;
        if end > self.write_pos {
            return Err(Error::UnexpectedEnd);
        }
        if len == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let (seg, idx) = locate(pos);
        if idx + len <= FRAME_SIZE {
            return Ok(Cow::Borrowed(&self.frames[seg][idx..idx + len]));
        }
        let mut out = Vec::with_capacity(len);
        let mut cur = pos;
        while cur < end {
            let (seg, idx) = locate(cur);
            let n = (end - cur).min(FRAME_SIZE - idx);
            out.extend_from_slice(&self.frames[seg][idx..idx + n]);
            cur += n;
        }
        Ok(Cow::Owned(out))
    }

    /// Reads a fixed-size little-endian field at `pos`.
    #[inline]
    pub(crate) fn array_at<const N: usize>(&self, pos: usize) -> Result<[u8; N]> {
        let bytes = self.bytes_at(pos, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub(crate) fn u32_at(&self, pos: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array_at(pos)?))
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}
