//! # Streampack
//!
//! A segmented, self-describing binary stream for RPC payloads.
//!
//! ## Philosophy
//!
//! - **One Tag Byte**: The leading byte of every value names its kind and, for small
//!   values, the value itself. A reader always knows how long the value is.
//! - **Segmented**: A `Stream` is a list of pooled 512-byte frames. Writes never move
//!   existing bytes; crossing a frame boundary takes a slow path that splits the write.
//! - **All or Nothing**: Every read either consumes exactly one encoded value or leaves
//!   the read cursor where it was.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: 0/2/4/8b]`
//! - **Strings**: `[Tag: 1b][Len: 0/4b][UTF-8][0x00]`
//! - **Bytes**: `[Tag: 1b][Len: 0/4b][Data]`
//! - **Containers**: `[Tag: 1b][Total: 4b][Count: 0/4b][Items]`
//!
//! All integers are Little-Endian. `Total` counts the whole container, tag included.

pub mod frame;
pub mod pool;
pub mod record;
pub mod stream;
pub mod value;

mod decode;
mod encode;

#[cfg(test)]
mod tests;

pub use frame::Frame;
pub use frame::FRAME_SIZE;
pub use record::PosRecord;
pub use stream::Stream;
pub use stream::BODY_POS;
pub use stream::HEADER_SIZE;
pub use value::Array;
pub use value::Kind;
pub use value::Map;
pub use value::Value;

/// Shared recursion budget for nested arrays and maps, on both write and read.
pub const MAX_DEPTH: usize = 64;

/// Stream serialization and deserialization errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte is reserved, or names a different kind than the one requested.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// String is not followed by its terminating zero.
    MissingTerminator,
    /// Container total-length or count disagrees with the bytes actually present.
    LengthMismatch,
    /// Nested containers exceeded `MAX_DEPTH` while writing.
    WriteOverflow,
    /// Nested containers exceeded `MAX_DEPTH` while reading.
    ReadOverflow,
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// Cursor position outside the valid range of the stream.
    InvalidPosition(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of stream"),
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::MissingTerminator => write!(f, "string terminator is missing"),
            Error::LengthMismatch => write!(f, "container length does not match its content"),
            Error::WriteOverflow => write!(f, "write depth overflow (limit {})", MAX_DEPTH),
            Error::ReadOverflow => write!(f, "read depth overflow (limit {})", MAX_DEPTH),
            Error::TooLarge(n) => write!(f, "length {} exceeds u32::MAX", n),
            Error::InvalidPosition(p) => write!(f, "position {} is out of range", p),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Tag byte constants.
///
/// Ranges are inclusive. Values 0, 12 and 13 are reserved and never valid.
pub mod tag {
    pub const NIL: u8 = 1;
    pub const TRUE: u8 = 2;
    pub const FALSE: u8 = 3;
    pub const FLOAT64_ZERO: u8 = 4;
    pub const FLOAT64: u8 = 5;

    pub const INT64_2: u8 = 6;
    pub const INT64_4: u8 = 7;
    pub const INT64_8: u8 = 8;
    pub const UINT64_2: u8 = 9;
    pub const UINT64_4: u8 = 10;
    pub const UINT64_8: u8 = 11;

    /// Inline int64: value is `tag - 21`.
    pub const INT64_INLINE_MIN: u8 = 14;
    pub const INT64_INLINE_MAX: u8 = 53;
    pub const INT64_INLINE_BIAS: i64 = 21;

    /// Inline uint64: value is `tag - 54`.
    pub const UINT64_INLINE_MIN: u8 = 54;
    pub const UINT64_INLINE_MAX: u8 = 63;

    pub const ARRAY_EMPTY: u8 = 64;
    pub const ARRAY_LONG: u8 = 95;
    pub const MAP_EMPTY: u8 = 96;
    pub const MAP_LONG: u8 = 127;

    pub const STRING_EMPTY: u8 = 128;
    pub const STRING_LONG: u8 = 191;
    pub const BYTES_EMPTY: u8 = 192;
    pub const BYTES_LONG: u8 = 255;

    /// Largest element count (or blob length) encoded inline in the tag.
    pub const INLINE_COUNT_MAX: usize = 30;
    pub const INLINE_LEN_MAX: usize = 62;

    /// Returns true for bytes that can never start a value.
    pub fn is_reserved(b: u8) -> bool {
        matches!(b, 0 | 12 | 13)
    }
}
