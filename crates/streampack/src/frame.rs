//! Pooled 512-byte frames, the allocation unit of a `Stream`.

use std::sync::LazyLock;

use crate::pool::Pool;

/// Size of one stream segment.
pub const FRAME_SIZE: usize = 512;

/// A fixed 512-byte buffer.
pub type Frame = Box<[u8; FRAME_SIZE]>;

static FRAME_POOL: LazyLock<Pool<Frame>> = LazyLock::new(|| Pool::new(new_frame, frame_id));

fn new_frame() -> Frame {
    Box::new([0u8; FRAME_SIZE])
}

fn frame_id(frame: &Frame) -> usize {
    frame.as_ptr() as usize
}

/// Takes a frame from the process-wide pool. Contents are unspecified.
pub fn get() -> Frame {
    FRAME_POOL.get()
}

/// Returns a frame to the process-wide pool.
pub fn put(frame: Frame) {
    FRAME_POOL.put(frame)
}

/// Number of idle frames in the pool.
pub fn idle() -> usize {
    FRAME_POOL.idle()
}
