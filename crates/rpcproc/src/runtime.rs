//! # Runtime Handle
//!
//! The only way a reply produces a result. A [`Runtime`] is bound to one call frame of
//! one worker: it stays usable while that frame is the innermost active frame on the
//! worker's own thread, and turns into a logged no-op everywhere else.
//!
//! ## Invariants
//! - A frame's response is written by the first `ok` or `error`. A second write
//!   replaces it with a ReplyPanic error.
//! - The frame stack lock is never held while reply code runs.

use std::panic::Location;
use std::sync::Arc;
use std::sync::Weak;

use streampack::Stream;
use streampack::Value;
use tracing::warn;

use crate::Error;
use crate::Result;
use crate::reply::Reply;
use crate::wire;
use crate::worker::Worker;

/// Message of every error caused by a handle used outside its frame.
pub const ILLEGAL_RUNTIME: &str = "Runtime is illegal in current thread";

/// Proof that a reply wrote its result. Only [`Runtime::ok`] and [`Runtime::error`]
/// create one.
#[must_use]
pub struct Return(());

/// One active reply invocation on a worker.
pub(crate) struct CallFrame {
    pub id: u64,
    pub out: Stream,
    pub reply: Arc<Reply>,
    pub depth: u64,
    pub caller: String,
    pub written: bool,
    pub succeeded: bool,
}

impl CallFrame {
    fn write_ok(&mut self, value: &Value) {
        if self.written {
            self.write_twice();
            return;
        }
        self.written = true;
        match wire::write_ok(&mut self.out, value) {
            Ok(()) => self.succeeded = true,
            Err(err) => wire::write_error(&mut self.out, &err.with_debug(&self.reply.path)),
        }
    }

    fn write_error(&mut self, mut err: Error, location: &Location<'_>) {
        if self.written {
            self.write_twice();
            return;
        }
        self.written = true;
        err.add_debug(format!("{} {}:{}", self.reply.path, location.file(), location.line()));
        wire::write_error(&mut self.out, &err);
    }

    fn write_twice(&mut self) {
        self.succeeded = false;
        let err = Error::reply_panic(format!("rpc-server: {}: reply result has been written twice", self.reply.call_string))
            .with_debug(&self.reply.path);
        warn!(path = %self.reply.path, "reply wrote its result twice");
        wire::write_error(&mut self.out, &err);
    }
}

/// Handle passed to every reply.
#[derive(Clone)]
pub struct Runtime {
    worker: Weak<Worker>,
    frame: u64,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").field("frame", &self.frame).finish()
    }
}

impl Runtime {
    pub(crate) fn new(worker: Weak<Worker>, frame: u64) -> Self {
        Self { worker, frame }
    }

    fn illegal(&self) -> Error {
        let err = Error::reply_panic(ILLEGAL_RUNTIME);
        warn!(frame = self.frame, "{}", ILLEGAL_RUNTIME);
        err
    }

    /// Runs `f` on this handle's frame if it is the active one.
    fn with_frame<T>(&self, f: impl FnOnce(&mut CallFrame) -> T) -> std::result::Result<T, Error> {
        let Some(worker) = self.worker.upgrade() else {
            return Err(self.illegal());
        };
        if !worker.is_current_thread() {
            return Err(self.illegal());
        }
        let mut frames = worker.frames.lock();
        match frames.last_mut() {
            Some(frame) if frame.id == self.frame => Ok(f(frame)),
            _ => {
                drop(frames);
                Err(self.illegal())
            }
        }
    }

    /// Writes a success response.
    ///
    /// Values nested deeper than the codec allows become a ReplyPanic
    /// `value type is not supported`.
    pub fn ok(&self, value: impl Into<Value>) -> Return {
        let value = value.into();
        let _ = self.with_frame(|frame| frame.write_ok(&value));
        Return(())
    }

    /// Writes an error response. `"<path> <file:line>"` of this call is appended to the
    /// error's debug trace.
    #[track_caller]
    pub fn error(&self, err: Error) -> Return {
        let location = Location::caller();
        let _ = self.with_frame(|frame| frame.write_error(err, location));
        Return(())
    }

    /// Calls another reply synchronously on this worker.
    ///
    /// The callee sees this reply's path as its caller and runs one level deeper.
    pub fn call(&self, target: &str, args: &[Value]) -> Result<Value> {
        let (caller, depth) = self.with_frame(|frame| (frame.reply.path.clone(), frame.depth))?;
        let worker = self.worker.upgrade().ok_or_else(|| self.illegal())?;

        let mut request = Stream::new();
        if let Err(err) = wire::write_request(&mut request, target, depth + 1, &caller, args) {
            request.release();
            return Err(err);
        }
        let mut args = Vec::with_capacity(args.len());
        let mut response = worker.evaluate(&mut request, Stream::new(), &mut args);
        request.release();

        let result = wire::read_response(&mut response);
        response.release();
        result
    }

    /// Call depth of this frame.
    pub fn depth(&self) -> Option<u64> {
        self.with_frame(|frame| frame.depth).ok()
    }

    /// Caller identity of this frame, `#` for external requests.
    pub fn caller(&self) -> Option<String> {
        self.with_frame(|frame| frame.caller.clone()).ok()
    }

    /// Path of the reply this frame runs.
    pub fn path(&self) -> Option<String> {
        self.with_frame(|frame| frame.reply.path.clone()).ok()
    }
}
