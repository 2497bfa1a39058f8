//! # Worker Slot
//!
//! One OS thread that evaluates one request at a time.
//!
//! ## Lifecycle
//!
//! ```text
//! idle in a shard -> receives a stream -> evaluate -> result callback -> back to a shard
//! ```
//!
//! The inbound stream is recycled as the next output buffer, so a worker owns exactly
//! one spare stream between requests.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Once;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::thread::ThreadId;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use streampack::Stream;
use streampack::Value;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::Error;
use crate::ProcessorConfig;
use crate::ResultCallback;
use crate::panic_bus;
use crate::pool::Shards;
use crate::reply;
use crate::reply::Reply;
use crate::runtime::CallFrame;
use crate::runtime::Runtime;
use crate::wire;

/// Everything a worker needs that is fixed once the processor starts.
pub(crate) struct Engine {
    pub config: ProcessorConfig,
    pub replies: HashMap<String, Arc<Reply>>,
    pub on_result: ResultCallback,
}

pub(crate) struct Worker {
    pub id: usize,
    engine: Arc<Engine>,
    /// Single-slot hand-off. Dropping the sender asks the worker to exit.
    tx: Mutex<Option<mpsc::Sender<Stream>>>,
    pub(crate) frames: Mutex<Vec<CallFrame>>,
    next_frame: AtomicU64,
    thread: OnceLock<ThreadId>,
    /// Path of the outermost reply being evaluated.
    running: Mutex<Option<String>>,
    done: Mutex<bool>,
    done_cv: Condvar,
}

// ----------------------------------------------------------------------
//  Panic capture
// ----------------------------------------------------------------------

thread_local! {
    static REPLY_DEPTH: Cell<u32> = const { Cell::new(0) };
    static CAPTURE_TRACE: Cell<bool> = const { Cell::new(false) };
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a hook that keeps panics inside replies off stderr and, in debug mode,
/// records their backtrace for the response.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if REPLY_DEPTH.with(|d| d.get()) == 0 {
                previous(info);
                return;
            }
            if CAPTURE_TRACE.with(|c| c.get()) {
                let trace = format!("{}\n{}", info, Backtrace::force_capture());
                LAST_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<Error>() {
        e.message().to_string()
    } else {
        "unknown panic".to_string()
    }
}

// ----------------------------------------------------------------------
//  Worker
// ----------------------------------------------------------------------

impl Worker {
    /// Creates the worker and starts its thread, named `rpc-worker-<id>`.
    pub fn spawn(id: usize, engine: Arc<Engine>, shards: Arc<Shards>) -> crate::Result<(Arc<Self>, JoinHandle<()>)> {
        install_panic_hook();
        let (tx, rx) = mpsc::channel(1);
        let worker = Arc::new(Self {
            id,
            engine,
            tx: Mutex::new(Some(tx)),
            frames: Mutex::new(Vec::new()),
            next_frame: AtomicU64::new(1),
            thread: OnceLock::new(),
            running: Mutex::new(None),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        });
        let runner = worker.clone();
        let handle = thread::Builder::new()
            .name(format!("rpc-worker-{}", id))
            .spawn(move || runner.run(rx, shards))
            .map_err(|e| Error::kernel(format!("rpc-server: failed to spawn worker {}: {}", id, e)))?;
        Ok((worker, handle))
    }

    pub fn is_current_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Hands a request to the worker. Releases the stream if the worker is closed.
    ///
    /// Only idle workers, taken from a shard, are sent to, so the slot is always free
    /// and the hand-off never waits.
    pub fn send(&self, stream: Stream) -> bool {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            stream.release();
            return false;
        };
        match tx.try_send(stream) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(stream)) => {
                warn!(worker = self.id, "hand-off to a busy worker refused");
                stream.release();
                false
            }
            Err(mpsc::error::TrySendError::Closed(stream)) => {
                stream.release();
                false
            }
        }
    }

    /// Asks the worker to exit once its current request is done.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Waits for the worker thread to finish. Returns false on timeout.
    pub fn wait_done(&self, deadline: Instant) -> bool {
        let mut done = self.done.lock();
        while !*done {
            if self.done_cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    /// Path of the reply the worker is stuck in, if any.
    pub fn running(&self) -> Option<String> {
        self.running.lock().clone()
    }

    fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Stream>, shards: Arc<Shards>) {
        let _ = self.thread.set(thread::current().id());
        CAPTURE_TRACE.with(|c| c.set(self.engine.config.debug));
        debug!(worker = self.id, "worker started");

        let mut out = Stream::new();
        let mut args = Vec::with_capacity(16);
        while let Some(mut input) = rx.blocking_recv() {
            let result = self.evaluate(&mut input, out, &mut args);
            let on_result = &self.engine.on_result;
            if std::panic::catch_unwind(AssertUnwindSafe(|| on_result(result))).is_err() {
                panic_bus::publish(&Error::kernel("rpc-server: result callback panicked"));
            }
            args.clear();
            input.reset();
            out = input;
            shards.give_back(self.clone());
        }

        rx.close();
        while let Ok(stream) = rx.try_recv() {
            stream.release();
        }
        out.release();
        *self.done.lock() = true;
        self.done_cv.notify_all();
        debug!(worker = self.id, "worker stopped");
    }

    /// Runs one request and returns `out` holding the response.
    ///
    /// Reentrant: [`Runtime::call`] comes back here with a nested request.
    pub fn evaluate(self: &Arc<Self>, input: &mut Stream, mut out: Stream, args: &mut Vec<Value>) -> Stream {
        let started = Instant::now();
        out.copy_header_from(input);
        out.set_write_pos_to_body_start();

        let head = match wire::read_request_head(input) {
            Ok(head) => head,
            Err(err) => {
                wire::write_error(&mut out, &err);
                return out;
            }
        };
        let max_depth = self.engine.config.max_call_depth;
        if head.depth > max_depth {
            let err = Error::reply(format!(
                "rpc current call depth({}) is overflow. limited({})",
                head.depth, max_depth
            ))
            .with_debug(&head.path);
            wire::write_error(&mut out, &err);
            return out;
        }
        let Some(reply) = self.engine.replies.get(&head.path).cloned() else {
            let err = Error::reply(format!("rpc-server: reply path {} is not mounted", head.path));
            wire::write_error(&mut out, &err);
            return out;
        };

        let saved = input.read_pos();
        let frame_id = self.next_frame.fetch_add(1, Ordering::Relaxed);
        let rt = Runtime::new(Arc::downgrade(self), frame_id);
        {
            let mut frames = self.frames.lock();
            if frames.is_empty() {
                *self.running.lock() = Some(reply.path.clone());
            }
            frames.push(CallFrame {
                id: frame_id,
                out,
                reply: reply.clone(),
                depth: head.depth,
                caller: head.caller,
                written: false,
                succeeded: false,
            });
        }

        REPLY_DEPTH.with(|d| d.set(d.get() + 1));
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| dispatch(&reply, rt, input, args)));
        REPLY_DEPTH.with(|d| d.set(d.get() - 1));

        let Some(mut frame) = self.pop_frame(frame_id) else {
            let err = panic_bus::report(Error::kernel(format!("rpc-server: call frame of {} is lost", reply.path)));
            let mut out = Stream::new();
            out.copy_header_from(input);
            wire::write_error(&mut out, &err);
            return out;
        };

        match outcome {
            Ok(true) if !frame.written => {
                let err = Error::reply_panic(format!("rpc-server: {}: reply returned without a result", reply.call_string))
                    .with_debug(&reply.path);
                wire::write_error(&mut frame.out, &err);
            }
            Ok(true) => {}
            Ok(false) => {
                let called = describe_args(input, saved, &reply.path);
                let err = Error::reply(format!(
                    "rpc reply arguments not match\nCalled: {}\nRequired: {}",
                    called, reply.call_string
                ))
                .with_debug(&reply.origin);
                wire::write_error(&mut frame.out, &err);
                frame.succeeded = false;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let mut err = Error::reply_panic(format!("rpc-server: {}: runtime error: {}", reply.call_string, message));
                if let Some(trace) = LAST_TRACE.with(|t| t.borrow_mut().take()) {
                    err.add_debug(trace);
                }
                warn!(path = %reply.path, panic = %message, "reply panicked");
                wire::write_error(&mut frame.out, &err);
                frame.succeeded = false;
            }
        }

        reply.stats.record(frame.succeeded, started.elapsed());
        frame.out
    }

    fn pop_frame(&self, frame_id: u64) -> Option<CallFrame> {
        let mut frames = self.frames.lock();
        let index = frames.iter().rposition(|f| f.id == frame_id)?;
        let frame = frames.remove(index);
        if frames.is_empty() {
            *self.running.lock() = None;
        }
        Some(frame)
    }
}

/// Decodes the arguments and invokes the reply. False if the arguments do not fit.
fn dispatch(reply: &Reply, rt: Runtime, input: &mut Stream, args: &mut Vec<Value>) -> bool {
    if let Some(fast) = reply.fast {
        return fast(rt, input, &*reply.typed);
    }
    args.clear();
    for kind in &reply.kinds {
        match reply::read_kind(input, *kind) {
            Ok(v) => args.push(v),
            Err(_) => return false,
        }
    }
    if !input.is_read_finish() {
        return false;
    }
    (reply.invoke)(&*reply.typed, rt, args).is_some()
}

/// Re-reads the arguments as whatever they are, for the mismatch message.
fn describe_args(input: &mut Stream, saved: usize, path: &str) -> String {
    let mut types = Vec::new();
    if input.set_read_pos(saved).is_ok() {
        while !input.is_read_finish() {
            match input.read_value() {
                Ok(v) => types.push(v.type_name()),
                Err(_) => {
                    types.push("Unknown");
                    break;
                }
            }
        }
    }
    reply::call_string(path, types.into_iter())
}
