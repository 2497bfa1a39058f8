//! # Error Definitions
//!
//! Every failure the processor can report, partitioned by how the receiver recovers.
//!
//! An error travels inside a response stream as `(kind, message, debug)`. The debug
//! trace grows as the error propagates: each layer appends one line.

/// Error classes. The numeric value is what goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ErrorKind {
    /// Success marker in a response stream.
    None = 0,
    /// The reply returned an error, or the request did not fit the reply.
    Reply = 1,
    /// The reply panicked or misused its runtime handle.
    ReplyPanic = 2,
    /// Transport adapter internals, e.g. a close that was never acknowledged.
    Runtime = 3,
    /// Malformed stream.
    Protocol = 4,
    /// I/O failure.
    Transport = 5,
    /// Internal invariant violation. Published on the panic bus.
    Kernel = 6,
}

impl ErrorKind {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => ErrorKind::None,
            1 => ErrorKind::Reply,
            2 => ErrorKind::ReplyPanic,
            3 => ErrorKind::Runtime,
            4 => ErrorKind::Protocol,
            5 => ErrorKind::Transport,
            6 => ErrorKind::Kernel,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::None => "None",
            ErrorKind::Reply => "Reply",
            ErrorKind::ReplyPanic => "ReplyPanic",
            ErrorKind::Runtime => "Runtime",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::Transport => "Transport",
            ErrorKind::Kernel => "Kernel",
        };
        f.write_str(name)
    }
}

/// An error with a kind, a message and an appendable debug trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    debug: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), debug: String::new() }
    }

    /// An error a reply hands back to its caller.
    pub fn reply(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reply, message)
    }

    pub fn reply_panic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReplyPanic, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn kernel(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Kernel, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn debug(&self) -> &str {
        &self.debug
    }

    /// Appends one line to the debug trace.
    pub fn add_debug(&mut self, line: impl AsRef<str>) {
        if !self.debug.is_empty() {
            self.debug.push('\n');
        }
        self.debug.push_str(line.as_ref());
    }

    pub fn with_debug(mut self, line: impl AsRef<str>) -> Self {
        self.add_debug(line);
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if f.alternate() && !self.debug.is_empty() {
            write!(f, "\n{}", self.debug)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<streampack::Error> for Error {
    fn from(e: streampack::Error) -> Self {
        Self::protocol(format!("rpc stream is broken: {}", e))
    }
}

/// A specialized `Result` for processor operations.
pub type Result<T> = std::result::Result<T, Error>;
