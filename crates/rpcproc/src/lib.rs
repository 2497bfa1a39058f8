//! # rpcproc
//!
//! An embeddable RPC processor. Framed request streams go in, framed response streams
//! come out; what carries them between machines is somebody else's problem.
//!
//! ## Philosophy
//!
//! - **Typed Replies**: Handlers are plain Rust closures `Fn(Runtime, A1, .., An) -> Return`.
//!   Their argument kinds are known at mount time, so nothing is inspected at call time.
//! - **Pre-sized Workers**: Every request runs on one of a fixed set of worker threads,
//!   handed out through a sharded free-list.
//! - **One Response Per Request**: Whatever a handler does (returns, fails, panics,
//!   misuses its runtime) the result callback sees exactly one response stream.
//!
//! ## Wire Layout
//!
//! Request body: `[path: string][depth: uint64][caller: string][args...]`
//!
//! Response body: `[kind: uint64]` then either `[value]` (kind 0) or
//! `[message: string][debug: string]`.

pub mod cache;
pub mod config;
pub mod error;
pub mod panic_bus;
pub mod processor;
pub mod reply;
pub mod runtime;
pub mod service;
pub mod stats;
pub mod transport;
pub mod wire;

mod pool;
mod worker;

#[cfg(test)]
mod tests;

pub use streampack;
pub use streampack::Array;
pub use streampack::Kind;
pub use streampack::Map;
pub use streampack::Stream;
pub use streampack::Value;

pub use cache::FastPath;
pub use cache::ReplyCache;
pub use config::ProcessorConfig;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use processor::Processor;
pub use processor::ResultCallback;
pub use reply::Arg;
pub use reply::IntoReply;
pub use reply::TypedReply;
pub use runtime::Return;
pub use runtime::Runtime;
pub use service::Service;
pub use stats::StatsSnapshot;

/// Caller identity used by requests that do not come from another reply.
pub const EXTERNAL_CALLER: &str = "#";

/// Root of the service namespace.
pub const ROOT_PATH: &str = "$";
