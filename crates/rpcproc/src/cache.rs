//! # Fast-path Cache
//!
//! Reflective argument decoding goes through a `Vec<Value>` and a tuple rebuild. A fast
//! path skips both: it reads the exact typed sequence for one kind-string straight into
//! locals and calls the concrete [`TypedReply`](crate::TypedReply).
//!
//! Fast paths are ordinary Rust functions. [`render`] emits their source for every
//! kind-string the processor has mounted; the embedder compiles that file and passes
//! its `reply_cache()` to the next [`crate::Processor::new`].
//!
//! ## Format
//!
//! The emitted file is deterministic: kind-strings are sorted shorter first, then
//! lexicographically, and each one yields a function `fc<K>` plus a table entry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write;

use streampack::Kind;
use streampack::Stream;

use crate::Runtime;

/// Decodes the arguments for one kind-string and invokes the reply.
///
/// Returns false, without invoking anything, if the stream does not hold exactly those
/// arguments or the reply is not of the expected concrete type.
pub type FastPath = fn(Runtime, &mut Stream, &(dyn Any + Send + Sync)) -> bool;

/// Kind-string to fast path.
#[derive(Clone, Default)]
pub struct ReplyCache {
    table: HashMap<String, FastPath>,
}

impl ReplyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kinds: &str, f: FastPath) {
        self.table.insert(kinds.to_string(), f);
    }

    pub fn get(&self, kinds: &str) -> Option<FastPath> {
        self.table.get(kinds).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl std::fmt::Debug for ReplyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.table.keys().collect();
        kinds.sort();
        f.debug_struct("ReplyCache").field("kinds", &kinds).finish()
    }
}

/// Sorts shorter first, then lexicographically, and drops duplicates.
pub fn sort_kind_strings(kinds: &mut Vec<String>) {
    kinds.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    kinds.dedup();
}

fn rust_type(kind: Kind) -> &'static str {
    match kind {
        Kind::Bool => "bool",
        Kind::Int => "i64",
        Kind::Uint => "u64",
        Kind::Float => "f64",
        Kind::String => "String",
        Kind::Bytes => "Vec<u8>",
        Kind::Array => "Array",
        Kind::Map => "Map",
    }
}

fn reader(kind: Kind) -> &'static str {
    match kind {
        Kind::Bool => "read_bool",
        Kind::Int => "read_int64",
        Kind::Uint => "read_uint64",
        Kind::Float => "read_float64",
        Kind::String => "read_string",
        Kind::Bytes => "read_bytes",
        Kind::Array => "read_array",
        Kind::Map => "read_map",
    }
}

/// Emits the fast-path source file for `kind_strings`.
///
/// Characters that are not kind codes are skipped.
pub fn render(pkg_name: &str, kind_strings: &[String]) -> String {
    let mut kinds: Vec<String> = kind_strings.to_vec();
    sort_kind_strings(&mut kinds);

    let mut out = String::new();
    let _ = writeln!(out, "// Code generated by rpcproc build_cache. DO NOT EDIT.");
    let _ = writeln!(out, "//");
    let _ = writeln!(out, "// Fast-path decoders for `{}`.", pkg_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "#![allow(non_snake_case, unused_imports)]");
    let _ = writeln!(out);
    let _ = writeln!(out, "use std::any::Any;");
    let _ = writeln!(out);
    for name in ["Array", "Map", "ReplyCache", "Runtime", "Stream", "TypedReply"] {
        let _ = writeln!(out, "use rpcproc::{};", name);
    }

    for kind_string in &kinds {
        let parsed: Vec<Kind> = kind_string.chars().filter_map(Kind::from_code).collect();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "pub fn fc{}(rt: Runtime, stream: &mut Stream, reply: &(dyn Any + Send + Sync)) -> bool {{",
            kind_string
        );
        for (i, kind) in parsed.iter().enumerate() {
            let _ = writeln!(out, "    let Ok(a{}) = stream.{}() else {{", i, reader(*kind));
            let _ = writeln!(out, "        return false;");
            let _ = writeln!(out, "    }};");
        }
        let _ = writeln!(out, "    if !stream.is_read_finish() {{");
        let _ = writeln!(out, "        return false;");
        let _ = writeln!(out, "    }}");
        let tuple: String = parsed.iter().map(|k| format!("{},", rust_type(*k))).collect();
        let _ = writeln!(out, "    let Some(reply) = reply.downcast_ref::<TypedReply<({})>>() else {{", tuple);
        let _ = writeln!(out, "        return false;");
        let _ = writeln!(out, "    }};");
        let args: String = (0..parsed.len()).map(|i| format!("a{},", i)).collect();
        let _ = writeln!(out, "    let _ = reply.call(rt, ({}));", args);
        let _ = writeln!(out, "    true");
        let _ = writeln!(out, "}}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "pub fn reply_cache() -> ReplyCache {{");
    let _ = writeln!(out, "    let mut cache = ReplyCache::new();");
    for kind_string in &kinds {
        let _ = writeln!(out, "    cache.insert(\"{}\", fc{});", kind_string, kind_string);
    }
    let _ = writeln!(out, "    cache");
    let _ = writeln!(out, "}}");
    out
}
