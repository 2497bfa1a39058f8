//! # Replies
//!
//! A reply is a handler closure `Fn(Runtime, A1, .., An) -> Return` where each `Ai` is
//! one of the eight argument kinds. Mounting erases the closure into a
//! [`TypedReply`] behind `dyn Any`, keeps the kind list next to it, and records a
//! monomorphized reflective invoker that can recover the concrete type again.
//!
//! ## Invariants
//! - `Reply::kinds` is exactly the closure's parameter list after the runtime.
//! - `Reply::typed` always downcasts to `TypedReply<(A1, .., An)>` of those kinds, which
//!   is what generated fast paths rely on.

use std::any::Any;
use std::sync::Arc;

use streampack::Kind;
use streampack::Map;
use streampack::Stream;
use streampack::Value;

use crate::FastPath;
use crate::Return;
use crate::Runtime;
use crate::stats::ReplyStats;

/// A type a reply may take as an argument.
pub trait Arg: Sized + Send + 'static {
    const KIND: Kind;

    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_arg {
    ($($t:ty => $kind:ident / $variant:ident),* $(,)?) => {
        $(
            impl Arg for $t {
                const KIND: Kind = Kind::$kind;

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_arg! {
    bool => Bool / Bool,
    i64 => Int / Int64,
    u64 => Uint / Uint64,
    f64 => Float / Float64,
    String => String / String,
    Vec<u8> => Bytes / Bytes,
    Vec<Value> => Array / Array,
    Map => Map / Map,
}

/// An argument tuple rebuilt from decoded values.
pub trait FromValues: Sized + Send + 'static {
    fn kinds() -> Vec<Kind>;

    /// Drains `values` into the tuple. `None` if the count or a kind is off.
    fn from_values(values: &mut Vec<Value>) -> Option<Self>;
}

/// A reply closure with its argument tuple made explicit.
///
/// This is the concrete type generated fast paths downcast to.
pub struct TypedReply<Args> {
    f: Box<dyn Fn(Runtime, Args) -> Return + Send + Sync>,
}

impl<Args> TypedReply<Args> {
    pub fn new(f: impl Fn(Runtime, Args) -> Return + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    pub fn call(&self, rt: Runtime, args: Args) -> Return {
        (self.f)(rt, args)
    }
}

/// Closures that can be mounted as replies.
///
/// Implemented for `Fn(Runtime, A1, .., An) -> Return` with up to eight [`Arg`]s.
pub trait IntoReply<Args>: Send + Sync + 'static {
    fn into_typed(self) -> TypedReply<Args>;
}

macro_rules! impl_reply_arity {
    ($($a:ident),*) => {
        impl<$($a: Arg),*> FromValues for ($($a,)*) {
            fn kinds() -> Vec<Kind> {
                vec![$($a::KIND),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn from_values(values: &mut Vec<Value>) -> Option<Self> {
                let mut it = values.drain(..);
                $(let $a = $a::from_value(it.next()?)?;)*
                if it.next().is_some() {
                    return None;
                }
                Some(($($a,)*))
            }
        }

        impl<Func, $($a: Arg),*> IntoReply<($($a,)*)> for Func
        where
            Func: Fn(Runtime, $($a),*) -> Return + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn into_typed(self) -> TypedReply<($($a,)*)> {
                TypedReply::new(move |rt, ($($a,)*)| self(rt, $($a),*))
            }
        }
    };
}

impl_reply_arity!();
impl_reply_arity!(A1);
impl_reply_arity!(A1, A2);
impl_reply_arity!(A1, A2, A3);
impl_reply_arity!(A1, A2, A3, A4);
impl_reply_arity!(A1, A2, A3, A4, A5);
impl_reply_arity!(A1, A2, A3, A4, A5, A6);
impl_reply_arity!(A1, A2, A3, A4, A5, A6, A7);
impl_reply_arity!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Rebuilds the argument tuple from `values` and calls the reply.
pub(crate) type Invoker = fn(&(dyn Any + Send + Sync), Runtime, &mut Vec<Value>) -> Option<Return>;

fn invoke_reflective<Args: FromValues>(
    typed: &(dyn Any + Send + Sync),
    rt: Runtime,
    values: &mut Vec<Value>,
) -> Option<Return> {
    let reply = typed.downcast_ref::<TypedReply<Args>>()?;
    let args = Args::from_values(values)?;
    Some(reply.call(rt, args))
}

/// A reply declared on a [`crate::Service`] but not mounted yet.
pub(crate) struct ReplyMeta {
    pub name: String,
    pub kinds: Vec<Kind>,
    pub typed: Arc<dyn Any + Send + Sync>,
    pub invoke: Invoker,
    pub origin: String,
}

impl ReplyMeta {
    pub fn new<Args: FromValues, F: IntoReply<Args>>(name: &str, f: F, origin: String) -> Self {
        Self {
            name: name.to_string(),
            kinds: Args::kinds(),
            typed: Arc::new(f.into_typed()),
            invoke: invoke_reflective::<Args>,
            origin,
        }
    }
}

/// A mounted reply. Immutable apart from its counters.
pub struct Reply {
    pub(crate) path: String,
    pub(crate) kinds: Vec<Kind>,
    pub(crate) kind_string: String,
    pub(crate) call_string: String,
    pub(crate) origin: String,
    pub(crate) typed: Arc<dyn Any + Send + Sync>,
    pub(crate) invoke: Invoker,
    pub(crate) fast: Option<FastPath>,
    pub(crate) stats: ReplyStats,
}

impl Reply {
    pub(crate) fn mount(service_path: &str, meta: &ReplyMeta) -> Self {
        let path = format!("{}:{}", service_path, meta.name);
        Self {
            kind_string: Kind::string_of(&meta.kinds),
            call_string: call_string(&path, meta.kinds.iter().map(|k| k.name())),
            path,
            kinds: meta.kinds.clone(),
            origin: meta.origin.clone(),
            typed: meta.typed.clone(),
            invoke: meta.invoke,
            fast: None,
            stats: ReplyStats::new(),
        }
    }

    /// Fully qualified path, e.g. `$.user:sayHello`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kinds(&self) -> &[Kind] {
        &self.kinds
    }

    /// One character per argument, e.g. `SI`.
    pub fn kind_string(&self) -> &str {
        &self.kind_string
    }

    /// Signature used in diagnostics, e.g. `$.user:sayHello(Context, String) Return`.
    pub fn call_string(&self) -> &str {
        &self.call_string
    }

    /// `file:line` of the `Service::reply` call that declared it.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn has_fast_path(&self) -> bool {
        self.fast.is_some()
    }
}

/// Formats `<path>(Context, <types>) Return`.
pub(crate) fn call_string<'a>(path: &str, types: impl Iterator<Item = &'a str>) -> String {
    let mut out = format!("{}(Context", path);
    for t in types {
        out.push_str(", ");
        out.push_str(t);
    }
    out.push_str(") Return");
    out
}

/// Reads one argument of the declared kind.
pub(crate) fn read_kind(stream: &mut Stream, kind: Kind) -> streampack::Result<Value> {
    Ok(match kind {
        Kind::Bool => Value::Bool(stream.read_bool()?),
        Kind::Int => Value::Int64(stream.read_int64()?),
        Kind::Uint => Value::Uint64(stream.read_uint64()?),
        Kind::Float => Value::Float64(stream.read_float64()?),
        Kind::String => Value::String(stream.read_string()?),
        Kind::Bytes => Value::Bytes(stream.read_bytes()?),
        Kind::Array => Value::Array(stream.read_array()?),
        Kind::Map => Value::Map(stream.read_map()?),
    })
}
