//! Request and response bodies.
//!
//! Both start at `BODY_POS`; the header is never touched here.

use streampack::Stream;
use streampack::Value;

use crate::Error;
use crate::ErrorKind;
use crate::Result;

/// The fixed part of a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub path: String,
    pub depth: u64,
    pub caller: String,
}

/// Writes a complete request body.
///
/// # Errors
/// `ReplyPanic` if an argument cannot be encoded.
pub fn write_request(stream: &mut Stream, path: &str, depth: u64, caller: &str, args: &[Value]) -> Result<()> {
    stream.set_write_pos_to_body_start();
    stream.write_string(path)?;
    stream.write_uint64(depth);
    stream.write_string(caller)?;
    for arg in args {
        stream
            .write_value(arg)
            .map_err(|_| Error::reply_panic("value type is not supported"))?;
    }
    Ok(())
}

/// Reads path, depth and caller from the start of the body.
pub fn read_request_head(stream: &mut Stream) -> Result<RequestHead> {
    stream.set_read_pos_to_body_start();
    let path = stream.read_string()?;
    let depth = stream.read_uint64()?;
    let caller = stream.read_string()?;
    Ok(RequestHead { path, depth, caller })
}

/// Writes a success response carrying `value`.
pub fn write_ok(stream: &mut Stream, value: &Value) -> Result<()> {
    stream.set_write_pos_to_body_start();
    stream.write_uint64(ErrorKind::None.code());
    if stream.write_value(value).is_err() {
        stream.set_write_pos_to_body_start();
        return Err(Error::reply_panic("value type is not supported"));
    }
    Ok(())
}

/// Replaces the body with an error response.
pub fn write_error(stream: &mut Stream, err: &Error) {
    stream.set_write_pos_to_body_start();
    stream.write_uint64(err.kind().code());
    let written = stream
        .write_string(err.message())
        .and_then(|_| stream.write_string(err.debug()));
    if written.is_err() {
        // Only reachable with a message or trace longer than u32::MAX bytes.
        stream.set_write_pos_to_body_start();
        stream.write_uint64(ErrorKind::ReplyPanic.code());
        let _ = stream.write_string("rpc error is too large to encode");
        let _ = stream.write_string("");
    }
}

/// Decodes a response body into the reply's value or its error.
pub fn read_response(stream: &mut Stream) -> Result<Value> {
    stream.set_read_pos_to_body_start();
    let code = stream.read_uint64()?;
    match ErrorKind::from_code(code) {
        Some(ErrorKind::None) => Ok(stream.read_value()?),
        Some(kind) => {
            let message = stream.read_string()?;
            let debug = stream.read_string()?;
            Err(Error::new(kind, message).with_debug(debug))
        }
        None => Err(Error::protocol(format!("rpc response error kind({}) is unknown", code))),
    }
}
