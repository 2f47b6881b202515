//! Reply decoders
//!
//! A builder turns one raw reply into a typed value. Each function here accepts
//! exactly the reply shapes its commands may legally produce and fails with
//! [`RedisError::Type`] on anything else. Error replies never reach a builder:
//! [`CommandObject::decode`](crate::command::CommandObject::decode) intercepts them.
//!
//! Where RESP2 and RESP3 encode the same logical value differently (a hash as a
//! flat array or as a map, a score as a bulk string or as a double) there are two
//! builders and the command factory picks one up front.

use redis_dispatch_core::{RedisError, RedisResult, RespValue};
use bytes::Bytes;
use std::collections::HashMap;

fn unexpected<T>(expected: &str, reply: &RespValue) -> RedisResult<T> {
    Err(RedisError::Type(format!(
        "Expected {expected}, got {}",
        reply.shape()
    )))
}

fn text(reply: &RespValue) -> RedisResult<String> {
    match reply {
        RespValue::SimpleString(_) | RespValue::BulkString(_) => reply.as_string(),
        _ => unexpected("string", reply),
    }
}

fn elements(reply: RespValue) -> RedisResult<Vec<RespValue>> {
    match reply {
        RespValue::Array(items) | RespValue::Set(items) => Ok(items),
        other => unexpected("array", &other),
    }
}

/// The reply as-is
pub fn raw(reply: RespValue) -> RedisResult<RespValue> {
    Ok(reply)
}

/// Any status reply, discarded
pub fn unit(reply: RespValue) -> RedisResult<()> {
    match reply {
        RespValue::SimpleString(_) => Ok(()),
        other => unexpected("status", &other),
    }
}

/// A status reply such as `OK` or `PONG`
pub fn status(reply: RespValue) -> RedisResult<String> {
    match reply {
        RespValue::SimpleString(s) => Ok(s),
        other => unexpected("status", &other),
    }
}

/// A non-null string
pub fn string(reply: RespValue) -> RedisResult<String> {
    text(&reply)
}

/// A string or null
pub fn optional_string(reply: RespValue) -> RedisResult<Option<String>> {
    match reply {
        RespValue::Null => Ok(None),
        other => text(&other).map(Some),
    }
}

/// A non-null binary value
pub fn bytes(reply: RespValue) -> RedisResult<Bytes> {
    match reply {
        RespValue::BulkString(b) => Ok(b),
        RespValue::SimpleString(s) => Ok(Bytes::from(s.into_bytes())),
        other => unexpected("bulk string", &other),
    }
}

/// A binary value or null
pub fn optional_bytes(reply: RespValue) -> RedisResult<Option<Bytes>> {
    match reply {
        RespValue::Null => Ok(None),
        other => bytes(other).map(Some),
    }
}

/// An integer reply
pub fn integer(reply: RespValue) -> RedisResult<i64> {
    match reply {
        RespValue::Integer(i) => Ok(i),
        other => unexpected("integer", &other),
    }
}

/// An integer or null
pub fn optional_integer(reply: RespValue) -> RedisResult<Option<i64>> {
    match reply {
        RespValue::Null => Ok(None),
        other => integer(other).map(Some),
    }
}

/// A boolean sent as integer 0/1 (RESP2, and most commands under RESP3)
pub fn boolean(reply: RespValue) -> RedisResult<bool> {
    match reply {
        RespValue::Integer(1) => Ok(true),
        RespValue::Integer(0) => Ok(false),
        RespValue::Integer(i) => Err(RedisError::Type(format!(
            "Expected 0 or 1, got integer {i}"
        ))),
        other => unexpected("integer boolean", &other),
    }
}

/// A RESP3 native boolean
pub fn boolean_native(reply: RespValue) -> RedisResult<bool> {
    match reply {
        RespValue::Boolean(b) => Ok(b),
        other => unexpected("boolean", &other),
    }
}

/// A floating point number sent as a bulk string (RESP2)
pub fn double(reply: RespValue) -> RedisResult<f64> {
    match reply {
        RespValue::BulkString(ref b) => {
            let s = std::str::from_utf8(b)
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?;
            parse_double(s)
        }
        other => unexpected("bulk string double", &other),
    }
}

/// A RESP3 native double
pub fn double_native(reply: RespValue) -> RedisResult<f64> {
    match reply {
        RespValue::Double(d) => Ok(d),
        other => unexpected("double", &other),
    }
}

/// A RESP2 double or null
pub fn optional_double(reply: RespValue) -> RedisResult<Option<f64>> {
    match reply {
        RespValue::Null => Ok(None),
        other => double(other).map(Some),
    }
}

/// A RESP3 double or null
pub fn optional_double_native(reply: RespValue) -> RedisResult<Option<f64>> {
    match reply {
        RespValue::Null => Ok(None),
        other => double_native(other).map(Some),
    }
}

fn parse_double(s: &str) -> RedisResult<f64> {
    match s {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse::<f64>()
            .map_err(|e| RedisError::Type(format!("Cannot parse double: {e}"))),
    }
}

/// An array of non-null strings
pub fn string_list(reply: RespValue) -> RedisResult<Vec<String>> {
    elements(reply)?.iter().map(text).collect()
}

/// An array whose elements may be null
pub fn optional_string_list(reply: RespValue) -> RedisResult<Vec<Option<String>>> {
    elements(reply)?.into_iter().map(optional_string).collect()
}

/// An array of integer booleans
pub fn boolean_list(reply: RespValue) -> RedisResult<Vec<bool>> {
    elements(reply)?.into_iter().map(boolean).collect()
}

/// A hash sent as a flat `[field, value, ...]` array (RESP2)
pub fn string_map_flat(reply: RespValue) -> RedisResult<HashMap<String, String>> {
    let items = match reply {
        RespValue::Array(items) => items,
        other => return unexpected("flat field/value array", &other),
    };
    if items.len() % 2 != 0 {
        return Err(RedisError::Type(format!(
            "Expected an even number of elements, got {}",
            items.len()
        )));
    }
    items
        .chunks_exact(2)
        .map(|pair| Ok((text(&pair[0])?, text(&pair[1])?)))
        .collect()
}

/// A hash sent as a RESP3 map
pub fn string_map(reply: RespValue) -> RedisResult<HashMap<String, String>> {
    match reply {
        RespValue::Map(entries) => entries
            .iter()
            .map(|(k, v)| Ok((text(k)?, text(v)?)))
            .collect(),
        other => unexpected("map", &other),
    }
}

/// A `[key, value]` pair or null, as returned by blocking pops
pub fn optional_key_value(reply: RespValue) -> RedisResult<Option<(String, String)>> {
    match reply {
        RespValue::Null => Ok(None),
        RespValue::Array(items) if items.len() == 2 => {
            Ok(Some((text(&items[0])?, text(&items[1])?)))
        }
        RespValue::Array(items) => Err(RedisError::Type(format!(
            "Expected a two element array, got {} elements",
            items.len()
        ))),
        other => unexpected("array or null", &other),
    }
}

/// A `[cursor, [key, ...]]` scan page
pub fn scan_page(reply: RespValue) -> RedisResult<(String, Vec<String>)> {
    let mut items = match reply {
        RespValue::Array(items) if items.len() == 2 => items,
        other => return unexpected("two element scan reply", &other),
    };
    let keys = string_list(items.pop().unwrap_or(RespValue::Null))?;
    let cursor = text(&items[0])?;
    Ok((cursor, keys))
}
