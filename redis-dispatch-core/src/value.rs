//! RESP (REdis Serialization Protocol) value types
//!
//! [`RespValue`] is the raw reply handed to a command's decoder. It covers both
//! RESP2 shapes and the RESP3 additions a server negotiated with `HELLO 3` may send.

use crate::error::{RedisError, RedisResult};
use bytes::Bytes;

/// RESP protocol value
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string ($-1\r\n), null array (*-1\r\n) or RESP3 null (_\r\n)
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
    /// RESP3 boolean: #t\r\n
    Boolean(bool),
    /// RESP3 double: ,1.5\r\n
    Double(f64),
    /// RESP3 map, in wire order: %1\r\n+key\r\n:1\r\n
    Map(Vec<(RespValue, RespValue)>),
    /// RESP3 set: ~2\r\n+a\r\n+b\r\n
    Set(Vec<RespValue>),
    /// RESP3 push message: >2\r\n+message\r\n+hello\r\n
    Push(Vec<RespValue>),
}

impl RespValue {
    /// Short name of the reply shape, used in decode errors
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk string",
            Self::Null => "null",
            Self::Array(_) => "array",
            Self::Boolean(_) => "boolean",
            Self::Double(_) => "double",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Push(_) => "push",
        }
    }

    /// Convert to a string if possible
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to string",
                self.shape()
            ))),
        }
    }

    /// Convert to an integer if possible
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(b) => {
                let s = std::str::from_utf8(b)
                    .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?;
                s.parse::<i64>()
                    .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}")))
            }
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to integer",
                self.shape()
            ))),
        }
    }

    /// Convert to bytes if possible
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Self::Null => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to bytes",
                self.shape()
            ))),
        }
    }

    /// Borrow the elements of an array-like reply (array, set or push)
    pub fn as_slice(&self) -> RedisResult<&[RespValue]> {
        match self {
            Self::Array(items) | Self::Set(items) | Self::Push(items) => Ok(items),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {} to array",
                self.shape()
            ))),
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Extract error message if this is an error
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// `+OK`
    #[must_use]
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Vec<u8>> for RespValue {
    fn from(b: Vec<u8>) -> Self {
        Self::BulkString(Bytes::from(b))
    }
}

impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}
