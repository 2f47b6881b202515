//! RESP protocol implementation
//!
//! Commands are always written as RESP2 arrays of bulk strings. The decoder
//! understands every RESP2 reply type plus the RESP3 additions so a connection
//! negotiated with `HELLO 3` can be read with the same code. RESP3 types with no
//! RESP2 counterpart are folded into the closest [`RespValue`]:
//!
//! - verbatim strings (`=`) become bulk strings without their `txt:` prefix
//! - blob errors (`!`) become error replies
//! - big numbers (`(`) become bulk strings holding the digits
//! - attributes (`|`) are skipped; the value they annotate is returned

use crate::arguments::CommandArguments;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use redis_dispatch_core::{RedisError, RedisResult, RespValue};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encodes commands into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode one command as an array of bulk strings
    pub fn encode_arguments(args: &CommandArguments, buf: &mut BytesMut) {
        buf.put_u8(b'*');
        buf.put_slice(args.len().to_string().as_bytes());
        buf.put_slice(CRLF);

        for token in args.tokens() {
            buf.put_u8(b'$');
            buf.put_slice(token.len().to_string().as_bytes());
            buf.put_slice(CRLF);
            buf.put_slice(token);
            buf.put_slice(CRLF);
        }
    }

    /// Encode a batch of commands back to back into one buffer
    pub fn encode_batch(batch: &[&CommandArguments]) -> Bytes {
        let mut buf = BytesMut::new();
        for args in batch {
            Self::encode_arguments(args, &mut buf);
        }
        buf.freeze()
    }

    /// Encode a reply value; used by test servers and fakes
    pub fn encode_value(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => buf.put_slice(b"_\r\n"),
            RespValue::Boolean(b) => buf.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
            RespValue::Double(d) => {
                buf.put_u8(b',');
                buf.put_slice(d.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Array(items) => Self::encode_aggregate(b'*', items, buf),
            RespValue::Set(items) => Self::encode_aggregate(b'~', items, buf),
            RespValue::Push(items) => Self::encode_aggregate(b'>', items, buf),
            RespValue::Map(entries) => {
                buf.put_u8(b'%');
                buf.put_slice(entries.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for (k, v) in entries {
                    Self::encode_value(k, buf);
                    Self::encode_value(v, buf);
                }
            }
        }
    }

    fn encode_aggregate(prefix: u8, items: &[RespValue], buf: &mut BytesMut) {
        buf.put_u8(prefix);
        buf.put_slice(items.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        for item in items {
            Self::encode_value(item, buf);
        }
    }
}

/// Decodes RESP values from bytes
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one value from the buffer
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete value; the
    /// cursor position is meaningless in that case and the caller retries from the
    /// start once more bytes arrive.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let type_byte = buf.chunk()[0];
        buf.advance(1);

        match type_byte {
            b'+' => Ok(Self::read_text(buf)?.map(RespValue::SimpleString)),
            b'-' => Ok(Self::read_text(buf)?.map(RespValue::Error)),
            b':' => Ok(Self::read_number(buf)?.map(RespValue::Integer)),
            b'$' => Self::decode_bulk_string(buf),
            b'=' => Self::decode_verbatim_string(buf),
            b'!' => match Self::read_blob(buf)? {
                Some(Some(data)) => String::from_utf8(data.to_vec())
                    .map(|msg| Some(RespValue::Error(msg)))
                    .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}"))),
                Some(None) => Ok(Some(RespValue::Null)),
                None => Ok(None),
            },
            b'(' => Ok(Self::read_line(buf)?
                .map(|digits| RespValue::BulkString(Bytes::from(digits)))),
            b'|' => Self::decode_attribute(buf),
            b'*' => Self::decode_sequence(buf, RespValue::Array),
            b'~' => Self::decode_sequence(buf, RespValue::Set),
            b'>' => Self::decode_sequence(buf, RespValue::Push),
            b'%' => Self::decode_map(buf),
            b'_' => Ok(Self::read_line(buf)?.map(|_| RespValue::Null)),
            b'#' => match Self::read_line(buf)? {
                Some(line) if line == b"t" => Ok(Some(RespValue::Boolean(true))),
                Some(line) if line == b"f" => Ok(Some(RespValue::Boolean(false))),
                Some(line) => Err(RedisError::Protocol(format!(
                    "Invalid boolean: {}",
                    String::from_utf8_lossy(&line)
                ))),
                None => Ok(None),
            },
            b',' => match Self::read_text(buf)? {
                Some(text) => Self::parse_double(&text).map(|d| Some(RespValue::Double(d))),
                None => Ok(None),
            },
            _ => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: {}",
                type_byte as char
            ))),
        }
    }

    fn parse_double(text: &str) -> RedisResult<f64> {
        match text {
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            _ => text
                .parse::<f64>()
                .map_err(|e| RedisError::Protocol(format!("Invalid double: {e}"))),
        }
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        Ok(Self::read_blob(buf)?
            .map(|blob| blob.map_or(RespValue::Null, RespValue::BulkString)))
    }

    fn decode_verbatim_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let data = match Self::read_blob(buf)? {
            Some(Some(data)) => data,
            Some(None) => return Ok(Some(RespValue::Null)),
            None => return Ok(None),
        };

        // Three bytes of format, then a colon
        if data.len() < 4 || data[3] != b':' {
            return Err(RedisError::Protocol(
                "Verbatim string is missing its format prefix".to_string(),
            ));
        }
        Ok(Some(RespValue::BulkString(data.slice(4..))))
    }

    fn decode_attribute(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::decode_map(buf)? {
            Some(_) => Self::decode(buf),
            None => Ok(None),
        }
    }

    /// A length-prefixed payload; `Some(None)` is the RESP2 null (`-1` length)
    fn read_blob(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<Option<Bytes>>> {
        let len = match Self::read_number(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(None));
        }
        if len < 0 {
            return Err(RedisError::Protocol(format!(
                "Invalid bulk string length: {len}"
            )));
        }

        let len = len as usize;
        if buf.remaining() < len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len + 2);

        Ok(Some(Some(data)))
    }

    fn decode_sequence(
        buf: &mut Cursor<&[u8]>,
        wrap: fn(Vec<RespValue>) -> RespValue,
    ) -> RedisResult<Option<RespValue>> {
        let len = match Self::read_number(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }

        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid aggregate length: {len}")))?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match Self::decode(buf)? {
                Some(value) => items.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(wrap(items)))
    }

    fn decode_map(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let len = match Self::read_number(buf)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid map length: {len}")))?;
        let mut entries = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match Self::decode(buf)? {
                Some(key) => key,
                None => return Ok(None),
            };
            let value = match Self::decode(buf)? {
                Some(value) => value,
                None => return Ok(None),
            };
            entries.push((key, value));
        }

        Ok(Some(RespValue::Map(entries)))
    }

    fn read_text(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<String>> {
        match Self::read_line(buf)? {
            Some(line) => String::from_utf8(line)
                .map(Some)
                .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}"))),
            None => Ok(None),
        }
    }

    fn read_number(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<i64>> {
        match Self::read_text(buf)? {
            Some(text) => text
                .parse::<i64>()
                .map(Some)
                .map_err(|e| RedisError::Protocol(format!("Invalid integer: {e}"))),
            None => Ok(None),
        }
    }

    fn read_line(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<Vec<u8>>> {
        let start = buf.position() as usize;
        let slice = buf.get_ref();

        for i in start..slice.len().saturating_sub(1) {
            if slice[i] == b'\r' && slice[i + 1] == b'\n' {
                let line = slice[start..i].to_vec();
                buf.set_position((i + 2) as u64);
                return Ok(Some(line));
            }
        }

        Ok(None)
    }
}
