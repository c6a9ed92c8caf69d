//! RESP2 encoder and decoder
//!
//! Only what a pub/sub client needs: commands go out as arrays of bulk
//! strings, replies and pushes come back as any RESP2 type.
//!
//! Type markers:
//! ```text
//! '+' - Simple string
//! '-' - Error
//! ':' - Integer
//! '$' - Bulk string ($-1 is null)
//! '*' - Array (*-1 is null)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::utils::error::UpstreamError;

/// Maximum nesting depth for arrays
const MAX_NESTING_DEPTH: usize = 32;

/// Largest bulk string we are willing to buffer.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text content of a simple or bulk string.
    pub fn into_string(self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s),
            RespValue::Bulk(Some(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

/// Append a command (array of bulk strings) to `buf`.
pub fn encode_command(args: &[&str], buf: &mut BytesMut) {
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

/// Decode one value from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched when the value is not
/// complete yet; on success the consumed bytes are removed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, UpstreamError> {
    match parse(&buf[..], 0, 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse(src: &[u8], pos: usize, depth: usize) -> Result<Option<(RespValue, usize)>, UpstreamError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(UpstreamError::Protocol("reply nested too deeply".to_string()));
    }
    let Some(&marker) = src.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(src, pos + 1) else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(Some((RespValue::Simple(utf8(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(utf8(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            if len > MAX_BULK_LEN {
                return Err(UpstreamError::Protocol(format!("bulk string too large: {len}")));
            }
            let end = next + len as usize;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(UpstreamError::Protocol("bulk string not terminated".to_string()));
            }
            let data = Bytes::copy_from_slice(&src[next..end]);
            Ok(Some((RespValue::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            let mut items = Vec::with_capacity((count as usize).min(64));
            let mut cursor = next;
            for _ in 0..count {
                match parse(src, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(UpstreamError::Protocol(format!(
            "unexpected type marker 0x{other:02x}"
        ))),
    }
}

fn read_line(src: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(start..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], start + idx + 2))
}

fn utf8(line: &[u8]) -> Result<String, UpstreamError> {
    String::from_utf8(line.to_vec())
        .map_err(|_| UpstreamError::Protocol("line is not valid UTF-8".to_string()))
}

fn parse_int(line: &[u8]) -> Result<i64, UpstreamError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| UpstreamError::Protocol("invalid integer".to_string()))
}
