use bytes::{Buf, BufMut, Bytes, BytesMut};
use shared::{Error, Result};
use tokio_util::codec::{Decoder, Encoder};

// Frame type prefixes
pub const TYPE_SIMPLE: u8 = b'+';
pub const TYPE_ERROR: u8 = b'-';
pub const TYPE_INTEGER: u8 = b':';
pub const TYPE_BULK: u8 = b'$';
pub const TYPE_ARRAY: u8 = b'*';

/// Largest frame the codec buffers before giving up on a peer.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

const MAX_ARRAY_LEN: i64 = 1024 * 1024;
const MAX_NESTING: usize = 32;

/// A single RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    pub fn error(msg: impl Into<String>) -> Frame {
        Frame::Error(msg.into())
    }

    /// Build a request: an array of bulk strings.
    pub fn command<I, T>(parts: I) -> Frame
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(|p| Frame::Bulk(p.into())).collect())
    }

    /// Split a request frame into its verb and argument payloads.
    pub fn into_command(self) -> Result<Vec<Bytes>> {
        let Frame::Array(items) = self else {
            return Err(Error::Protocol("request must be an array".to_string()));
        };
        if items.is_empty() {
            return Err(Error::Protocol("empty request".to_string()));
        }

        items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(data) => Ok(data),
                Frame::Simple(text) => Ok(Bytes::from(text)),
                Frame::Integer(n) => Ok(Bytes::from(n.to_string())),
                other => Err(Error::Protocol(format!(
                    "unsupported request argument: {other:?}"
                ))),
            })
            .collect()
    }

    /// Payload of a string-like frame.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(data) => Some(data),
            Frame::Simple(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Encode this frame onto the end of `dst`.
    ///
    /// Format:
    /// - Simple:  +<text>\r\n
    /// - Error:   -<text>\r\n
    /// - Integer: :<n>\r\n
    /// - Bulk:    $<len>\r\n<bytes>\r\n
    /// - Null:    $-1\r\n
    /// - Array:   *<len>\r\n<frame>...
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(text) => {
                dst.put_u8(TYPE_SIMPLE);
                dst.put_slice(text.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(msg) => {
                dst.put_u8(TYPE_ERROR);
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(TYPE_INTEGER);
                dst.put_slice(n.to_string().as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(TYPE_BULK);
                dst.put_slice(data.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => {
                dst.put_slice(b"$-1\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(TYPE_ARRAY);
                dst.put_slice(items.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Parse one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds only part of a frame, otherwise the
    /// frame and the number of bytes it occupied.
    pub fn parse(src: &[u8]) -> Result<Option<(Frame, usize)>> {
        match parse_at(src, 0, 0)? {
            Parsed::Complete(frame, used) => Ok(Some((frame, used))),
            Parsed::Partial { .. } => Ok(None),
        }
    }
}

// Smallest encoded frame, `+\r\n`
const MIN_FRAME_LEN: usize = 3;

enum Parsed {
    Complete(Frame, usize),
    /// The buffer ends mid-frame and cannot make progress before it holds
    /// at least `needed` bytes.
    Partial { needed: usize },
}

fn parse_at(src: &[u8], pos: usize, depth: usize) -> Result<Parsed> {
    if depth > MAX_NESTING {
        return Err(Error::Protocol("frame nesting too deep".to_string()));
    }
    let Some(&tag) = src.get(pos) else {
        return Ok(Parsed::Partial { needed: pos + 1 });
    };
    let Some((line, next)) = read_line(src, pos + 1) else {
        return Ok(Parsed::Partial {
            needed: src.len() + 1,
        });
    };

    match tag {
        TYPE_SIMPLE => Ok(Parsed::Complete(
            Frame::Simple(String::from_utf8_lossy(line).into_owned()),
            next,
        )),
        TYPE_ERROR => Ok(Parsed::Complete(
            Frame::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        )),
        TYPE_INTEGER => Ok(Parsed::Complete(Frame::Integer(parse_int(line)?), next)),
        TYPE_BULK => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Parsed::Complete(Frame::Null, next));
            }
            if len < 0 || len as usize > MAX_FRAME_LENGTH {
                return Err(Error::Protocol(format!("invalid bulk length {len}")));
            }
            let end = next + len as usize;
            if src.len() < end + 2 {
                return Ok(Parsed::Partial { needed: end + 2 });
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(Error::Protocol("bulk string missing terminator".to_string()));
            }
            let data = Bytes::copy_from_slice(&src[next..end]);
            Ok(Parsed::Complete(Frame::Bulk(data), end + 2))
        }
        TYPE_ARRAY => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Parsed::Complete(Frame::Null, next));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&len) {
                return Err(Error::Protocol(format!("invalid array length {len}")));
            }
            let len = len as usize;
            // The header alone says nothing about how much data follows
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for index in 0..len {
                match parse_at(src, cursor, depth + 1)? {
                    Parsed::Complete(item, after) => {
                        items.push(item);
                        cursor = after;
                    }
                    Parsed::Partial { needed } => {
                        let remaining = len - index - 1;
                        return Ok(Parsed::Partial {
                            needed: needed + remaining * MIN_FRAME_LEN,
                        });
                    }
                }
            }
            Ok(Parsed::Complete(Frame::Array(items), cursor))
        }
        _ => Err(Error::Protocol(format!("unknown frame type: 0x{:02X}", tag))),
    }
}

fn read_line(src: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(start..)?;
    rest.windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| (&rest[..i], start + i + 2))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Streaming RESP codec for `tokio_util::codec::Framed`.
///
/// After a partial read the codec remembers how many bytes the pending frame
/// needs at minimum and does not parse again until that many have arrived.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_frame_length: usize,
    needed: usize,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            needed: 0,
        }
    }
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < self.needed {
            return Ok(None);
        }
        match parse_at(&src[..], 0, 0)? {
            Parsed::Complete(frame, consumed) => {
                self.needed = 0;
                src.advance(consumed);
                Ok(Some(frame))
            }
            Parsed::Partial { needed } if needed > self.max_frame_length => Err(
                Error::Protocol(format!("frame exceeds {} bytes", self.max_frame_length)),
            ),
            Parsed::Partial { needed } => {
                self.needed = needed;
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.encode(dst);
        Ok(())
    }
}
