use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::str;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Frame, Kind, Node, Value, CRLF};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Arrays nested deeper than this are rejected instead of recursing further.
const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, ThisError)]
pub enum ProtocolError {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("expected '\\r\\n' terminator at byte {offset}")]
    InvalidTerminator { offset: usize },
    #[error("invalid frame data type byte {sigil} at byte {offset}")]
    UnknownType { sigil: u8, offset: usize },
    #[error("invalid integer at byte {offset}")]
    InvalidInteger { offset: usize },
    #[error("invalid length at byte {offset}")]
    InvalidLength { offset: usize },
    #[error("bulk string length does not match its payload at byte {offset}")]
    LengthMismatch { offset: usize },
    #[error("nesting deeper than {} levels", MAX_NESTING_DEPTH)]
    NestingTooDeep,
    #[error("frame size {size} exceeds limit {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PartialEq for ProtocolError {
    fn eq(&self, other: &Self) -> bool {
        use ProtocolError::*;

        match (self, other) {
            (Incomplete, Incomplete) | (NestingTooDeep, NestingTooDeep) => true,
            (InvalidTerminator { offset: a }, InvalidTerminator { offset: b }) => a == b,
            (InvalidInteger { offset: a }, InvalidInteger { offset: b }) => a == b,
            (InvalidLength { offset: a }, InvalidLength { offset: b }) => a == b,
            (LengthMismatch { offset: a }, LengthMismatch { offset: b }) => a == b,
            (
                UnknownType {
                    sigil: a,
                    offset: x,
                },
                UnknownType {
                    sigil: b,
                    offset: y,
                },
            ) => a == b && x == y,
            (FrameTooLarge { size: a, max: x }, FrameTooLarge { size: b, max: y }) => {
                a == b && x == y
            }
            (Io(a), Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

/// Decodes every frame in `src`.
///
/// Decoding is all or nothing: a malformed frame anywhere in the buffer, or a truncated frame at
/// its end, fails the whole call.
pub fn decode(src: &Bytes) -> Result<Vec<Node>, ProtocolError> {
    let mut nodes = Vec::new();
    let mut offset = 0;

    while offset < src.len() {
        let (node, next) = decode_node(src, offset, 0)?;
        nodes.push(node);
        offset = next;
    }

    Ok(nodes)
}

/// Decodes the complete frames at the front of `src`, stopping at the first incomplete one.
///
/// Returns the decoded nodes and the number of bytes they span.
pub fn decode_available(src: &Bytes) -> Result<(Vec<Node>, usize), ProtocolError> {
    let mut nodes = Vec::new();
    let mut offset = 0;

    while offset < src.len() {
        match decode_node(src, offset, 0) {
            Ok((node, next)) => {
                nodes.push(node);
                offset = next;
            }
            Err(ProtocolError::Incomplete) => break,
            Err(e) => return Err(e),
        }
    }

    Ok((nodes, offset))
}

/// Reads the line starting at `offset`, returning its content and the offset just past its
/// `\r\n` terminator.
///
/// This is the only place the read position moves forward over a line. A `\n` that is not preceded
/// by `\r`, or a `\r` followed by anything other than `\n`, is an invalid terminator. A line whose
/// terminator has not arrived yet is incomplete.
pub(crate) fn read_line(src: &[u8], offset: usize) -> Result<(&[u8], usize), ProtocolError> {
    let rest = src.get(offset..).ok_or(ProtocolError::Incomplete)?;

    let position = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .ok_or(ProtocolError::Incomplete)?;
    let end = offset + position;

    if src[end] == b'\n' {
        return Err(ProtocolError::InvalidTerminator { offset: end });
    }

    match src.get(end + 1) {
        None => Err(ProtocolError::Incomplete),
        Some(b'\n') => Ok((&src[offset..end], end + CRLF.len())),
        Some(_) => Err(ProtocolError::InvalidTerminator { offset: end }),
    }
}

fn parse_integer(line: &[u8], offset: usize) -> Result<i64, ProtocolError> {
    // `i64::from_str` accepts an optional sign followed by at least one digit, nothing else.
    str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ProtocolError::InvalidInteger { offset })
}

fn parse_length(line: &[u8], offset: usize) -> Result<Option<usize>, ProtocolError> {
    match parse_integer(line, offset) {
        Ok(-1) => Ok(None),
        Ok(n) if n >= 0 => {
            usize::try_from(n).map_or(Err(ProtocolError::InvalidLength { offset }), |n| Ok(Some(n)))
        }
        Ok(_) | Err(ProtocolError::InvalidInteger { .. }) => {
            Err(ProtocolError::InvalidLength { offset })
        }
        Err(e) => Err(e),
    }
}

/// Decodes the frame starting at `offset` and returns it along with the offset of the byte right
/// after it.
fn decode_node(src: &Bytes, offset: usize, depth: usize) -> Result<(Node, usize), ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep);
    }

    let sigil = *src.get(offset).ok_or(ProtocolError::Incomplete)?;
    let kind =
        Kind::try_from(sigil).map_err(|sigil| ProtocolError::UnknownType { sigil, offset })?;

    let (line, next) = read_line(src, offset + 1)?;

    let (value, end) = match kind {
        Kind::SimpleString | Kind::Error => {
            let value = src.slice(offset + 1..next - CRLF.len());
            (Value::String(value), next)
        }
        Kind::Integer => (Value::Integer(parse_integer(line, offset + 1)?), next),
        // $<length>\r\n<data>\r\n
        Kind::BulkString => match parse_length(line, offset + 1)? {
            None => (Value::Null, next),
            Some(length) => {
                let body_end = next
                    .checked_add(length)
                    .ok_or(ProtocolError::InvalidLength { offset: offset + 1 })?;
                let frame_end = body_end + CRLF.len();

                if src.len() < frame_end {
                    return Err(ProtocolError::Incomplete);
                }
                if &src[body_end..frame_end] != CRLF {
                    return Err(ProtocolError::LengthMismatch { offset: body_end });
                }

                (Value::String(src.slice(next..body_end)), frame_end)
            }
        },
        // *<number-of-elements>\r\n<element-1>...<element-n>
        Kind::Array => match parse_length(line, offset + 1)? {
            None => (Value::Null, next),
            Some(length) => {
                let mut nodes = Vec::with_capacity(length.min(1024));
                let mut cursor = next;
                for _ in 0..length {
                    let (node, after) = decode_node(src, cursor, depth + 1)?;
                    nodes.push(node);
                    cursor = after;
                }
                (Value::Array(nodes), cursor)
            }
        },
    };

    let node = Node {
        kind,
        raw: src.slice(offset..end),
        value,
    };

    Ok((node, end))
}

/// Adapts the decoder to `tokio_util`'s codec traits.
///
/// A single `decode` call decodes every complete frame in the buffer. The extra frames are queued
/// and handed out by the following calls, so the buffer is only scanned once.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    ready: VecDeque<Node>,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            ready: VecDeque::new(),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Node;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(node) = self.ready.pop_front() {
            return Ok(Some(node));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // Check if the frame size exceeds a certain limit to prevent DoS attacks
        if src.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: src.len(),
                max: self.max_frame_size,
            });
        }

        let buffer = src.split().freeze();
        let (nodes, consumed) = decode_available(&buffer)?;

        // Put the incomplete tail back so more data can be appended to it.
        src.extend_from_slice(&buffer[consumed..]);

        self.ready.extend(nodes);
        Ok(self.ready.pop_front())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.serialize());
        Ok(())
    }
}
