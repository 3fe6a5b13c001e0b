// https://redis.io/docs/reference/protocol-spec

use bytes::Bytes;
use std::fmt;
use std::str;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// A reply value, ready to be written to a client.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// The RESP2 null bulk string, `$-1\r\n`.
    Null,
    /// The RESP2 null array, `*-1\r\n`.
    NullArray,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes);
        bytes
    }

    fn write_to(&self, bytes: &mut Vec<u8>) {
        match self {
            // Simple strings and errors are line based, an embedded CR or LF would end the frame
            // early on the reader side.
            Frame::Simple(s) => write_line(bytes, Kind::SimpleString, &strip_newlines(s)),
            Frame::Error(s) => write_line(bytes, Kind::Error, &strip_newlines(s)),
            Frame::Integer(i) => write_line(bytes, Kind::Integer, &i.to_string()),
            Frame::Bulk(data) => {
                write_line(bytes, Kind::BulkString, &data.len().to_string());
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(CRLF);
            }
            Frame::Null => write_line(bytes, Kind::BulkString, "-1"),
            Frame::NullArray => write_line(bytes, Kind::Array, "-1"),
            Frame::Array(frames) => {
                write_line(bytes, Kind::Array, &frames.len().to_string());
                for frame in frames {
                    frame.write_to(bytes);
                }
            }
        }
    }

    /// Builds an array of bulk strings, the shape used by every pub/sub notification.
    pub fn bulk_array<I, T>(items: I) -> Frame
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(items.into_iter().map(|i| Frame::Bulk(i.into())).collect())
    }
}

fn write_line(bytes: &mut Vec<u8>, kind: Kind, line: &str) {
    bytes.push(kind.sigil());
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(CRLF);
}

fn strip_newlines(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::NullArray => write!(f, "*-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// The five RESP2 data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    SimpleString, // '+'
    Error,        // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl Kind {
    pub fn sigil(self) -> u8 {
        match self {
            Kind::SimpleString => b'+',
            Kind::Error => b'-',
            Kind::Integer => b':',
            Kind::BulkString => b'$',
            Kind::Array => b'*',
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            b'+' => Ok(Kind::SimpleString),
            b'-' => Ok(Kind::Error),
            b':' => Ok(Kind::Integer),
            b'$' => Ok(Kind::BulkString),
            b'*' => Ok(Kind::Array),
            byte => Err(byte),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(Bytes),
    Integer(i64),
    Null,
    Array(Vec<Node>),
}

/// A decoded protocol element.
///
/// `raw` is the exact span of the input buffer the node was decoded from, sigil and terminators
/// included. It shares memory with that buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub kind: Kind,
    pub raw: Bytes,
    pub value: Value,
}

impl Node {
    /// The value as UTF-8 text, when it is a non-null simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match (&self.kind, &self.value) {
            (Kind::SimpleString | Kind::BulkString, Value::String(bytes)) => {
                str::from_utf8(bytes).ok()
            }
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match (&self.kind, &self.value) {
            (Kind::SimpleString, Value::String(s)) => {
                Frame::Simple(String::from_utf8_lossy(s).into_owned())
            }
            (Kind::Error, Value::String(s)) => Frame::Error(String::from_utf8_lossy(s).into_owned()),
            (Kind::BulkString, Value::String(s)) => Frame::Bulk(s.clone()),
            (Kind::Array, Value::Array(nodes)) => {
                Frame::Array(nodes.iter().map(Node::to_frame).collect())
            }
            (Kind::Array, Value::Null) => Frame::NullArray,
            (_, Value::Integer(i)) => Frame::Integer(*i),
            (_, Value::Null) => Frame::Null,
            // The decoder never pairs a string kind with an array value.
            (_, Value::String(s)) => Frame::Bulk(s.clone()),
            (_, Value::Array(nodes)) => Frame::Array(nodes.iter().map(Node::to_frame).collect()),
        }
    }
}

impl From<&Node> for Frame {
    fn from(node: &Node) -> Self {
        node.to_frame()
    }
}

impl From<Node> for Frame {
    fn from(node: Node) -> Self {
        node.to_frame()
    }
}
