pub mod client;
pub mod command;
pub mod dispatch;
pub mod echo;
pub mod executable;
pub mod get;
pub mod ping;
pub mod psubscribe;
pub mod publish;
pub mod pubsub;
pub mod punsubscribe;
pub mod quit;
pub mod registry;
pub mod set;
pub mod subscribe;
pub mod unsubscribe;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::frame::Frame;
use crate::pubsub::PubSubError;

pub use dispatch::{map_to_command_events, split_invocations, CommandEvent, DispatchError};
pub use executable::{CommandOutput, Executable, Session};
pub use registry::{Argument, ArgumentKind, Command, Registry};

/// Walks the arguments of a single invocation.
pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    pub fn new(args: Vec<Frame>) -> Self {
        Self {
            parts: args.into_iter(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EndOfStream)
    }

    pub fn next_string(&mut self) -> Result<String, CommandParserError> {
        match self.next_frame()? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        match self.next_frame()? {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            Frame::Integer(i) => Ok(Bytes::from(i.to_string())),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Like [`CommandParser::next_string`], but `None` once every argument is consumed.
    pub fn next_optional_string(&mut self) -> Result<Option<String>, CommandParserError> {
        match self.next_string() {
            Ok(s) => Ok(Some(s)),
            Err(CommandParserError::EndOfStream) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Collects every remaining argument as a string.
    pub fn remaining_strings(&mut self) -> Result<Vec<String>, CommandParserError> {
        let mut strings = Vec::with_capacity(self.parts.len());
        while self.parts.len() > 0 {
            strings.push(self.next_string()?);
        }
        Ok(strings)
    }

    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    /// Fails if any argument was left unconsumed.
    pub fn finish(&mut self) -> Result<(), CommandParserError> {
        match self.parts.next() {
            None => Ok(()),
            Some(frame) => Err(CommandParserError::UnexpectedArgument { actual: frame }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("protocol error; invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("protocol error; invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("protocol error; attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
    #[error("protocol error; unexpected argument {actual}")]
    UnexpectedArgument { actual: Frame },
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("unknown subcommand '{subcommand}'. Try {command} HELP.")]
    UnknownSubcommand { command: String, subcommand: String },
    #[error("wrong number of arguments for '{command}' command")]
    WrongArity { command: String },
    #[error("syntax error")]
    Syntax,
    #[error(
        "Can't execute '{command}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context"
    )]
    NotAllowedInSubscriptionMode { command: String },
    #[error("no such connection")]
    UnknownConnection,
    #[error(transparent)]
    Parser(#[from] CommandParserError),
    #[error(transparent)]
    PubSub(#[from] PubSubError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<CommandError> for Frame {
    fn from(err: CommandError) -> Self {
        Frame::Error(format!("ERR {}", err))
    }
}
