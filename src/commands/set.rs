use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SetCondition {
    /// Only set the key if it does not already exist.
    Nx,
    /// Only set the key if it already exists.
    Xx,
}

/// Set `key` to hold the string `value`. If key already holds a value, it is overwritten.
///
/// Replies `OK`, or `nil` when a `NX`/`XX` condition was not met.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub condition: Option<SetCondition>,
}

impl Set {
    pub const COMMAND: Command = Command {
        name: "SET",
        arity: -3,
        arguments: &[
            Argument::new("key", ArgumentKind::Key).at(1),
            Argument::new("value", ArgumentKind::String).at(2),
            Argument::new("condition", ArgumentKind::Token).optional(),
        ],
        pubsub_context: false,
        handler: run::<Set>,
    };
}

impl Executable for Set {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let store = &mut session.context.store;

        let applied = match self.condition {
            None => {
                store.replace(self.key, self.value);
                true
            }
            Some(SetCondition::Nx) => store.set(self.key, self.value).is_ok(),
            Some(SetCondition::Xx) => {
                if store.exists(&self.key) {
                    store.replace(self.key, self.value);
                    true
                } else {
                    false
                }
            }
        };

        let res = if applied {
            Frame::Simple("OK".to_string())
        } else {
            Frame::Null
        };

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;

        let mut condition = None;
        while let Some(option) = parser.next_optional_string()? {
            let parsed = match option.to_uppercase().as_str() {
                "NX" => SetCondition::Nx,
                "XX" => SetCondition::Xx,
                _ => return Err(CommandError::Syntax),
            };

            // NX and XX are mutually exclusive.
            if condition.is_some_and(|c| c != parsed) {
                return Err(CommandError::Syntax);
            }
            condition = Some(parsed);
        }

        Ok(Self {
            key,
            value,
            condition,
        })
    }
}
