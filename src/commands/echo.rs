use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Returns `message`.
///
/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: Bytes,
}

impl Echo {
    pub const COMMAND: Command = Command {
        name: "ECHO",
        arity: 2,
        arguments: &[Argument::new("message", ArgumentKind::String).at(1)],
        pubsub_context: false,
        handler: run::<Echo>,
    };
}

impl Executable for Echo {
    fn exec(self, _session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput::Reply(Frame::Bulk(self.message)))
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_bytes()?;
        Ok(Self { message })
    }
}
