use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
///
/// In subscription mode the reply is the push-style `["pong", message]` array instead.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

impl Ping {
    pub const COMMAND: Command = Command {
        name: "PING",
        arity: -1,
        arguments: &[Argument::new("message", ArgumentKind::String)
            .at(1)
            .optional()],
        pubsub_context: true,
        handler: run::<Ping>,
    };
}

impl Executable for Ping {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        if session.is_subscribed() {
            let payload = self.payload.unwrap_or_default();
            return Ok(CommandOutput::Reply(Frame::bulk_array([
                Bytes::from("pong"),
                payload,
            ])));
        }

        let res = self
            .payload
            .map_or(Frame::Simple("PONG".to_string()), Frame::Bulk);

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = if parser.remaining() > 0 {
            Some(parser.next_bytes()?)
        } else {
            None
        };

        Ok(Self { payload })
    }
}
