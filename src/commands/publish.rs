use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Posts a message to the given channel.
///
/// Replies with the number of deliveries, which counts a client once per matching subscription.
///
/// Ref: <https://redis.io/docs/latest/commands/publish/>
#[derive(Debug, PartialEq)]
pub struct Publish {
    pub channel: String,
    pub message: Bytes,
}

impl Publish {
    pub const COMMAND: Command = Command {
        name: "PUBLISH",
        arity: 3,
        arguments: &[
            Argument::new("channel", ArgumentKind::Channel).at(1),
            Argument::new("message", ArgumentKind::String).at(2),
        ],
        pubsub_context: false,
        handler: run::<Publish>,
    };
}

impl Executable for Publish {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let deliveries =
            session
                .context
                .pubsub
                .publish(&self.channel, self.message, &mut *session.events);

        Ok(CommandOutput::Reply(Frame::Integer(deliveries as i64)))
    }
}

impl TryFrom<&mut CommandParser> for Publish {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channel = parser.next_string()?;
        let message = parser.next_bytes()?;

        Ok(Self { channel, message })
    }
}
