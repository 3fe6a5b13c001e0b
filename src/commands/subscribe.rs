use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::pubsub::SubscriptionKind;

/// Subscribes the client to the specified channels.
///
/// Each channel is confirmed with a `["subscribe", channel, count]` message, where `count` is the
/// number of channels and patterns the client is subscribed to.
///
/// Ref: <https://redis.io/docs/latest/commands/subscribe/>
#[derive(Debug, PartialEq)]
pub struct Subscribe {
    pub channels: Vec<String>,
}

impl Subscribe {
    pub const COMMAND: Command = Command {
        name: "SUBSCRIBE",
        arity: -2,
        arguments: &[Argument::new("channel", ArgumentKind::Channel)
            .at(1)
            .multiple()],
        pubsub_context: true,
        handler: run::<Subscribe>,
    };
}

impl Executable for Subscribe {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let (pubsub, connection) = session
            .context
            .subscriptions(session.connection)
            .ok_or(CommandError::UnknownConnection)?;

        for channel in self.channels {
            pubsub.subscribe(
                &channel,
                connection,
                SubscriptionKind::Channel,
                &mut *session.events,
            );
        }

        Ok(CommandOutput::Deferred)
    }
}

impl TryFrom<&mut CommandParser> for Subscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channels = parser.remaining_strings()?;
        Ok(Self { channels })
    }
}
