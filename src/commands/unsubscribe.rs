use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::pubsub::SubscriptionKind;

/// Unsubscribes the client from the given channels, or from all of them if none is given.
///
/// Fails when the client is not subscribed to anything.
///
/// Ref: <https://redis.io/docs/latest/commands/unsubscribe/>
#[derive(Debug, PartialEq)]
pub struct Unsubscribe {
    pub channels: Vec<String>,
}

impl Unsubscribe {
    pub const COMMAND: Command = Command {
        name: "UNSUBSCRIBE",
        arity: -1,
        arguments: &[Argument::new("channel", ArgumentKind::Channel)
            .at(1)
            .optional()
            .multiple()],
        pubsub_context: true,
        handler: run::<Unsubscribe>,
    };
}

impl Executable for Unsubscribe {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let (pubsub, connection) = session
            .context
            .subscriptions(session.connection)
            .ok_or(CommandError::UnknownConnection)?;

        let kind = SubscriptionKind::Channel;
        if self.channels.is_empty() {
            pubsub.unsubscribe_all(connection, kind, &mut *session.events)?;
        } else {
            pubsub.unsubscribe_many(&self.channels, connection, kind, &mut *session.events)?;
        }

        Ok(CommandOutput::Deferred)
    }
}

impl TryFrom<&mut CommandParser> for Unsubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channels = parser.remaining_strings()?;
        Ok(Self { channels })
    }
}
