use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::pubsub::SubscriptionKind;

/// Subscribes the client to the given glob-style patterns.
///
/// Ref: <https://redis.io/docs/latest/commands/psubscribe/>
#[derive(Debug, PartialEq)]
pub struct Psubscribe {
    pub patterns: Vec<String>,
}

impl Psubscribe {
    pub const COMMAND: Command = Command {
        name: "PSUBSCRIBE",
        arity: -2,
        arguments: &[Argument::new("pattern", ArgumentKind::Pattern)
            .at(1)
            .multiple()],
        pubsub_context: true,
        handler: run::<Psubscribe>,
    };
}

impl Executable for Psubscribe {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let (pubsub, connection) = session
            .context
            .subscriptions(session.connection)
            .ok_or(CommandError::UnknownConnection)?;

        for pattern in self.patterns {
            pubsub.subscribe(
                &pattern,
                connection,
                SubscriptionKind::Pattern,
                &mut *session.events,
            );
        }

        Ok(CommandOutput::Deferred)
    }
}

impl TryFrom<&mut CommandParser> for Psubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let patterns = parser.remaining_strings()?;
        Ok(Self { patterns })
    }
}
