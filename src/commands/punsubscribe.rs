use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::pubsub::SubscriptionKind;

/// Unsubscribes the client from the given patterns, or from all of them if none is given.
///
/// Ref: <https://redis.io/docs/latest/commands/punsubscribe/>
#[derive(Debug, PartialEq)]
pub struct Punsubscribe {
    pub patterns: Vec<String>,
}

impl Punsubscribe {
    pub const COMMAND: Command = Command {
        name: "PUNSUBSCRIBE",
        arity: -1,
        arguments: &[Argument::new("pattern", ArgumentKind::Pattern)
            .at(1)
            .optional()
            .multiple()],
        pubsub_context: true,
        handler: run::<Punsubscribe>,
    };
}

impl Executable for Punsubscribe {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let (pubsub, connection) = session
            .context
            .subscriptions(session.connection)
            .ok_or(CommandError::UnknownConnection)?;

        let kind = SubscriptionKind::Pattern;
        if self.patterns.is_empty() {
            pubsub.unsubscribe_all(connection, kind, &mut *session.events)?;
        } else {
            pubsub.unsubscribe_many(&self.patterns, connection, kind, &mut *session.events)?;
        }

        Ok(CommandOutput::Deferred)
    }
}

impl TryFrom<&mut CommandParser> for Punsubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let patterns = parser.remaining_strings()?;
        Ok(Self { patterns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::Harness;
    use crate::pubsub::Notice;

    #[test]
    fn punsubscribe_detaches_pattern() {
        let mut harness = Harness::new();
        harness.subscribe("news", SubscriptionKind::Channel);
        harness.subscribe("n*", SubscriptionKind::Pattern);
        harness.run();
        harness.output();

        let reply = harness.exec(Punsubscribe {
            patterns: vec!["n*".to_string()],
        });

        assert_eq!(reply, Ok(CommandOutput::Deferred));
        harness.run();
        assert_eq!(
            harness.output(),
            vec![Notice::Punsubscribe.confirmation(Some("n*"), 1)]
        );
        assert_eq!(harness.context.pubsub.pattern_count(), 0);
    }

    #[test]
    fn punsubscribe_all_without_patterns() {
        let mut harness = Harness::new();
        harness.subscribe("news", SubscriptionKind::Channel);
        harness.run();
        harness.output();

        harness.exec(Punsubscribe { patterns: vec![] }).unwrap();

        harness.run();
        assert_eq!(
            harness.output(),
            vec![Notice::Punsubscribe.confirmation(None, 1)]
        );
    }

    #[test]
    fn punsubscribe_several_patterns_down_to_zero() {
        let mut harness = Harness::new();
        harness.subscribe("n*", SubscriptionKind::Pattern);
        harness.run();
        harness.output();

        let reply = harness.exec(Punsubscribe {
            patterns: vec!["n*".to_string(), "s*".to_string()],
        });

        assert_eq!(reply, Ok(CommandOutput::Deferred));
        harness.run();
        assert_eq!(
            harness.output(),
            vec![
                Notice::Punsubscribe.confirmation(Some("n*"), 0),
                Notice::Punsubscribe.confirmation(Some("s*"), 0),
            ]
        );
    }
}
