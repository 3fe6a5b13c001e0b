use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Introspection of the pub/sub subsystem.
///
/// Ref: <https://redis.io/docs/latest/commands/pubsub/>
#[derive(Debug, PartialEq)]
pub enum Pubsub {
    /// Active channels, those with at least one subscriber, optionally matching a pattern.
    Channels { pattern: Option<String> },
    /// Subscriber counts of the given channels. Pattern subscribers are not counted.
    Numsub { channels: Vec<String> },
    /// Number of unique patterns subscribed to.
    Numpat,
}

impl Pubsub {
    pub const COMMAND: Command = Command {
        name: "PUBSUB",
        arity: -2,
        arguments: &[
            Argument::new("subcommand", ArgumentKind::Token).at(1),
            Argument::new("argument", ArgumentKind::String)
                .optional()
                .multiple(),
        ],
        pubsub_context: false,
        handler: run::<Pubsub>,
    };
}

impl Executable for Pubsub {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let pubsub = &session.context.pubsub;

        let res = match self {
            Pubsub::Channels { pattern } => {
                Frame::bulk_array(pubsub.channels(pattern.as_deref()))
            }
            Pubsub::Numsub { channels } => {
                let mut frames = Vec::with_capacity(channels.len() * 2);
                for channel in channels {
                    let count = pubsub.subscriber_count(&channel);
                    frames.push(Frame::Bulk(Bytes::from(channel)));
                    frames.push(Frame::Integer(count as i64));
                }
                Frame::Array(frames)
            }
            Pubsub::Numpat => Frame::Integer(pubsub.pattern_count() as i64),
        };

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Pubsub {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let subcommand = parser.next_string()?;

        match subcommand.to_uppercase().as_str() {
            "CHANNELS" => {
                let pattern = parser.next_optional_string()?;
                Ok(Pubsub::Channels { pattern })
            }
            "NUMSUB" => {
                let channels = parser.remaining_strings()?;
                Ok(Pubsub::Numsub { channels })
            }
            "NUMPAT" => Ok(Pubsub::Numpat),
            _ => Err(CommandError::UnknownSubcommand {
                command: "PUBSUB".to_string(),
                subcommand,
            }),
        }
    }
}
