use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Connection management.
///
/// Ref: <https://redis.io/docs/latest/commands/client/>
#[derive(Debug, PartialEq)]
pub enum Client {
    SetName { name: String },
    GetName,
    /// Client library metadata. Accepted and ignored.
    SetInfo { attribute: String, value: String },
}

impl Client {
    pub const COMMAND: Command = Command {
        name: "CLIENT",
        arity: -2,
        arguments: &[
            Argument::new("subcommand", ArgumentKind::Token).at(1),
            Argument::new("argument", ArgumentKind::String)
                .optional()
                .multiple(),
        ],
        pubsub_context: false,
        handler: run::<Client>,
    };
}

impl Executable for Client {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let connection = session.connection()?;

        let res = match self {
            Client::SetName { name } => {
                // An empty name clears it.
                connection.name = Some(name).filter(|n| !n.is_empty());
                Frame::Simple("OK".to_string())
            }
            Client::GetName => connection
                .name
                .clone()
                .map_or(Frame::Null, |name| Frame::Bulk(Bytes::from(name))),
            Client::SetInfo { .. } => Frame::Simple("OK".to_string()),
        };

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Client {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let subcommand = parser.next_string()?;

        match subcommand.to_uppercase().as_str() {
            "SETNAME" => {
                let name = parser.next_string()?;
                if name.contains(' ') {
                    return Err(CommandError::Syntax);
                }
                Ok(Client::SetName { name })
            }
            "GETNAME" => Ok(Client::GetName),
            "SETINFO" => {
                let attribute = parser.next_string()?;
                let value = parser.next_string()?;
                Ok(Client::SetInfo { attribute, value })
            }
            _ => Err(CommandError::UnknownSubcommand {
                command: "CLIENT".to_string(),
                subcommand,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::Harness;

    fn parse(args: &[&'static str]) -> Result<Client, CommandError> {
        let frames = args.iter().map(|a| Frame::Bulk(Bytes::from(*a))).collect();
        Client::try_from(&mut CommandParser::new(frames))
    }

    #[test]
    fn set_and_get_name() {
        let mut harness = Harness::new();

        assert_eq!(
            harness.exec(parse(&["getname"]).unwrap()),
            Ok(CommandOutput::Reply(Frame::Null))
        );
        assert_eq!(
            harness.exec(parse(&["SETNAME", "worker-1"]).unwrap()),
            Ok(CommandOutput::Reply(Frame::Simple("OK".to_string())))
        );
        assert_eq!(
            harness.exec(parse(&["getname"]).unwrap()),
            Ok(CommandOutput::Reply(Frame::Bulk(Bytes::from("worker-1"))))
        );
    }

    #[test]
    fn name_with_spaces() {
        assert_eq!(parse(&["setname", "a b"]), Err(CommandError::Syntax));
    }

    #[test]
    fn setinfo_is_accepted() {
        let mut harness = Harness::new();

        assert_eq!(
            harness.exec(parse(&["setinfo", "lib-name", "redis-rs"]).unwrap()),
            Ok(CommandOutput::Reply(Frame::Simple("OK".to_string())))
        );
    }
}
