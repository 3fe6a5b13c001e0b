use bytes::Bytes;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{self, run, Argument, ArgumentKind};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Details about the registered commands.
///
/// Ref: <https://redis.io/docs/latest/commands/command/>
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `[name, arity, flags, first key, last key, step]` for every command.
    Info,
    Count,
    List,
    /// Argument descriptions, as `[name, [arguments...]]` pairs.
    Docs { names: Vec<String> },
}

impl Command {
    pub const COMMAND: registry::Command = registry::Command {
        name: "COMMAND",
        arity: -1,
        arguments: &[
            Argument::new("subcommand", ArgumentKind::Token)
                .at(1)
                .optional(),
            Argument::new("command-name", ArgumentKind::String)
                .optional()
                .multiple(),
        ],
        pubsub_context: false,
        handler: run::<Command>,
    };
}

fn bulk(s: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

fn info(command: &registry::Command) -> Frame {
    let mut flags = Vec::new();
    if command.pubsub_context {
        flags.push(Frame::Simple("pubsub".to_string()));
    }

    let (first, last, step) = command.key_positions();

    Frame::Array(vec![
        bulk(&command.name.to_lowercase()),
        Frame::Integer(command.arity.into()),
        Frame::Array(flags),
        Frame::Integer(first as i64),
        Frame::Integer(last as i64),
        Frame::Integer(step as i64),
    ])
}

fn docs(command: &registry::Command) -> Frame {
    let arguments = command
        .arguments
        .iter()
        .map(|argument| {
            let mut fields = vec![
                bulk("name"),
                bulk(argument.name),
                bulk("type"),
                bulk(argument.kind.as_ref()),
            ];
            if argument.optional {
                fields.push(bulk("flags"));
                fields.push(Frame::Array(vec![Frame::Simple("optional".to_string())]));
            }
            if argument.multiple {
                fields.push(bulk("multiple"));
                fields.push(Frame::Integer(1));
            }
            Frame::Array(fields)
        })
        .collect();

    Frame::Array(vec![bulk("arguments"), Frame::Array(arguments)])
}

impl Executable for Command {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        let commands = &session.context.registry;

        let res = match self {
            Command::Info => Frame::Array(commands.iter().map(info).collect()),
            Command::Count => Frame::Integer(commands.len() as i64),
            Command::List => Frame::Array(
                commands
                    .iter()
                    .map(|c| bulk(&c.name.to_lowercase()))
                    .collect(),
            ),
            Command::Docs { names } => {
                let mut frames = Vec::new();
                let selected: Vec<&registry::Command> = if names.is_empty() {
                    commands.iter().collect()
                } else {
                    names.iter().filter_map(|n| commands.lookup(n)).collect()
                };
                for command in selected {
                    frames.push(bulk(&command.name.to_lowercase()));
                    frames.push(docs(command));
                }
                Frame::Array(frames)
            }
        };

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Command {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let Some(subcommand) = parser.next_optional_string()? else {
            return Ok(Command::Info);
        };

        match subcommand.to_uppercase().as_str() {
            "COUNT" => Ok(Command::Count),
            "LIST" => Ok(Command::List),
            "DOCS" => {
                let names = parser.remaining_strings()?;
                Ok(Command::Docs { names })
            }
            _ => Err(CommandError::UnknownSubcommand {
                command: "COMMAND".to_string(),
                subcommand,
            }),
        }
    }
}
