use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use strum_macros::AsRefStr;

use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::{CommandError, CommandParser};

use crate::commands::client::Client;
use crate::commands::command::Command as Command_;
use crate::commands::echo::Echo;
use crate::commands::get::Get;
use crate::commands::ping::Ping;
use crate::commands::psubscribe::Psubscribe;
use crate::commands::publish::Publish;
use crate::commands::pubsub::Pubsub;
use crate::commands::punsubscribe::Punsubscribe;
use crate::commands::quit::Quit;
use crate::commands::set::Set;
use crate::commands::subscribe::Subscribe;
use crate::commands::unsubscribe::Unsubscribe;

pub type Handler =
    fn(&mut CommandParser, &mut Session<'_>) -> Result<CommandOutput, CommandError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ArgumentKind {
    String,
    Key,
    Integer,
    Channel,
    Pattern,
    /// A literal keyword such as `NX` or `COUNT`.
    Token,
}

/// Describes one argument of a command, as reported by `COMMAND`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Argument {
    pub name: &'static str,
    pub kind: ArgumentKind,
    /// Position in the invocation, the command name being 0. `None` for arguments that may show
    /// up anywhere after the fixed ones.
    pub position: Option<usize>,
    pub optional: bool,
    pub multiple: bool,
}

impl Argument {
    pub const fn new(name: &'static str, kind: ArgumentKind) -> Self {
        Self {
            name,
            kind,
            position: None,
            optional: false,
            multiple: false,
        }
    }

    pub const fn at(self, position: usize) -> Self {
        Self {
            position: Some(position),
            ..self
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            optional: true,
            ..self
        }
    }

    pub const fn multiple(self) -> Self {
        Self {
            multiple: true,
            ..self
        }
    }
}

/// A registered command.
///
/// `arity` counts the command name itself: a positive arity is an exact argument count, a negative
/// one a minimum.
#[derive(Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub arity: i32,
    pub arguments: &'static [Argument],
    /// Whether the command may run while the connection is in subscription mode.
    pub pubsub_context: bool,
    pub handler: Handler,
}

impl Command {
    pub fn accepts(&self, argc: usize) -> bool {
        let arity = self.arity.unsigned_abs() as usize;

        if self.arity < 0 {
            argc >= arity
        } else {
            argc == arity
        }
    }

    /// Positions of the key arguments, as `(first, last, step)`. All zeros when the command takes
    /// no keys.
    pub fn key_positions(&self) -> (usize, usize, usize) {
        let keys = self
            .arguments
            .iter()
            .filter(|a| a.kind == ArgumentKind::Key)
            .filter_map(|a| a.position)
            .collect_vec();

        match (keys.first(), keys.last()) {
            (Some(&first), Some(&last)) => (first, last, 1),
            _ => (0, 0, 0),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("arguments", &self.arguments)
            .field("pubsub_context", &self.pubsub_context)
            .finish()
    }
}

/// Parses the arguments into `T` and runs it. Every registered command goes through here.
pub(crate) fn run<T>(
    parser: &mut CommandParser,
    session: &mut Session<'_>,
) -> Result<CommandOutput, CommandError>
where
    T: Executable + for<'p> TryFrom<&'p mut CommandParser, Error = CommandError>,
{
    let command = T::try_from(&mut *parser)?;
    parser.finish()?;

    command.exec(session)
}

/// The table of known commands, keyed by upper-case name. Built once and read only afterwards.
pub struct Registry {
    commands: HashMap<&'static str, Command>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register(&mut self, command: Command) {
        self.commands.insert(command.name, command);
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<&Command> {
        self.commands.get(name.to_ascii_uppercase().as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Commands in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.values().sorted_by_key(|c| c.name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();

        for command in [
            Client::COMMAND,
            Command_::COMMAND,
            Echo::COMMAND,
            Get::COMMAND,
            Ping::COMMAND,
            Psubscribe::COMMAND,
            Publish::COMMAND,
            Pubsub::COMMAND,
            Punsubscribe::COMMAND,
            Quit::COMMAND,
            Set::COMMAND,
            Subscribe::COMMAND,
            Unsubscribe::COMMAND,
        ] {
            registry.register(command);
        }

        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|c| c.name)).finish()
    }
}
