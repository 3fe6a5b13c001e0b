use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Asks the server to close the connection, once the `OK` reply is written.
///
/// Ref: <https://redis.io/docs/latest/commands/quit/>
#[derive(Debug, PartialEq)]
pub struct Quit;

impl Quit {
    pub const COMMAND: Command = Command {
        name: "QUIT",
        arity: -1,
        arguments: &[],
        pubsub_context: true,
        handler: run::<Quit>,
    };
}

impl Executable for Quit {
    fn exec(self, _session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput::Close(Frame::Simple("OK".to_string())))
    }
}

impl TryFrom<&mut CommandParser> for Quit {
    type Error = CommandError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
