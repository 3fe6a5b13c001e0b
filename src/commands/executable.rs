use crate::commands::CommandError;
use crate::connection::{Connection, ConnectionId};
use crate::context::{schedule_output, Context};
use crate::event_loop::EventLoop;
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutput {
    /// A reply to schedule for the calling connection.
    Reply(Frame),
    /// The command already scheduled everything it had to send.
    Deferred,
    /// A final reply, after which the connection is closed.
    Close(Frame),
}

/// What a command runs against: the calling connection, the server context, and the event loop
/// for anything it needs to schedule.
pub struct Session<'a> {
    pub connection: &'a ConnectionId,
    pub context: &'a mut Context,
    pub events: &'a mut EventLoop<Context>,
}

impl<'a> Session<'a> {
    pub fn connection(&mut self) -> Result<&mut Connection, CommandError> {
        self.context
            .connection_mut(self.connection)
            .ok_or(CommandError::UnknownConnection)
    }

    pub fn is_subscribed(&self) -> bool {
        self.context
            .connection(self.connection)
            .map_or(false, Connection::is_subscribed)
    }

    /// Schedules `frame` for delivery to the calling connection.
    pub fn schedule(&mut self, frame: Frame) {
        schedule_output(self.events, self.connection, frame);
    }
}

pub trait Executable {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError>;
}
