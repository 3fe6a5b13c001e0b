use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::{FrameCodec, ProtocolError, DEFAULT_MAX_FRAME_SIZE};
use crate::commands::{
    map_to_command_events, split_invocations, CommandError, CommandEvent, CommandOutput,
    CommandParser, CommandParserError, Registry, Session,
};
use crate::connection::{Connection, ConnectionId, Transport};
use crate::event_loop::{EventLoop, LoopEvent};
use crate::frame::{Frame, Node};
use crate::pubsub::{Outbox, PubSub};
use crate::store::Store;

/// A readiness wait registered by a parked connection. Resolves to `None` when it was cancelled.
pub type Wait = BoxFuture<'static, Option<ConnectionId>>;

/// Everything the event handlers operate on. Built once per server and owned by its event loop
/// driver.
pub struct Context {
    pub registry: Registry,
    pub store: Store,
    pub pubsub: PubSub,
    connections: HashMap<ConnectionId, Connection>,
    waits: Vec<Wait>,
    max_frame_size: usize,
}

impl Context {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            registry: Registry::default(),
            store: Store::new(),
            pubsub: PubSub::new(),
            connections: HashMap::new(),
            waits: Vec::new(),
            max_frame_size,
        }
    }

    /// Registers a new connection and schedules its first poll.
    pub fn accept(
        &mut self,
        id: ConnectionId,
        transport: Box<dyn Transport>,
        events: &mut EventLoop<Context>,
    ) {
        let codec = FrameCodec::new(self.max_frame_size);
        let connection = Connection::new(id.clone(), transport, codec);

        if let Some(mut previous) = self.connections.insert(id.clone(), connection) {
            self.pubsub.remove_connection(&previous);
            previous.close();
        }

        events.enqueue(LoopEvent::deferred("poll", id, poll_connection));
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The pub/sub manager together with one connection, for operations that update both sides
    /// of a subscription.
    pub fn subscriptions(&mut self, id: &ConnectionId) -> Option<(&mut PubSub, &mut Connection)> {
        let connection = self.connections.get_mut(id)?;
        Some((&mut self.pubsub, connection))
    }

    /// Removes a connection, unregisters it from pub/sub and closes its transport.
    pub fn disconnect(&mut self, id: &ConnectionId) -> Option<Connection> {
        let mut connection = self.connections.remove(id)?;

        self.pubsub.remove_connection(&connection);
        connection.close();

        info!(connection = %id, "Connection closed");
        Some(connection)
    }

    fn park(&mut self, id: &ConnectionId) {
        if let Some(connection) = self.connections.get_mut(id) {
            trace!(connection = %id, "parked");
            self.waits.push(connection.park());
        }
    }

    /// Resumes polling a parked connection whose wait fired.
    pub fn wake(&mut self, id: ConnectionId, events: &mut EventLoop<Context>) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };

        connection.unpark();
        events.enqueue(LoopEvent::deferred("poll", id, poll_connection));
    }

    /// Readiness waits registered since the last call.
    pub fn take_waits(&mut self) -> Vec<Wait> {
        std::mem::take(&mut self.waits)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[derive(Debug)]
struct Output {
    connection: ConnectionId,
    frame: Frame,
}

/// Schedules `frame` to be written to a connection. The write happens in its own loop event; if
/// the connection is gone or closed by then, the frame is dropped.
pub fn schedule_output(events: &mut EventLoop<Context>, connection: &ConnectionId, frame: Frame) {
    let output = Output {
        connection: connection.clone(),
        frame,
    };
    events.enqueue(LoopEvent::deferred("output", output, deliver_output));
}

impl Outbox for EventLoop<Context> {
    fn deliver(&mut self, connection: &ConnectionId, frame: Frame) {
        schedule_output(self, connection, frame);
    }
}

enum Poll {
    Gone,
    Closed,
    Draining,
    Eof,
    Idle,
    Nodes(Vec<Node>),
    Failed(ProtocolError),
}

#[instrument(name = "poll", skip_all, fields(connection = %id))]
fn poll_connection(id: ConnectionId, ctx: &mut Context, events: &mut EventLoop<Context>) {
    let poll = match ctx.connections.get_mut(&id) {
        None => Poll::Gone,
        Some(connection) if connection.is_closed() => Poll::Closed,
        Some(connection) if connection.is_closing() => Poll::Draining,
        Some(connection) => match connection.flush().map_err(ProtocolError::from) {
            Err(e) => Poll::Failed(e),
            Ok(()) => match connection.read_nodes() {
                Ok(Some(nodes)) => Poll::Nodes(nodes),
                Ok(None) if connection.is_closed() => Poll::Closed,
                Ok(None) if connection.is_eof() => Poll::Eof,
                Ok(None) => Poll::Idle,
                Err(e) => Poll::Failed(e),
            },
        },
    };

    match poll {
        Poll::Gone => {}
        Poll::Closed => {
            ctx.disconnect(&id);
        }
        Poll::Draining => events.enqueue(LoopEvent::new("close", id, close_connection)),
        Poll::Eof => {
            // Replies to what was read before end of stream are queued ahead of the close.
            debug!("Peer stopped sending");
            events.enqueue(LoopEvent::new("close", id, close_connection));
        }
        Poll::Idle => ctx.park(&id),
        Poll::Nodes(nodes) => {
            dispatch(ctx, events, &id, nodes);
            events.enqueue(LoopEvent::deferred("poll", id, poll_connection));
        }
        Poll::Failed(ProtocolError::Io(e)) => {
            warn!("I/O error: {}", e);
            ctx.disconnect(&id);
        }
        Poll::Failed(e) => {
            warn!("Protocol error: {}", e);
            if let Some(connection) = ctx.connections.get_mut(&id) {
                connection.discard_input();
            }
            schedule_output(events, &id, Frame::Error(format!("ERR Protocol error: {}", e)));
            events.enqueue(LoopEvent::new("close", id, close_connection));
        }
    }
}

/// Turns a decoded batch into command events, in order. A sequence that does not start with a
/// command is answered with an error in its place.
fn dispatch(
    ctx: &mut Context,
    events: &mut EventLoop<Context>,
    id: &ConnectionId,
    nodes: Vec<Node>,
) {
    debug!(nodes = nodes.len(), "Received frames");

    for sequence in split_invocations(nodes) {
        match map_to_command_events(&ctx.registry, sequence, id) {
            Ok(commands) => {
                for command in commands {
                    events.enqueue(LoopEvent::new("command", command, execute_command));
                }
            }
            Err(e) => {
                let reply = Output {
                    connection: id.clone(),
                    frame: CommandError::from(e).into(),
                };
                events.enqueue(LoopEvent::new("reject", reply, reject_command));
            }
        }
    }
}

fn reject_command(reply: Output, _ctx: &mut Context, events: &mut EventLoop<Context>) {
    schedule_output(events, &reply.connection, reply.frame);
}

#[instrument(name = "command", skip_all, fields(connection = %event.source, command = event.name))]
fn execute_command(event: CommandEvent, ctx: &mut Context, events: &mut EventLoop<Context>) {
    let Some(connection) = ctx.connections.get(&event.source) else {
        return;
    };
    let subscribed = connection.is_subscribed();

    let Some(&command) = ctx.registry.lookup(event.name) else {
        let err = CommandError::UnknownCommand {
            command: event.name.to_string(),
        };
        schedule_output(events, &event.source, err.into());
        return;
    };

    let name = command.name.to_lowercase();
    let argc = event.args.len() + 1;

    let output = if !command.accepts(argc) {
        Err(CommandError::WrongArity { command: name })
    } else if subscribed && !command.pubsub_context {
        Err(CommandError::NotAllowedInSubscriptionMode { command: name })
    } else {
        let mut parser = CommandParser::new(event.args);
        let mut session = Session {
            connection: &event.source,
            context: &mut *ctx,
            events: &mut *events,
        };

        debug!(argc, "Executing command");
        (command.handler)(&mut parser, &mut session).map_err(|e| match e {
            CommandError::Parser(
                CommandParserError::EndOfStream | CommandParserError::UnexpectedArgument { .. },
            ) => CommandError::WrongArity { command: name },
            e => e,
        })
    };

    match output {
        Ok(CommandOutput::Reply(frame)) => schedule_output(events, &event.source, frame),
        Ok(CommandOutput::Deferred) => {}
        Ok(CommandOutput::Close(frame)) => {
            schedule_output(events, &event.source, frame);
            events.enqueue(LoopEvent::new("close", event.source, close_connection));
        }
        Err(e) => {
            debug!("Command failed: {}", e);
            schedule_output(events, &event.source, e.into());
        }
    }
}

fn deliver_output(output: Output, ctx: &mut Context, _events: &mut EventLoop<Context>) {
    let Some(connection) = ctx.connections.get_mut(&output.connection) else {
        return;
    };
    if connection.is_closed() {
        return;
    }

    trace!(connection = %output.connection, frame = %output.frame, "write");
    if let Err(e) = connection.write_frame(&output.frame) {
        warn!(connection = %output.connection, "I/O error: {}", e);
        ctx.disconnect(&output.connection);
        return;
    }

    // A parked connection only waits for input; make it wait for the socket to drain too.
    if connection.has_pending_output() && connection.is_parked() {
        ctx.park(&output.connection);
    }
}

/// Flushes what is left for the connection and closes it. Output the transport cannot take yet
/// keeps the connection around, parked on writability, until it drains.
fn close_connection(id: ConnectionId, ctx: &mut Context, _events: &mut EventLoop<Context>) {
    let Some(connection) = ctx.connections.get_mut(&id) else {
        return;
    };

    match connection.flush() {
        Ok(()) if connection.has_pending_output() => {
            trace!(connection = %id, "Draining output before close");
            connection.start_closing();
            ctx.park(&id);
            return;
        }
        Ok(()) => {}
        Err(e) => warn!(connection = %id, "Dropping unsent output: {}", e),
    }

    ctx.disconnect(&id);
}

/// Drops the pub/sub channels nobody subscribes to.
pub fn purge_channels(_: (), ctx: &mut Context, _events: &mut EventLoop<Context>) {
    ctx.pubsub.purge_idle_channels();
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::Bytes;

    use super::*;
    use crate::codec::decode;
    use crate::commands::Executable;
    use crate::connection::{MemoryHandle, MemoryTransport};
    use crate::pubsub::SubscriptionKind;

    /// A context with one in-memory client connection, driven by hand.
    pub struct Harness {
        pub context: Context,
        pub events: EventLoop<Context>,
        pub id: ConnectionId,
        pub handle: MemoryHandle,
    }

    impl Harness {
        pub fn new() -> Self {
            let mut context = Context::default();
            let mut events = EventLoop::new();

            let id = ConnectionId::from("127.0.0.1:6000");
            let (transport, handle) = MemoryTransport::pair();
            context.accept(id.clone(), Box::new(transport), &mut events);
            events.run(&mut context);

            Self {
                context,
                events,
                id,
                handle,
            }
        }

        pub fn connect(&mut self, id: &str) -> (ConnectionId, MemoryHandle) {
            let id = ConnectionId::from(id);
            let (transport, handle) = MemoryTransport::pair();
            self.context
                .accept(id.clone(), Box::new(transport), &mut self.events);
            self.run();
            (id, handle)
        }

        pub fn exec<T: Executable>(&mut self, command: T) -> Result<CommandOutput, CommandError> {
            let id = self.id.clone();
            self.exec_as(&id, command)
        }

        pub fn exec_as<T: Executable>(
            &mut self,
            id: &ConnectionId,
            command: T,
        ) -> Result<CommandOutput, CommandError> {
            let mut session = Session {
                connection: id,
                context: &mut self.context,
                events: &mut self.events,
            };
            command.exec(&mut session)
        }

        pub fn subscribe(&mut self, name: &str, kind: SubscriptionKind) {
            let id = self.id.clone();
            self.subscribe_as(&id, name, kind);
        }

        pub fn subscribe_as(&mut self, id: &ConnectionId, name: &str, kind: SubscriptionKind) {
            let (pubsub, connection) = self.context.subscriptions(id).unwrap();
            pubsub.subscribe(name, connection, kind, &mut self.events);
        }

        pub fn run(&mut self) -> usize {
            self.events.run(&mut self.context)
        }

        /// Feeds raw input to the client connection and runs the loop until it is idle.
        pub fn send(&mut self, data: &'static [u8]) -> Vec<Frame> {
            self.handle.send(Bytes::from_static(data));
            self.context.take_waits();
            self.context.wake(self.id.clone(), &mut self.events);
            self.run();
            self.output()
        }

        /// Frames written to the client connection since the last call.
        pub fn output(&mut self) -> Vec<Frame> {
            Self::frames(self.handle.take_output())
        }

        pub fn frames(output: Bytes) -> Vec<Frame> {
            decode(&output)
                .unwrap()
                .iter()
                .map(Frame::from)
                .collect()
        }
    }
}
