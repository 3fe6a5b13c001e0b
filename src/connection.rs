use bytes::{Buf, Bytes, BytesMut};
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::FutureExt;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::codec::Decoder;

use crate::codec::{FrameCodec, ProtocolError};
use crate::frame::{Frame, Node};
use crate::pubsub::PubSubError;

/// Identifies a client connection. Derived from the peer address, so it is unique among live
/// connections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The byte stream under a [`Connection`]. Every operation is non-blocking.
pub trait Transport: Send {
    /// Reads the bytes that are available right now. `Ok(None)` means nothing is available; a
    /// transport whose peer stopped sending reports it through [`Transport::is_eof`].
    fn read(&mut self) -> io::Result<Option<Bytes>>;

    /// Queues `data` and writes as much of it as the transport accepts without blocking.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        false
    }

    /// Whether the peer half-closed its side. Output can still be written until the transport
    /// is closed.
    fn is_eof(&self) -> bool;

    fn is_closed(&self) -> bool;

    fn close(&mut self);

    /// Resolves once the transport may be ready for `interest`. Spurious wake ups are allowed.
    fn ready(&self, _interest: Interest) -> BoxFuture<'static, ()> {
        futures::future::pending().boxed()
    }
}

pub struct TcpTransport {
    stream: Option<Arc<TcpStream>>,
    // Output the socket did not accept yet.
    pending: BytesMut,
    eof: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(Arc::new(stream)),
            pending: BytesMut::new(),
            eof: false,
        }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self) -> io::Result<Option<Bytes>> {
        let Some(stream) = &self.stream else {
            return Ok(None);
        };
        if self.eof {
            return Ok(None);
        }

        // Allocate the buffer with 4kb of capacity.
        let mut buf = BytesMut::with_capacity(4096);
        match stream.try_read_buf(&mut buf) {
            Ok(0) => {
                self.eof = true;
                Ok(None)
            }
            Ok(_) => Ok(Some(buf.freeze())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        self.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = &self.stream else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        while !self.pending.is_empty() {
            match stream.try_write(&self.pending) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        !self.pending.is_empty()
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
    }

    fn ready(&self, interest: Interest) -> BoxFuture<'static, ()> {
        match &self.stream {
            Some(stream) => {
                let stream = stream.clone();
                async move {
                    let _ = stream.ready(interest).await;
                }
                .boxed()
            }
            None => futures::future::pending().boxed(),
        }
    }
}

#[derive(Debug, Default)]
struct Pipe {
    inbound: VecDeque<Bytes>,
    outbound: BytesMut,
    eof: bool,
    // The transport read past the last queued input after `eof` was signalled.
    eof_read: bool,
    closed: bool,
}

/// An in-memory transport, driven from the other end by a [`MemoryHandle`].
pub struct MemoryTransport {
    pipe: Arc<Mutex<Pipe>>,
    notify: Arc<Notify>,
}

/// The peer side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryHandle {
    pipe: Arc<Mutex<Pipe>>,
    notify: Arc<Notify>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryHandle) {
        let pipe = Arc::new(Mutex::new(Pipe::default()));
        let notify = Arc::new(Notify::new());

        let transport = MemoryTransport {
            pipe: pipe.clone(),
            notify: notify.clone(),
        };
        (transport, MemoryHandle { pipe, notify })
    }

    fn pipe(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self) -> io::Result<Option<Bytes>> {
        let mut pipe = self.pipe();
        if pipe.closed {
            return Ok(None);
        }

        match pipe.inbound.pop_front() {
            Some(data) => Ok(Some(data)),
            None => {
                if pipe.eof {
                    pipe.eof_read = true;
                }
                Ok(None)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut pipe = self.pipe();
        if pipe.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }

        pipe.outbound.extend_from_slice(data);
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.pipe().eof_read
    }

    fn is_closed(&self) -> bool {
        self.pipe().closed
    }

    fn close(&mut self) {
        self.pipe().closed = true;
    }

    fn ready(&self, _interest: Interest) -> BoxFuture<'static, ()> {
        let notify = self.notify.clone();
        async move { notify.notified().await }.boxed()
    }
}

impl MemoryHandle {
    fn pipe(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `data` available to the next read on the transport.
    pub fn send(&self, data: impl Into<Bytes>) {
        self.pipe().inbound.push_back(data.into());
        self.notify.notify_one();
    }

    /// Signals end of stream once the queued input has been read.
    pub fn shutdown(&self) {
        self.pipe().eof = true;
        self.notify.notify_one();
    }

    /// Takes everything written to the transport so far.
    pub fn take_output(&self) -> Bytes {
        self.pipe().outbound.split().freeze()
    }

    pub fn is_closed(&self) -> bool {
        self.pipe().closed
    }
}

/// A client connection: its transport, the bytes received but not decoded yet, and the reverse
/// index of its pub/sub subscriptions.
pub struct Connection {
    pub id: ConnectionId,
    pub name: Option<String>,
    transport: Box<dyn Transport>,
    // Data is read from the transport into the read buffer. When a frame is parsed, the
    // corresponding data is removed from the buffer.
    buffer: BytesMut,
    codec: FrameCodec,
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
    wait: Option<AbortHandle>,
    closing: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, transport: Box<dyn Transport>, codec: FrameCodec) -> Connection {
        Connection {
            id,
            name: None,
            transport,
            buffer: BytesMut::with_capacity(4096),
            codec,
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            wait: None,
            closing: false,
        }
    }

    /// Reads what the transport has available and decodes every complete frame.
    ///
    /// Returns `None` when no bytes were read. An incomplete trailing frame stays buffered until
    /// the rest of it arrives.
    pub fn read_nodes(&mut self) -> Result<Option<Vec<Node>>, ProtocolError> {
        let Some(data) = self.transport.read()? else {
            return Ok(None);
        };

        self.buffer.extend_from_slice(&data);

        let mut nodes = Vec::new();
        while let Some(node) = self.codec.decode(&mut self.buffer)? {
            nodes.push(node);
        }

        Ok(Some(nodes))
    }

    /// Drops everything buffered but not decoded yet.
    pub fn discard_input(&mut self) {
        self.buffer.clear();
    }

    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.transport.write(&frame.serialize())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }

    pub fn has_pending_output(&self) -> bool {
        self.transport.has_pending_output()
    }

    pub fn is_eof(&self) -> bool {
        self.transport.is_eof()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Whether the connection is only waiting for its pending output to drain before it closes.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn start_closing(&mut self) {
        self.closing = true;
    }

    pub fn close(&mut self) {
        if let Some(wait) = self.wait.take() {
            wait.abort();
        }
        self.transport.close();
    }

    /// Whether a readiness wait is outstanding for this connection.
    pub fn is_parked(&self) -> bool {
        self.wait.is_some()
    }

    /// Builds a future that resolves with the connection id once the transport has input, or can
    /// take pending output. Replaces any outstanding wait; a replaced wait resolves to `None`.
    pub fn park(&mut self) -> BoxFuture<'static, Option<ConnectionId>> {
        let interest = if self.closing || self.is_eof() {
            Interest::WRITABLE
        } else if self.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.wait.replace(handle) {
            previous.abort();
        }

        let id = self.id.clone();
        Abortable::new(self.transport.ready(interest), registration)
            .map(move |ready| ready.ok().map(|_| id))
            .boxed()
    }

    /// Marks the outstanding wait as fired.
    pub fn unpark(&mut self) {
        self.wait = None;
    }

    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty() || !self.patterns.is_empty()
    }

    /// Total number of channels and patterns this connection is subscribed to.
    pub fn subscription_count(&self) -> Result<usize, PubSubError> {
        if !self.is_subscribed() {
            return Err(PubSubError::NotInSubscriptionMode);
        }

        Ok(self.total_subscriptions())
    }

    pub(crate) fn total_subscriptions(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    pub fn channels(&self) -> impl Iterator<Item = &String> {
        self.channels.iter()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &String> {
        self.patterns.iter()
    }

    pub(crate) fn add_channel(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    pub(crate) fn remove_channel(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub(crate) fn add_pattern(&mut self, pattern: &str) -> bool {
        self.patterns.insert(pattern.to_string())
    }

    pub(crate) fn remove_pattern(&mut self, pattern: &str) -> bool {
        self.patterns.remove(pattern)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(wait) = self.wait.take() {
            wait.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("buffered", &self.buffer.len())
            .field("channels", &self.channels)
            .field("patterns", &self.patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Kind;

    fn memory_connection() -> (Connection, MemoryHandle) {
        let (transport, handle) = MemoryTransport::pair();
        let connection = Connection::new(
            ConnectionId::from("127.0.0.1:5000"),
            Box::new(transport),
            FrameCodec::default(),
        );
        (connection, handle)
    }

    #[test]
    fn read_nodes_without_input() {
        let (mut connection, _handle) = memory_connection();

        assert_eq!(connection.read_nodes().unwrap(), None);
    }

    #[test]
    fn read_nodes_across_chunks() {
        let (mut connection, handle) = memory_connection();

        handle.send("*1\r\n$4\r\nPI");
        assert_eq!(connection.read_nodes().unwrap(), Some(vec![]));

        handle.send("NG\r\n+PING\r\n");
        let nodes = connection.read_nodes().unwrap().unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, Kind::Array);
        assert_eq!(nodes[0].raw, Bytes::from("*1\r\n$4\r\nPING\r\n"));
        assert_eq!(nodes[1].as_str(), Some("PING"));
    }

    #[test]
    fn read_nodes_protocol_error() {
        let (mut connection, handle) = memory_connection();

        handle.send("?\r\n");

        assert_eq!(
            connection.read_nodes(),
            Err(ProtocolError::UnknownType {
                sigil: b'?',
                offset: 0
            })
        );
    }

    #[test]
    fn end_of_stream_leaves_the_transport_writable() {
        let (mut connection, handle) = memory_connection();

        handle.send("+PING\r\n");
        handle.shutdown();

        assert_eq!(connection.read_nodes().unwrap().map(|nodes| nodes.len()), Some(1));
        assert!(!connection.is_eof());

        assert_eq!(connection.read_nodes().unwrap(), None);
        assert!(connection.is_eof());
        assert!(!connection.is_closed());

        connection
            .write_frame(&Frame::Simple("PONG".to_string()))
            .unwrap();
        assert_eq!(handle.take_output(), Bytes::from("+PONG\r\n"));

        connection.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn write_frame() {
        let (mut connection, handle) = memory_connection();

        connection
            .write_frame(&Frame::Simple("PONG".to_string()))
            .unwrap();

        assert_eq!(handle.take_output(), Bytes::from("+PONG\r\n"));
    }

    #[test]
    fn subscription_count_outside_subscription_mode() {
        let (mut connection, _handle) = memory_connection();

        assert_eq!(
            connection.subscription_count(),
            Err(PubSubError::NotInSubscriptionMode)
        );

        assert!(connection.add_channel("news"));
        assert!(!connection.add_channel("news"));
        assert!(connection.add_pattern("n*"));

        assert_eq!(connection.subscription_count(), Ok(2));
    }

    #[tokio::test]
    async fn park_resolves_on_input() {
        let (mut connection, handle) = memory_connection();

        let wait = connection.park();
        assert!(connection.is_parked());

        handle.send("+PING\r\n");

        assert_eq!(wait.await, Some(connection.id.clone()));
    }

    #[tokio::test]
    async fn replaced_wait_resolves_to_none() {
        let (mut connection, _handle) = memory_connection();

        let first = connection.park();
        let _second = connection.park();

        assert_eq!(first.await, None);
    }

    #[tokio::test]
    async fn closing_aborts_the_wait() {
        let (mut connection, handle) = memory_connection();

        let wait = connection.park();
        connection.close();

        assert_eq!(wait.await, None);
        assert!(handle.is_closed());
    }
}
