use std::mem;
use thiserror::Error as ThisError;

use crate::commands::Registry;
use crate::connection::ConnectionId;
use crate::frame::{Frame, Node, Value};

#[derive(Debug, ThisError, PartialEq)]
pub enum DispatchError {
    #[error("unknown command '{command}'")]
    NotAValidCommand { command: String },
    #[error("empty command")]
    Empty,
}

/// One command invocation, ready to run.
#[derive(Debug, PartialEq)]
pub struct CommandEvent {
    /// The registered name, in its canonical upper case.
    pub name: &'static str,
    pub args: Vec<Frame>,
    pub source: ConnectionId,
}

/// Groups a decoded batch into the sequences handed to [`map_to_command_events`].
///
/// Each top-level array is a sequence of its own. Consecutive top-level scalars form one sequence
/// between them. Empty arrays carry nothing to run and are skipped.
pub fn split_invocations(nodes: Vec<Node>) -> Vec<Vec<Node>> {
    let mut sequences = Vec::new();
    let mut loose = Vec::new();

    for node in nodes {
        match node.value {
            Value::Array(elements) => {
                if !loose.is_empty() {
                    sequences.push(mem::take(&mut loose));
                }
                if !elements.is_empty() {
                    sequences.push(elements);
                }
            }
            _ => loose.push(node),
        }
    }

    if !loose.is_empty() {
        sequences.push(loose);
    }

    sequences
}

/// Splits a flat node sequence into command invocations.
///
/// Scanning left to right, every node whose string value names a registered command starts a new
/// invocation, and every other node is an argument of the invocation before it. Segmentation
/// never looks at arity; that is checked when the command runs.
pub fn map_to_command_events(
    registry: &Registry,
    nodes: Vec<Node>,
    source: &ConnectionId,
) -> Result<Vec<CommandEvent>, DispatchError> {
    let mut events: Vec<CommandEvent> = Vec::new();

    for node in nodes {
        match node.as_str().and_then(|name| registry.lookup(name)) {
            Some(command) => events.push(CommandEvent {
                name: command.name,
                args: Vec::new(),
                source: source.clone(),
            }),
            None => match events.last_mut() {
                Some(event) => event.args.push(node.to_frame()),
                None => {
                    let command = match node.as_str() {
                        Some(name) => name.to_string(),
                        None => node.to_frame().to_string(),
                    };
                    return Err(DispatchError::NotAValidCommand { command });
                }
            },
        }
    }

    if events.is_empty() {
        return Err(DispatchError::Empty);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use bytes::Bytes;

    fn nodes(data: &'static [u8]) -> Vec<Node> {
        decode(&Bytes::from_static(data)).unwrap()
    }

    fn source() -> ConnectionId {
        ConnectionId::from("127.0.0.1:5000")
    }

    #[test]
    fn greedy_segmentation() {
        let registry = Registry::default();
        let nodes = nodes(b"+PING\r\n$5\r\nhello\r\n+PING\r\n");

        let events = map_to_command_events(&registry, nodes, &source()).unwrap();

        assert_eq!(
            events,
            vec![
                CommandEvent {
                    name: "PING",
                    args: vec![Frame::Bulk(Bytes::from("hello"))],
                    source: source(),
                },
                CommandEvent {
                    name: "PING",
                    args: vec![],
                    source: source(),
                },
            ]
        );
    }

    #[test]
    fn command_names_are_case_insensitive() {
        let registry = Registry::default();
        let nodes = nodes(b"$4\r\necho\r\n$2\r\nhi\r\n");

        let events = map_to_command_events(&registry, nodes, &source()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "ECHO");
    }

    #[test]
    fn arity_is_not_used_for_segmentation() {
        let registry = Registry::default();
        let nodes = nodes(b"+GET\r\n+GET\r\n+key\r\n");

        let events = map_to_command_events(&registry, nodes, &source()).unwrap();

        assert_eq!(events.len(), 2);
        assert!(events[0].args.is_empty());
        assert_eq!(events[1].args, vec![Frame::Simple("key".to_string())]);
    }

    #[test]
    fn arguments_keep_their_type() {
        let registry = Registry::default();
        let nodes = nodes(b"+ECHO\r\n:12\r\n$-1\r\n*1\r\n+a\r\n");

        let events = map_to_command_events(&registry, nodes, &source()).unwrap();

        assert_eq!(
            events[0].args,
            vec![
                Frame::Integer(12),
                Frame::Null,
                Frame::Array(vec![Frame::Simple("a".to_string())]),
            ]
        );
    }

    #[test]
    fn first_node_must_be_a_command() {
        let registry = Registry::default();

        assert_eq!(
            map_to_command_events(&registry, nodes(b"+hello\r\n+PING\r\n"), &source()),
            Err(DispatchError::NotAValidCommand {
                command: "hello".to_string()
            })
        );
        assert_eq!(
            map_to_command_events(&registry, nodes(b":1\r\n"), &source()),
            Err(DispatchError::NotAValidCommand {
                command: ":1".to_string()
            })
        );
    }

    #[test]
    fn empty_sequence() {
        let registry = Registry::default();

        assert_eq!(
            map_to_command_events(&registry, vec![], &source()),
            Err(DispatchError::Empty)
        );
    }

    #[test]
    fn split_invocations_per_array() {
        let batch = nodes(
            b"*2\r\n$4\r\nECHO\r\n$1\r\na\r\n+PING\r\n+PING\r\n*0\r\n*1\r\n$4\r\nPING\r\n",
        );

        let sequences = split_invocations(batch);

        let sizes: Vec<usize> = sequences.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(sequences[0][0].as_str(), Some("ECHO"));
        assert_eq!(sequences[1][0].as_str(), Some("PING"));
    }
}
