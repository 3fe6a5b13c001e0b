use crate::commands::executable::{CommandOutput, Executable, Session};
use crate::commands::registry::{run, Argument, ArgumentKind, Command};
use crate::commands::{CommandError, CommandParser};
use crate::frame::Frame;

/// Get the value of `key`. If the key does not exist the special value `nil` is returned.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: String,
}

impl Get {
    pub const COMMAND: Command = Command {
        name: "GET",
        arity: 2,
        arguments: &[Argument::new("key", ArgumentKind::Key).at(1)],
        pubsub_context: false,
        handler: run::<Get>,
    };
}

impl Executable for Get {
    fn exec(self, session: &mut Session<'_>) -> Result<CommandOutput, CommandError> {
        // The store only fails a lookup with `NotFound`.
        let res = session
            .context
            .store
            .get(&self.key)
            .map_or(Frame::Null, Frame::Bulk);

        Ok(CommandOutput::Reply(res))
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::Harness;
    use bytes::Bytes;

    #[test]
    fn existing_key() {
        let mut harness = Harness::new();
        let cmd = Get::try_from(&mut CommandParser::new(vec![Frame::Bulk(Bytes::from(
            "key1",
        ))]))
        .unwrap();

        assert_eq!(
            cmd,
            Get {
                key: String::from("key1")
            }
        );

        harness
            .context
            .store
            .set(String::from("key1"), Bytes::from("1"))
            .unwrap();

        assert_eq!(
            harness.exec(cmd),
            Ok(CommandOutput::Reply(Frame::Bulk(Bytes::from("1"))))
        );
    }

    #[test]
    fn missing_key() {
        let mut harness = Harness::new();

        let result = harness.exec(Get {
            key: String::from("key1"),
        });

        assert_eq!(result, Ok(CommandOutput::Reply(Frame::Null)));
    }
}
