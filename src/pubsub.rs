use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use strum_macros::AsRefStr;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::frame::Frame;

#[derive(Debug, ThisError, PartialEq)]
pub enum PubSubError {
    #[error("connection is not in subscription mode")]
    NotInSubscriptionMode,
}

/// Where pub/sub notifications are handed over for delivery.
///
/// Implementations must not write synchronously: a notice is scheduled and written later, so the
/// caller can keep iterating over its subscriber snapshot.
pub trait Outbox {
    fn deliver(&mut self, connection: &ConnectionId, frame: Frame);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

impl SubscriptionKind {
    fn subscribe_notice(self) -> Notice {
        match self {
            SubscriptionKind::Channel => Notice::Subscribe,
            SubscriptionKind::Pattern => Notice::Psubscribe,
        }
    }

    fn unsubscribe_notice(self) -> Notice {
        match self {
            SubscriptionKind::Channel => Notice::Unsubscribe,
            SubscriptionKind::Pattern => Notice::Punsubscribe,
        }
    }
}

/// The first element of every pub/sub push message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Notice {
    Message,
    Pmessage,
    Subscribe,
    Unsubscribe,
    Psubscribe,
    Punsubscribe,
}

impl Notice {
    fn bulk(self) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(self.as_ref().as_bytes()))
    }

    /// `[kind, name, count]`, the confirmation sent for every (un)subscription. A `None` name is
    /// sent as null, which happens when unsubscribing from everything while holding nothing of
    /// that kind.
    pub fn confirmation(self, name: Option<&str>, count: usize) -> Frame {
        let name = match name {
            Some(name) => Frame::Bulk(Bytes::copy_from_slice(name.as_bytes())),
            None => Frame::Null,
        };

        Frame::Array(vec![self.bulk(), name, Frame::Integer(count as i64)])
    }
}

/// A Redis-style glob pattern: `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\` escapes. Unlike path
/// globs, `*` also matches `/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    source: String,
}

impl Pattern {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        glob_match(self.source.as_bytes(), channel.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_match(pattern: &[u8], string: &[u8]) -> bool {
    let mut p = 0;
    let mut s = 0;
    // Pattern index right after the last `*`, and the string index it absorbed up to.
    let mut star: Option<(usize, usize)> = None;

    while s < string.len() {
        let step = match pattern.get(p) {
            Some(b'*') => {
                star = Some((p + 1, s));
                p += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'[') => match_class(&pattern[p..], string[s]),
            Some(b'\\') if p + 1 < pattern.len() => (pattern[p + 1] == string[s]).then_some(2),
            Some(&c) => (c == string[s]).then_some(1),
            None => None,
        };

        match (step, star) {
            (Some(len), _) => {
                p += len;
                s += 1;
            }
            // Mismatch: let the last `*` absorb one more byte.
            (None, Some((star_p, star_s))) => {
                p = star_p;
                s = star_s + 1;
                star = Some((star_p, star_s + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches `c` against the class at the start of `class`, which begins with `[`. Returns the
/// length of the class on a match. An unterminated class never matches.
fn match_class(class: &[u8], c: u8) -> Option<usize> {
    let mut i = 1;
    let negate = class.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        match class.get(i) {
            None => return None,
            Some(b']') => break,
            Some(b'\\') if i + 1 < class.len() => {
                matched |= class[i + 1] == c;
                i += 2;
            }
            Some(&lo)
                if class.get(i + 1) == Some(&b'-')
                    && class.get(i + 2).is_some_and(|&hi| hi != b']') =>
            {
                let hi = class[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            Some(&x) => {
                matched |= x == c;
                i += 1;
            }
        }
    }

    (matched != negate).then_some(i + 1)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscriber {
    Connection(ConnectionId),
    /// A pattern subscription whose pattern matches the channel name. Resolved to its own
    /// connections at publish time.
    Pattern(String),
}

#[derive(Debug)]
pub struct Channel {
    name: String,
    subscribers: Vec<Subscriber>,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    fn connection_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|s| matches!(s, Subscriber::Connection(_)))
            .count()
    }
}

#[derive(Debug)]
pub struct PatternSubscription {
    pattern: Pattern,
    subscribers: Vec<ConnectionId>,
}

impl PatternSubscription {
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn subscribers(&self) -> &[ConnectionId] {
        &self.subscribers
    }
}

/// Channel and pattern subscriptions, and message fan-out.
///
/// Every channel lists the pattern subscriptions that match its name, whichever was created
/// first: a new channel picks up the existing matching patterns and a new pattern attaches
/// itself to the existing matching channels.
#[derive(Debug, Default)]
pub struct PubSub {
    channels: HashMap<String, Channel>,
    patterns: BTreeMap<String, PatternSubscription>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_or_create(&mut self, name: &str) -> &mut Channel {
        let patterns = &self.patterns;

        self.channels.entry(name.to_string()).or_insert_with(|| {
            let subscribers = patterns
                .values()
                .filter(|p| p.pattern.matches(name))
                .map(|p| Subscriber::Pattern(p.pattern.source.clone()))
                .collect();

            Channel {
                name: name.to_string(),
                subscribers,
            }
        })
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Sends `message` to every subscriber of `channel`, direct or through a pattern, and returns
    /// the number of deliveries. A connection subscribed both ways receives the message twice.
    ///
    /// Subscribers are snapshotted before any notice goes out.
    pub fn publish(&mut self, channel: &str, message: Bytes, outbox: &mut impl Outbox) -> usize {
        let snapshot = self.channel_or_create(channel).subscribers.clone();
        let channel_name = Bytes::copy_from_slice(channel.as_bytes());
        let mut deliveries = 0;

        for subscriber in snapshot {
            match subscriber {
                Subscriber::Connection(id) => {
                    let frame = Frame::Array(vec![
                        Notice::Message.bulk(),
                        Frame::Bulk(channel_name.clone()),
                        Frame::Bulk(message.clone()),
                    ]);
                    outbox.deliver(&id, frame);
                    deliveries += 1;
                }
                Subscriber::Pattern(pattern) => {
                    let Some(subscription) = self.patterns.get(&pattern) else {
                        continue;
                    };
                    for id in &subscription.subscribers {
                        let frame = Frame::Array(vec![
                            Notice::Pmessage.bulk(),
                            Frame::Bulk(Bytes::copy_from_slice(pattern.as_bytes())),
                            Frame::Bulk(channel_name.clone()),
                            Frame::Bulk(message.clone()),
                        ]);
                        outbox.deliver(id, frame);
                        deliveries += 1;
                    }
                }
            }
        }

        debug!(channel, deliveries, "published message");
        deliveries
    }

    /// Subscribes `connection` to a channel or a pattern and returns its total subscription
    /// count. Subscribing twice to the same name is a no-op, the confirmation is sent either way.
    pub fn subscribe(
        &mut self,
        name: &str,
        connection: &mut Connection,
        kind: SubscriptionKind,
        outbox: &mut impl Outbox,
    ) -> usize {
        match kind {
            SubscriptionKind::Channel => {
                if connection.add_channel(name) {
                    let subscriber = Subscriber::Connection(connection.id.clone());
                    self.channel_or_create(name).subscribers.push(subscriber);
                }
            }
            SubscriptionKind::Pattern => {
                if connection.add_pattern(name) {
                    self.pattern_or_create(name)
                        .subscribers
                        .push(connection.id.clone());
                }
            }
        }

        let count = connection.total_subscriptions();
        debug!(connection = %connection.id, name, ?kind, count, "subscribed");

        outbox.deliver(
            &connection.id,
            kind.subscribe_notice().confirmation(Some(name), count),
        );
        count
    }

    fn pattern_or_create(&mut self, source: &str) -> &mut PatternSubscription {
        let channels = &mut self.channels;

        self.patterns.entry(source.to_string()).or_insert_with(|| {
            let pattern = Pattern::new(source);
            for channel in channels.values_mut() {
                if pattern.matches(&channel.name) {
                    channel
                        .subscribers
                        .push(Subscriber::Pattern(source.to_string()));
                }
            }

            PatternSubscription {
                pattern,
                subscribers: Vec::new(),
            }
        })
    }

    /// Removes one subscription of `connection` and returns its remaining total.
    ///
    /// Fails if the connection holds no subscriptions at all. Unsubscribing from a name the
    /// connection is not subscribed to only sends the confirmation.
    pub fn unsubscribe(
        &mut self,
        name: &str,
        connection: &mut Connection,
        kind: SubscriptionKind,
        outbox: &mut impl Outbox,
    ) -> Result<usize, PubSubError> {
        connection.subscription_count()?;
        Ok(self.remove_subscription(name, connection, kind, outbox))
    }

    /// Removes several subscriptions at once, confirming each name in order.
    ///
    /// Subscription mode is checked once, up front: dropping to zero part way through still
    /// confirms the remaining names.
    pub fn unsubscribe_many(
        &mut self,
        names: &[String],
        connection: &mut Connection,
        kind: SubscriptionKind,
        outbox: &mut impl Outbox,
    ) -> Result<usize, PubSubError> {
        let mut count = connection.subscription_count()?;

        for name in names {
            count = self.remove_subscription(name, connection, kind, outbox);
        }

        Ok(count)
    }

    /// Removes every subscription of the given kind. Sends one confirmation per name, or a single
    /// confirmation with a null name when there was nothing of that kind to remove.
    pub fn unsubscribe_all(
        &mut self,
        connection: &mut Connection,
        kind: SubscriptionKind,
        outbox: &mut impl Outbox,
    ) -> Result<usize, PubSubError> {
        let count = connection.subscription_count()?;

        let names: Vec<String> = match kind {
            SubscriptionKind::Channel => connection.channels().cloned().collect(),
            SubscriptionKind::Pattern => connection.patterns().cloned().collect(),
        };

        if names.is_empty() {
            outbox.deliver(
                &connection.id,
                kind.unsubscribe_notice().confirmation(None, count),
            );
            return Ok(count);
        }

        self.unsubscribe_many(&names, connection, kind, outbox)
    }

    fn remove_subscription(
        &mut self,
        name: &str,
        connection: &mut Connection,
        kind: SubscriptionKind,
        outbox: &mut impl Outbox,
    ) -> usize {
        match kind {
            SubscriptionKind::Channel => {
                if connection.remove_channel(name) {
                    self.remove_channel_subscriber(name, &connection.id);
                }
            }
            SubscriptionKind::Pattern => {
                if connection.remove_pattern(name) {
                    self.remove_pattern_subscriber(name, &connection.id);
                }
            }
        }

        let count = connection.total_subscriptions();
        debug!(connection = %connection.id, name, ?kind, count, "unsubscribed");

        outbox.deliver(
            &connection.id,
            kind.unsubscribe_notice().confirmation(Some(name), count),
        );
        count
    }

    fn remove_channel_subscriber(&mut self, name: &str, id: &ConnectionId) {
        if let Some(channel) = self.channels.get_mut(name) {
            channel
                .subscribers
                .retain(|s| !matches!(s, Subscriber::Connection(c) if c == id));
        }
    }

    fn remove_pattern_subscriber(&mut self, source: &str, id: &ConnectionId) {
        let Some(subscription) = self.patterns.get_mut(source) else {
            return;
        };

        subscription.subscribers.retain(|c| c != id);

        if subscription.subscribers.is_empty() {
            self.patterns.remove(source);
            for channel in self.channels.values_mut() {
                channel
                    .subscribers
                    .retain(|s| !matches!(s, Subscriber::Pattern(p) if p == source));
            }
        }
    }

    /// Unregisters a connection that is going away from every channel and pattern it holds.
    pub fn remove_connection(&mut self, connection: &Connection) {
        for channel in connection.channels() {
            self.remove_channel_subscriber(channel, &connection.id);
        }

        for pattern in connection.patterns() {
            self.remove_pattern_subscriber(pattern, &connection.id);
        }
    }

    /// Drops the channels no connection subscribes to directly. Returns how many were dropped.
    ///
    /// Pattern subscribers do not keep a channel alive: they are attached again if the channel is
    /// recreated.
    pub fn purge_idle_channels(&mut self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, channel| channel.connection_count() > 0);

        let purged = before - self.channels.len();
        if purged > 0 {
            debug!("Purged {} idle Pub/Sub channels.", purged);
        }
        purged
    }

    /// Channels with at least one direct subscriber, optionally filtered by a glob pattern, in
    /// name order.
    pub fn channels(&self, pattern: Option<&str>) -> Vec<String> {
        let pattern = pattern.map(Pattern::new);

        let mut names: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.connection_count() > 0)
            .filter(|c| pattern.as_ref().map_or(true, |p| p.matches(&c.name)))
            .map(|c| c.name.clone())
            .collect();

        names.sort();
        names
    }

    /// Number of connections subscribed directly to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Channel::connection_count)
    }

    /// Number of patterns with at least one subscriber.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn pattern(&self, source: &str) -> Option<&PatternSubscription> {
        self.patterns.get(source)
    }
}
