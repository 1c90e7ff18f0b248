use crate::context::MessageContext;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::watch;

/// Acknowledgement state of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acked,
    Nacked,
}

/// User defined attributes in form of key-value pairs, carried as record headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, or an empty string when absent.
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Discriminator used by downstream dispatch to pick a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(String);

impl EventType {
    pub fn new(name: impl Into<String>) -> Self {
        EventType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType(name.to_owned())
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit of data moving through the bus.
///
/// A message is owned by exactly one party at a time: the producer until it is handed to
/// [`Publisher::publish`](crate::publisher::Publisher::publish), or the consumer of a subscription
/// channel until it calls [`ack`](Message::ack) or [`nack`](Message::nack).
///
/// Each delivery attempt transitions from [`AckState::Pending`] at most once. A message dropped
/// while still pending is treated by the subscriber as a nack.
#[derive(Debug)]
pub struct Message {
    /// Process-unique identifier used for deduplication and log correlation.
    pub uuid: String,

    pub payload: Bytes,

    pub metadata: Metadata,

    pub event_type: EventType,

    ack: watch::Sender<AckState>,

    context: Option<MessageContext>,
}

impl Message {
    pub fn new(uuid: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let (ack, _) = watch::channel(AckState::Pending);
        Message {
            uuid: uuid.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
            event_type: EventType::default(),
            ack,
            context: None,
        }
    }

    /// Creates a message with a random v4 UUID.
    pub fn with_random_uuid(payload: impl Into<Bytes>) -> Self {
        Message::new(uuid::Uuid::new_v4().to_string(), payload)
    }

    pub fn with_event_type(mut self, event_type: impl Into<EventType>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// Marks the delivery as successfully processed.
    ///
    /// Returns `false` if the message was already nacked; acking twice is a no-op.
    pub fn ack(&self) -> bool {
        self.transition(AckState::Acked)
    }

    /// Rejects the delivery, asking the subscriber to resend it.
    ///
    /// Returns `false` if the message was already acked; nacking twice is a no-op.
    pub fn nack(&self) -> bool {
        self.transition(AckState::Nacked)
    }

    pub fn ack_state(&self) -> AckState {
        *self.ack.borrow()
    }

    fn transition(&self, target: AckState) -> bool {
        let mut accepted = true;
        self.ack.send_if_modified(|state| match *state {
            AckState::Pending => {
                *state = target;
                true
            }
            current => {
                accepted = current == target;
                false
            }
        });
        accepted
    }

    pub(crate) fn watch_ack(&self) -> watch::Receiver<AckState> {
        self.ack.subscribe()
    }

    /// Processing context of the delivery, present on messages handed out by a subscriber.
    pub fn context(&self) -> Option<&MessageContext> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: MessageContext) {
        self.context = Some(context);
    }

    /// Returns a fresh copy with the same identity and content, a pending acknowledgement
    /// state and no processing context.
    pub fn copy(&self) -> Message {
        let mut message = Message::new(self.uuid.clone(), self.payload.clone());
        message.metadata = self.metadata.clone();
        message.event_type = self.event_type.clone();
        message
    }
}
