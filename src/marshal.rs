//!
//! Codecs between [`Message`] and transport records.
//!
use crate::error::{ClientError, Result};
use crate::message::{EventType, Message, Metadata};
use crate::transport::{ConsumerRecord, ProducerRecord, RecordHeader};
use bytes::Bytes;

/// Header carrying the message UUID. Owned by the codec, never by caller metadata.
pub const UUID_HEADER_KEY: &str = "_message_uuid";

/// Header carrying the message event type.
pub const EVENT_TYPE_HEADER_KEY: &str = "_event_type";

pub trait Marshaler: Send + Sync {
    fn marshal(&self, topic: &str, message: &Message) -> Result<ProducerRecord>;
}

pub trait Unmarshaler: Send + Sync {
    fn unmarshal(&self, record: &ConsumerRecord) -> Result<Message>;
}

pub trait MarshalerUnmarshaler: Marshaler + Unmarshaler {}

impl<T: Marshaler + Unmarshaler> MarshalerUnmarshaler for T {}

/// Carries the UUID, the event type and every metadata entry as headers, the payload as value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMarshaler;

impl Marshaler for DefaultMarshaler {
    fn marshal(&self, topic: &str, message: &Message) -> Result<ProducerRecord> {
        if message.metadata.contains_key(UUID_HEADER_KEY) {
            return Err(ClientError::ReservedMetadata(UUID_HEADER_KEY.to_owned()));
        }

        let mut headers = Vec::with_capacity(message.metadata.len() + 2);
        headers.push(RecordHeader::new(
            Bytes::from_static(UUID_HEADER_KEY.as_bytes()),
            Bytes::copy_from_slice(message.uuid.as_bytes()),
        ));
        if !message.event_type.is_empty() {
            headers.push(RecordHeader::new(
                Bytes::from_static(EVENT_TYPE_HEADER_KEY.as_bytes()),
                Bytes::copy_from_slice(message.event_type.as_str().as_bytes()),
            ));
        }
        headers.extend(message.metadata.iter().map(|(key, value)| {
            RecordHeader::new(
                Bytes::copy_from_slice(key.as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            )
        }));

        Ok(ProducerRecord {
            topic: topic.to_owned(),
            key: None,
            headers,
            value: message.payload.clone(),
        })
    }
}

impl Unmarshaler for DefaultMarshaler {
    fn unmarshal(&self, record: &ConsumerRecord) -> Result<Message> {
        let mut uuid = String::new();
        let mut event_type = EventType::default();
        let mut metadata = Metadata::new();

        // Non UTF-8 bytes degrade to replacement characters: a record that cannot be decoded
        // would not decode any better on redelivery.
        for header in &record.headers {
            let key = String::from_utf8_lossy(&header.key);
            let value = String::from_utf8_lossy(&header.value).into_owned();
            match &*key {
                UUID_HEADER_KEY => uuid = value,
                EVENT_TYPE_HEADER_KEY => event_type = EventType::from(value),
                _ => metadata.set(key.to_string(), value),
            }
        }

        let mut message = Message::new(uuid, record.value.clone());
        message.metadata = metadata;
        message.event_type = event_type;
        Ok(message)
    }
}

type PartitionKeyError = Box<dyn std::error::Error + Send + Sync>;

/// [`DefaultMarshaler`] that additionally derives the record key from the message.
///
/// A failing key function fails the marshal; the message is never sent without its key.
pub struct PartitioningMarshaler<F> {
    inner: DefaultMarshaler,
    generate_partition_key: F,
}

impl<F> PartitioningMarshaler<F>
where
    F: Fn(&str, &Message) -> std::result::Result<String, PartitionKeyError> + Send + Sync,
{
    pub fn new(generate_partition_key: F) -> Self {
        Self {
            inner: DefaultMarshaler,
            generate_partition_key,
        }
    }
}

impl<F> Marshaler for PartitioningMarshaler<F>
where
    F: Fn(&str, &Message) -> std::result::Result<String, PartitionKeyError> + Send + Sync,
{
    fn marshal(&self, topic: &str, message: &Message) -> Result<ProducerRecord> {
        let mut record = self.inner.marshal(topic, message)?;
        let key = (self.generate_partition_key)(topic, message).map_err(ClientError::PartitionKey)?;
        record.key = Some(Bytes::from(key));
        Ok(record)
    }
}

impl<F> Unmarshaler for PartitioningMarshaler<F>
where
    F: Fn(&str, &Message) -> std::result::Result<String, PartitionKeyError> + Send + Sync,
{
    fn unmarshal(&self, record: &ConsumerRecord) -> Result<Message> {
        self.inner.unmarshal(record)
    }
}
