//!
//! Synchronous publisher appending messages to topics.
//!
use crate::config::{PublisherConfig, TransportTuning};
use crate::error::{ClientError, Result};
use crate::marshal::Marshaler;
use crate::message::Message;
use crate::transport::{Connector, SyncProducer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct Publisher {
    marshaler: Arc<dyn Marshaler>,
    producer: Mutex<Option<Box<dyn SyncProducer>>>,
}

impl Publisher {
    /// Validates `config` and opens the producer connection.
    ///
    /// # Errors
    /// Raise ClientError::MissingEndpoints or ClientError::MissingMarshaler on invalid config, and
    /// ClientError::Transport if the producer cannot be created.
    pub async fn new(mut config: PublisherConfig, connector: &dyn Connector) -> Result<Self> {
        config.set_defaults();
        config.validate()?;
        let marshaler = config.marshaler.clone().ok_or(ClientError::MissingMarshaler)?;
        let tuning = config
            .tuning
            .clone()
            .unwrap_or_else(TransportTuning::publisher_default);

        let producer = connector
            .producer(&config.endpoints, &tuning)
            .await
            .map_err(|e| ClientError::transport("cannot create producer", e))?;

        Ok(Publisher {
            marshaler,
            producer: Mutex::new(Some(producer)),
        })
    }

    /// Publishes `messages` to `topic` in order, waiting for the transport to acknowledge each one.
    ///
    /// Stops at the first message that fails to marshal or send; messages before it have been
    /// delivered, messages after it have not been attempted.
    pub async fn publish(&self, topic: &str, messages: &[Message]) -> Result<()> {
        let mut guard = self.producer.lock().await;
        let producer = guard.as_mut().ok_or(ClientError::PublisherClosed)?;

        for message in messages {
            debug!(topic, message_uuid = %message.uuid, "Sending message");

            let record = self
                .marshaler
                .marshal(topic, message)
                .map_err(|e| ClientError::Marshal {
                    uuid: message.uuid.clone(),
                    source: Box::new(e),
                })?;

            let (partition, offset) =
                producer
                    .send(record)
                    .await
                    .map_err(|e| ClientError::Produce {
                        uuid: message.uuid.clone(),
                        source: e,
                    })?;

            debug!(
                topic,
                message_uuid = %message.uuid,
                partition,
                offset,
                "Message sent"
            );
        }

        Ok(())
    }

    /// Closes the producer. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let producer = self.producer.lock().await.take();
        match producer {
            Some(mut producer) => producer
                .close()
                .await
                .map_err(|e| ClientError::transport("cannot close producer", e)),
            None => Ok(()),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.producer.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{DefaultMarshaler, PartitioningMarshaler, UUID_HEADER_KEY};
    use crate::memory::MemoryBroker;
    use bytes::Bytes;

    fn config() -> PublisherConfig {
        PublisherConfig::new(vec!["localhost:9092".to_owned()], Arc::new(DefaultMarshaler))
    }

    #[tokio::test]
    async fn test_publish_in_order() -> Result<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2).map_err(|e| ClientError::transport("setup", e))?;
        let publisher = Publisher::new(config(), &broker).await?;

        let messages = vec![
            Message::new("m1", "one"),
            Message::new("m2", "two"),
            Message::new("m3", "three"),
        ];
        publisher.publish("orders", &messages).await?;

        let mut stored: Vec<(i32, i64, Bytes)> = (0..2)
            .flat_map(|p| broker.records("orders", p))
            .map(|r| (r.partition, r.offset, r.value))
            .collect();
        stored.sort();
        assert_eq!(
            stored,
            vec![
                (0, 0, Bytes::from_static(b"one")),
                (0, 1, Bytes::from_static(b"three")),
                (1, 0, Bytes::from_static(b"two")),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_stops_at_first_marshal_failure() -> Result<()> {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(config(), &broker).await?;

        let messages = vec![
            Message::new("m1", "one"),
            Message::new("m2", "two"),
            Message::new("m3", "three").with_metadata(UUID_HEADER_KEY, "spoofed"),
            Message::new("m4", "four"),
        ];
        let result = publisher.publish("orders", &messages).await;

        match result {
            Err(ClientError::Marshal { uuid, source }) => {
                assert_eq!(uuid, "m3");
                assert!(matches!(*source, ClientError::ReservedMetadata(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let sent: Vec<Bytes> = broker.records("orders", 0).into_iter().map(|r| r.value).collect();
        assert_eq!(sent, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_wraps_send_failure() -> Result<()> {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(config(), &broker).await?;
        publisher.publish("orders", &[Message::new("m0", "zero")]).await?;

        broker.fail_next_sends(1);
        let result = publisher
            .publish("orders", &[Message::new("m1", "one"), Message::new("m2", "two")])
            .await;

        assert!(matches!(result, Err(ClientError::Produce { ref uuid, .. }) if uuid == "m1"));
        assert_eq!(broker.records("orders", 0).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() -> Result<()> {
        let broker = MemoryBroker::new();
        let publisher = Publisher::new(config(), &broker).await?;
        assert_eq!(broker.live_connections(), 1);

        publisher.close().await?;
        publisher.close().await?;
        assert!(publisher.is_closed().await);
        assert_eq!(broker.live_connections(), 0);

        let result = publisher.publish("orders", &[Message::new("m1", "one")]).await;
        assert!(matches!(result, Err(ClientError::PublisherClosed)));
        assert_eq!(broker.partition_count("orders"), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let broker = MemoryBroker::new();
        let result = Publisher::new(PublisherConfig::default(), &broker).await;
        assert!(matches!(result, Err(ClientError::MissingEndpoints)));
        assert_eq!(broker.connection_attempts(), 0);
    }

    #[tokio::test]
    async fn test_new_fails_when_transport_unavailable() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let result = Publisher::new(config(), &broker).await;
        assert!(matches!(result, Err(ClientError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_publish_with_partition_key() -> Result<()> {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 4).map_err(|e| ClientError::transport("setup", e))?;
        let marshaler = PartitioningMarshaler::new(|_topic: &str, message: &Message| {
            Ok(message.metadata.get("customer").to_owned())
        });
        let config =
            PublisherConfig::new(vec!["localhost:9092".to_owned()], Arc::new(marshaler));
        let publisher = Publisher::new(config, &broker).await?;

        let messages: Vec<Message> = (0..3)
            .map(|i| Message::new(format!("m{}", i), "x").with_metadata("customer", "c-7"))
            .collect();
        publisher.publish("orders", &messages).await?;

        let partitions_used = (0..4)
            .filter(|p| !broker.records("orders", *p).is_empty())
            .count();
        assert_eq!(partitions_used, 1);
        Ok(())
    }
}
