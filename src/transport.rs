//!
//! This module defines the boundary to the underlying log transport.
//!
//! Wire protocol and broker-side storage live behind these traits; [`crate::memory`] provides an
//! in-process implementation.
//!
use crate::config::{InitialOffset, TopicDetail, TransportTuning};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("unknown topic `{0}`")]
    UnknownTopic(String),

    #[error("unknown partition {partition} of topic `{topic}`")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("topic `{0}` already exists")]
    TopicExists(String),

    #[error("connection closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: Bytes,
    pub value: Bytes,
}

impl RecordHeader {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record on its way to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
    pub value: Bytes,
}

/// A record read back from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: DateTime<Utc>,
    pub key: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
    pub value: Bytes,
}

/// Opens connections to the transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn producer(
        &self,
        endpoints: &[String],
        tuning: &TransportTuning,
    ) -> Result<Box<dyn SyncProducer>, TransportError>;

    async fn client(
        &self,
        endpoints: &[String],
        tuning: &TransportTuning,
    ) -> Result<Box<dyn Client>, TransportError>;

    async fn admin(
        &self,
        endpoints: &[String],
        tuning: &TransportTuning,
    ) -> Result<Box<dyn ClusterAdmin>, TransportError>;
}

/// Producer that waits for the transport to acknowledge every record.
#[async_trait]
pub trait SyncProducer: Send + Sync {
    /// Returns the partition and offset the record was written to.
    async fn send(&mut self, record: ProducerRecord) -> Result<(i32, i64), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Record stream of a single partition.
///
/// The receiver ends when the cursor is closed or the connection drops.
pub struct PartitionConsumer {
    pub topic: String,
    pub partition: i32,
    pub records: mpsc::Receiver<ConsumerRecord>,
    pub(crate) close: CancellationToken,
}

impl PartitionConsumer {
    pub fn new(
        topic: String,
        partition: i32,
        records: mpsc::Receiver<ConsumerRecord>,
        close: CancellationToken,
    ) -> Self {
        Self {
            topic,
            partition,
            records,
            close,
        }
    }

    pub fn close(&mut self) {
        self.close.cancel();
        self.records.close();
    }
}

#[async_trait]
pub trait Client: Send + Sync {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, TransportError>;

    async fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
        initial: InitialOffset,
    ) -> Result<PartitionConsumer, TransportError>;

    async fn consumer_group(&self, group: &str) -> Result<Box<dyn ConsumerGroup>, TransportError>;

    async fn newest_offset(&self, topic: &str, partition: i32) -> Result<i64, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Partition assigned to this group member for the duration of one session.
pub struct Claim {
    pub topic: String,
    pub partition: i32,
    pub initial_offset: i64,
    pub records: mpsc::Receiver<ConsumerRecord>,
}

/// Commit surface of a running group session.
pub trait GroupSession: Send + Sync {
    /// Marks `record` as processed, advancing the group's committed offset past it.
    fn mark_record(&self, record: &ConsumerRecord, metadata: &str);

    fn member_id(&self) -> &str;

    fn generation_id(&self) -> i32;

    /// Fires when the session ends, for example on rebalance.
    fn cancellation(&self) -> &CancellationToken;
}

/// Callback the group invokes once per claim of a session.
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    async fn consume_claim(
        &self,
        session: Arc<dyn GroupSession>,
        claim: Claim,
    ) -> crate::error::Result<()>;
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Joins the group and runs a single session.
    ///
    /// Returns once every claim handler has returned, which happens when the group rebalances,
    /// the connection drops, or `cancel` fires.
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Hands out the group's internal error stream; subsequent calls return `None`.
    fn take_errors(&self) -> Option<mpsc::Receiver<TransportError>>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn create_topic(
        &self,
        topic: &str,
        detail: &TopicDetail,
        validate_only: bool,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
