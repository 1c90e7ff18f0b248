//!
//! Per-message processing record attached to every delivered message.
//!
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Where a delivered message came from and how long its handling may last.
///
/// The cancellation token is scoped to one record: it fires when the subscription is torn down
/// and is cancelled once the subscriber stops handling the record (after ack, or on shutdown).
#[derive(Debug, Clone)]
pub struct MessageContext {
    partition: i32,
    offset: i64,
    timestamp: DateTime<Utc>,
    message_uuid: String,
    started_at: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub(crate) fn new(
        partition: i32,
        offset: i64,
        timestamp: DateTime<Utc>,
        message_uuid: String,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            partition,
            offset,
            timestamp,
            message_uuid,
            started_at: Utc::now(),
            cancellation,
        }
    }

    /// Partition of the consumed record.
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset of the consumed record within its partition.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Timestamp the transport recorded for the record.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message_uuid(&self) -> &str {
        &self.message_uuid
    }

    /// When the subscriber started handling the record.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
