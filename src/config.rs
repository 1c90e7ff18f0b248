//!
//! Publisher and subscriber configuration.
//!
use crate::error::{ClientError, Result};
use crate::marshal::{Marshaler, Unmarshaler};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Disables a resend or reconnect sleep when used as its duration.
pub const NO_SLEEP: Duration = Duration::ZERO;

pub const DEFAULT_NACK_RESEND_SLEEP: Duration = Duration::from_millis(100);

pub const DEFAULT_RECONNECT_RETRY_SLEEP: Duration = Duration::from_secs(1);

pub const DEFAULT_CLIENT_ID: &str = "logbus";

/// Where a fresh partition cursor starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    Oldest,
    Newest,
}

/// Transport-specific tuning handed to the [`Connector`](crate::transport::Connector).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportTuning {
    pub client_id: String,
    pub initial_offset: InitialOffset,
    pub producer_retry_max: u32,
    pub producer_return_successes: bool,
    pub metadata_retry_backoff: Duration,
    pub consumer_return_errors: bool,
}

impl TransportTuning {
    pub fn publisher_default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            initial_offset: InitialOffset::Newest,
            producer_retry_max: 10,
            producer_return_successes: true,
            metadata_retry_backoff: Duration::from_secs(2),
            consumer_return_errors: false,
        }
    }

    pub fn subscriber_default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            initial_offset: InitialOffset::Newest,
            producer_retry_max: 3,
            producer_return_successes: false,
            metadata_retry_backoff: Duration::from_millis(250),
            consumer_return_errors: true,
        }
    }
}

/// Descriptor used to provision a topic before subscribing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicDetail {
    pub num_partitions: i32,
    pub replication_factor: i16,
    #[serde(default)]
    pub config_entries: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
pub struct PublisherConfig {
    pub endpoints: Vec<String>,

    pub marshaler: Option<Arc<dyn Marshaler>>,

    /// Replaces [`TransportTuning::publisher_default`] when set.
    pub tuning: Option<TransportTuning>,
}

impl PublisherConfig {
    pub fn new(endpoints: Vec<String>, marshaler: Arc<dyn Marshaler>) -> Self {
        Self {
            endpoints,
            marshaler: Some(marshaler),
            tuning: None,
        }
    }

    pub fn with_tuning(mut self, tuning: TransportTuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub(crate) fn set_defaults(&mut self) {
        if self.tuning.is_none() {
            self.tuning = Some(TransportTuning::publisher_default());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(ClientError::MissingEndpoints);
        }
        if self.marshaler.is_none() {
            return Err(ClientError::MissingMarshaler);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct SubscriberConfig {
    pub endpoints: Vec<String>,

    pub unmarshaler: Option<Arc<dyn Unmarshaler>>,

    /// Replaces [`TransportTuning::subscriber_default`] when set.
    pub tuning: Option<TransportTuning>,

    /// Consumer group to join. When empty, every partition of the topic is consumed directly.
    pub consumer_group: String,

    /// How long to wait before redelivering a nacked message. `None` takes the default,
    /// [`NO_SLEEP`] redelivers immediately.
    pub nack_resend_sleep: Option<Duration>,

    /// How long to wait before reconnecting after consumption stopped. `None` takes the default,
    /// [`NO_SLEEP`] reconnects immediately.
    pub reconnect_retry_sleep: Option<Duration>,

    pub initialize_topic_details: Option<TopicDetail>,
}

impl SubscriberConfig {
    pub fn new(endpoints: Vec<String>, unmarshaler: Arc<dyn Unmarshaler>) -> Self {
        Self {
            endpoints,
            unmarshaler: Some(unmarshaler),
            ..Default::default()
        }
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_tuning(mut self, tuning: TransportTuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub fn with_nack_resend_sleep(mut self, sleep: Duration) -> Self {
        self.nack_resend_sleep = Some(sleep);
        self
    }

    pub fn with_reconnect_retry_sleep(mut self, sleep: Duration) -> Self {
        self.reconnect_retry_sleep = Some(sleep);
        self
    }

    pub fn with_topic_details(mut self, detail: TopicDetail) -> Self {
        self.initialize_topic_details = Some(detail);
        self
    }

    pub(crate) fn set_defaults(&mut self) {
        if self.tuning.is_none() {
            self.tuning = Some(TransportTuning::subscriber_default());
        }
        if self.nack_resend_sleep.is_none() {
            self.nack_resend_sleep = Some(DEFAULT_NACK_RESEND_SLEEP);
        }
        if self.reconnect_retry_sleep.is_none() {
            self.reconnect_retry_sleep = Some(DEFAULT_RECONNECT_RETRY_SLEEP);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(ClientError::MissingEndpoints);
        }
        if self.unmarshaler.is_none() {
            return Err(ClientError::MissingUnmarshaler);
        }
        Ok(())
    }
}

/// Splits a `host:port` list separated by `;` or `,`, dropping entries without a valid port.
pub fn parse_endpoints(addrs: &str) -> Vec<String> {
    addrs
        .split(|c: char| c == ';' || c == ',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .filter_map(|addr| match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Some(addr.to_owned())
            }
            _ => {
                tracing::warn!(endpoint = addr, "Ignoring malformed endpoint");
                None
            }
        })
        .collect()
}
