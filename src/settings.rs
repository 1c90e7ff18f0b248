//!
//! File and environment configuration.
//!
//! ```toml
//! [publisher]
//! endpoints = "broker-1:9092;broker-2:9092"
//!
//! [subscriber]
//! endpoints = ["broker-1:9092"]
//! consumer_group = "billing"
//! initial_offset = "oldest"
//! nack_resend_sleep_ms = 0
//!
//! [subscriber.topic_details]
//! num_partitions = 8
//! replication_factor = 3
//! ```
//!
//! Environment variables prefixed with `LOGBUS_` override the file, with `__` separating
//! sections: `LOGBUS_SUBSCRIBER__CONSUMER_GROUP=billing`.
//!
use crate::config::{
    parse_endpoints, InitialOffset, PublisherConfig, SubscriberConfig, TopicDetail,
    TransportTuning, DEFAULT_NACK_RESEND_SLEEP, DEFAULT_RECONNECT_RETRY_SLEEP,
};
use crate::error::Result;
use crate::marshal::{Marshaler, Unmarshaler};
use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "LOGBUS";

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSettings {
    pub endpoints: Vec<String>,
    pub client_id: String,
    pub producer_retry_max: u32,
    pub metadata_retry_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberSettings {
    pub endpoints: Vec<String>,
    pub client_id: String,
    pub consumer_group: String,
    pub initial_offset: InitialOffset,
    /// Zero disables the sleep.
    pub nack_resend_sleep: Duration,
    /// Zero disables the sleep.
    pub reconnect_retry_sleep: Duration,
    pub topic_details: Option<TopicDetail>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub publisher: PublisherSettings,
    pub subscriber: SubscriberSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let publisher = TransportTuning::publisher_default();
        let subscriber = TransportTuning::subscriber_default();
        Self {
            publisher: PublisherSettings {
                endpoints: Vec::new(),
                client_id: publisher.client_id,
                producer_retry_max: publisher.producer_retry_max,
                metadata_retry_backoff: publisher.metadata_retry_backoff,
            },
            subscriber: SubscriberSettings {
                endpoints: Vec::new(),
                client_id: subscriber.client_id,
                consumer_group: String::new(),
                initial_offset: subscriber.initial_offset,
                nack_resend_sleep: DEFAULT_NACK_RESEND_SLEEP,
                reconnect_retry_sleep: DEFAULT_RECONNECT_RETRY_SLEEP,
                topic_details: None,
            },
        }
    }
}

impl Settings {
    pub fn publisher_config(&self, marshaler: Arc<dyn Marshaler>) -> PublisherConfig {
        let mut tuning = TransportTuning::publisher_default();
        tuning.client_id = self.publisher.client_id.clone();
        tuning.producer_retry_max = self.publisher.producer_retry_max;
        tuning.metadata_retry_backoff = self.publisher.metadata_retry_backoff;

        PublisherConfig::new(self.publisher.endpoints.clone(), marshaler).with_tuning(tuning)
    }

    pub fn subscriber_config(&self, unmarshaler: Arc<dyn Unmarshaler>) -> SubscriberConfig {
        let mut tuning = TransportTuning::subscriber_default();
        tuning.client_id = self.subscriber.client_id.clone();
        tuning.initial_offset = self.subscriber.initial_offset;

        let mut config = SubscriberConfig::new(self.subscriber.endpoints.clone(), unmarshaler)
            .with_consumer_group(self.subscriber.consumer_group.clone())
            .with_tuning(tuning)
            .with_nack_resend_sleep(self.subscriber.nack_resend_sleep)
            .with_reconnect_retry_sleep(self.subscriber.reconnect_retry_sleep);
        config.initialize_topic_details = self.subscriber.topic_details.clone();
        config
    }
}

/// Either a list of `host:port` entries or a single `;`/`,` separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Endpoints {
    List(Vec<String>),
    Joined(String),
}

impl Endpoints {
    fn into_vec(self) -> Vec<String> {
        match self {
            Endpoints::List(list) => parse_endpoints(&list.join(";")),
            Endpoints::Joined(joined) => parse_endpoints(&joined),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialSettings {
    publisher: Option<PartialPublisherSettings>,
    subscriber: Option<PartialSubscriberSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialPublisherSettings {
    endpoints: Option<Endpoints>,
    client_id: Option<String>,
    producer_retry_max: Option<u32>,
    metadata_retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialSubscriberSettings {
    endpoints: Option<Endpoints>,
    client_id: Option<String>,
    consumer_group: Option<String>,
    initial_offset: Option<InitialOffset>,
    nack_resend_sleep_ms: Option<u64>,
    reconnect_retry_sleep_ms: Option<u64>,
    topic_details: Option<TopicDetail>,
}

/// Loads settings from the TOML file at `path`, if any, and `LOGBUS_*` environment variables.
///
/// # Errors
/// Raise ClientError::Settings if the file is missing or a value has the wrong type.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    load(path, ENV_PREFIX)
}

fn load(path: Option<&Path>, env_prefix: &str) -> Result<Settings> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator("_")
            .separator("__"),
    );

    let partial: PartialSettings = builder.build()?.try_deserialize()?;
    let default = Settings::default();
    let publisher = partial.publisher.unwrap_or_default();
    let subscriber = partial.subscriber.unwrap_or_default();

    Ok(Settings {
        publisher: PublisherSettings {
            endpoints: publisher
                .endpoints
                .map(Endpoints::into_vec)
                .unwrap_or(default.publisher.endpoints),
            client_id: publisher.client_id.unwrap_or(default.publisher.client_id),
            producer_retry_max: publisher
                .producer_retry_max
                .unwrap_or(default.publisher.producer_retry_max),
            metadata_retry_backoff: publisher
                .metadata_retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(default.publisher.metadata_retry_backoff),
        },
        subscriber: SubscriberSettings {
            endpoints: subscriber
                .endpoints
                .map(Endpoints::into_vec)
                .unwrap_or(default.subscriber.endpoints),
            client_id: subscriber.client_id.unwrap_or(default.subscriber.client_id),
            consumer_group: subscriber
                .consumer_group
                .unwrap_or(default.subscriber.consumer_group),
            initial_offset: subscriber
                .initial_offset
                .unwrap_or(default.subscriber.initial_offset),
            nack_resend_sleep: subscriber
                .nack_resend_sleep_ms
                .map(Duration::from_millis)
                .unwrap_or(default.subscriber.nack_resend_sleep),
            reconnect_retry_sleep: subscriber
                .reconnect_retry_sleep_ms
                .map(Duration::from_millis)
                .unwrap_or(default.subscriber.reconnect_retry_sleep),
            topic_details: subscriber.topic_details.or(default.subscriber.topic_details),
        },
    })
}
