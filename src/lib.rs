//! This crate provides APIs to publish messages to and subscribe messages from partitioned,
//! Kafka-style commit logs with at-least-once delivery.
//!
//! Transports plug in through the traits of [`transport`]; [`memory::MemoryBroker`] is an
//! in-process implementation.
pub mod config;
pub mod context;
mod delivery;
pub mod error;
mod handler;
pub mod json;
pub mod marshal;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod settings;
pub mod subscriber;
pub mod transport;

pub use crate::config::{
    InitialOffset, PublisherConfig, SubscriberConfig, TopicDetail, TransportTuning, NO_SLEEP,
};
pub use crate::context::MessageContext;
pub use crate::delivery::Subscription;
pub use crate::error::{ClientError, Result};
pub use crate::json::JsonMarshaler;
pub use crate::marshal::{
    DefaultMarshaler, Marshaler, MarshalerUnmarshaler, PartitioningMarshaler, Unmarshaler,
};
pub use crate::memory::MemoryBroker;
pub use crate::message::{AckState, EventType, Message, Metadata};
pub use crate::publisher::Publisher;
pub use crate::settings::{load_settings, Settings};
pub use crate::subscriber::{PartitionOffset, Subscriber};
