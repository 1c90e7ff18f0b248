use crate::transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("missing endpoints")]
    MissingEndpoints,

    #[error("missing marshaler")]
    MissingMarshaler,

    #[error("missing unmarshaler")]
    MissingUnmarshaler,

    #[error("publisher closed")]
    PublisherClosed,

    #[error("subscriber closed")]
    SubscriberClosed,

    #[error("subscription output dropped by consumer")]
    OutputDropped,

    /// Raised when caller metadata tries to occupy a header owned by the codec.
    #[error("metadata `{0}` is reserved for message UUID")]
    ReservedMetadata(String),

    #[error("cannot generate partition key")]
    PartitionKey(#[source] BoxError),

    #[error("cannot marshal message {uuid}")]
    Marshal {
        uuid: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("cannot produce message {uuid}")]
    Produce {
        uuid: String,
        #[source]
        source: TransportError,
    },

    #[error("message unmarshal failed")]
    Unmarshal(#[source] BoxError),

    #[error("invalid message payload")]
    Payload(#[from] serde_json::Error),

    #[error("topic details are not configured, cannot initialize subscription")]
    MissingTopicDetails,

    #[error("{context}")]
    Transport {
        context: &'static str,
        #[source]
        source: TransportError,
    },

    /// The operation failed and releasing its connection failed as well.
    #[error("{primary}; closing connection also failed: {close}")]
    CloseFailed {
        primary: Box<ClientError>,
        close: TransportError,
    },

    #[error("invalid settings")]
    Settings(#[from] ::config::ConfigError),
}

impl ClientError {
    pub(crate) fn transport(context: &'static str, source: TransportError) -> Self {
        ClientError::Transport { context, source }
    }

    /// Folds a close failure into the result of the operation that owned the connection.
    pub(crate) fn combine_close<T>(
        result: Result<T>,
        close: std::result::Result<(), TransportError>,
        context: &'static str,
    ) -> Result<T> {
        match (result, close) {
            (result, Ok(())) => result,
            (Ok(_), Err(e)) => Err(ClientError::transport(context, e)),
            (Err(primary), Err(e)) => Err(ClientError::CloseFailed {
                primary: Box::new(primary),
                close: e,
            }),
        }
    }
}
