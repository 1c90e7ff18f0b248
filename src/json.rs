//!
//! JSON payload codec building [`Message`]s out of serde values.
//!
use crate::error::Result;
use crate::message::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Metadata key holding the name of the encoded value.
pub const NAME_METADATA_KEY: &str = "name";

type NewUuid = Box<dyn Fn() -> String + Send + Sync>;

type GenerateName = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Serializes commands and events to JSON payloads, tagging each message with the value's name.
///
/// By default UUIDs are random v4 identifiers and names are the fully qualified Rust type name.
#[derive(Default)]
pub struct JsonMarshaler {
    new_uuid: Option<NewUuid>,
    generate_name: Option<GenerateName>,
}

impl JsonMarshaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uuid_generator(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.new_uuid = Some(Box::new(f));
        self
    }

    /// Overrides naming; `f` receives the fully qualified type name.
    pub fn with_name_generator(
        mut self,
        f: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.generate_name = Some(Box::new(f));
        self
    }

    pub fn marshal<T: Serialize>(&self, value: &T) -> Result<Message> {
        let payload = serde_json::to_vec(value)?;
        let mut message = Message::new(self.new_uuid(), payload);
        message.metadata.set(NAME_METADATA_KEY, self.name::<T>());
        Ok(message)
    }

    pub fn unmarshal<T: DeserializeOwned>(&self, message: &Message) -> Result<T> {
        Ok(serde_json::from_slice(&message.payload)?)
    }

    pub fn name<T>(&self) -> String {
        let type_name = std::any::type_name::<T>();
        match &self.generate_name {
            Some(generate) => generate(type_name),
            None => type_name.to_owned(),
        }
    }

    pub fn name_from_message<'a>(&self, message: &'a Message) -> &'a str {
        message.metadata.get(NAME_METADATA_KEY)
    }

    fn new_uuid(&self) -> String {
        match &self.new_uuid {
            Some(generate) => generate(),
            None => uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OrderCreated {
        order_id: String,
        amount: u64,
    }

    #[test]
    fn test_marshal_sets_name_and_uuid() -> Result<()> {
        let marshaler = JsonMarshaler::new();
        let event = OrderCreated {
            order_id: "o-1".to_owned(),
            amount: 250,
        };
        let message = marshaler.marshal(&event)?;
        assert!(!message.uuid.is_empty());
        assert!(marshaler
            .name_from_message(&message)
            .ends_with("OrderCreated"));

        let decoded: OrderCreated = marshaler.unmarshal(&message)?;
        assert_eq!(decoded, event);
        Ok(())
    }

    #[test]
    fn test_custom_generators() -> Result<()> {
        let marshaler = JsonMarshaler::new()
            .with_uuid_generator(|| "fixed".to_owned())
            .with_name_generator(|full| full.rsplit("::").next().unwrap_or(full).to_owned());
        let message = marshaler.marshal(&OrderCreated {
            order_id: "o-2".to_owned(),
            amount: 1,
        })?;
        assert_eq!(message.uuid, "fixed");
        assert_eq!(marshaler.name_from_message(&message), "OrderCreated");
        Ok(())
    }

    #[test]
    fn test_unmarshal_invalid_payload() {
        let marshaler = JsonMarshaler::new();
        let message = Message::new("m1", "not json");
        let result: Result<OrderCreated> = marshaler.unmarshal(&message);
        assert!(matches!(result, Err(ClientError::Payload(_))));
    }
}
