// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! A published message is a JSON record wrapped with a generated identifier:
//!
//! ```json
//! {"body":{"id":"x1"},"__id":"20250101120000-6f9619ff8b86d011b42d00c04fc964ff"}
//! ```
//!
//! The identifier is prefixed with the creation time so ids sort roughly by age. The
//! encoding does not escape slashes or non-ASCII characters.

use crate::{broker::Delivery, errors::AmqpError, retry};
use chrono::Utc;
use lapin::types::AMQPValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Header carrying the routing key a message was first published with
pub const AMQP_HEADERS_ORIG_ROUTING_KEY: &str = "x-orig-routing-key";

/// Structured record carried by a message.
pub type Record = Map<String, Value>;

/// An immutable record plus its unique identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    body: Record,
    #[serde(rename = "__id", default)]
    id: String,
}

impl Message {
    /// Wraps `body` with a freshly generated identifier.
    pub fn new(body: Record) -> Message {
        Message {
            body,
            id: generate_id(),
        }
    }

    /// Builds a message from any serializable value that serializes to a JSON object.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Message, AmqpError> {
        let value = serde_json::to_value(value)
            .map_err(|err| AmqpError::InvalidMessage(err.to_string()))?;

        Message::try_from(value)
    }

    pub fn body(&self) -> &Record {
        &self.body
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn encode(&self) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(self).map_err(|err| AmqpError::InvalidMessage(err.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Message, AmqpError> {
        serde_json::from_slice(data).map_err(|_| AmqpError::ParsePayloadError)
    }
}

impl From<Record> for Message {
    fn from(body: Record) -> Self {
        Message::new(body)
    }
}

impl TryFrom<Value> for Message {
    type Error = AmqpError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(body) => Ok(Message::new(body)),
            other => Err(AmqpError::InvalidMessage(format!(
                "expected a JSON object, got `{other}`"
            ))),
        }
    }
}

fn generate_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple()
    )
}

/// A received delivery as seen by handlers and requeue filters.
#[derive(Debug, Clone)]
pub struct SubMessage {
    delivery: Delivery,
    retry_count: u64,
}

impl SubMessage {
    pub fn new(delivery: Delivery) -> SubMessage {
        let retry_count = retry::attempt_count(&delivery.properties);
        SubMessage {
            delivery,
            retry_count,
        }
    }

    /// Number of times the broker dead-lettered this message back for another attempt.
    pub fn retry_count(&self) -> u64 {
        self.retry_count
    }

    pub fn routing_key(&self) -> &str {
        &self.delivery.routing_key
    }

    /// The `x-orig-routing-key` header when present, else the delivery routing key.
    pub fn original_routing_key(&self) -> &str {
        self.delivery
            .properties
            .headers()
            .as_ref()
            .and_then(|headers| headers.inner().get(AMQP_HEADERS_ORIG_ROUTING_KEY))
            .and_then(|value| match value {
                AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok(),
                AMQPValue::ShortString(v) => Some(v.as_str()),
                _ => None,
            })
            .unwrap_or(self.routing_key())
    }

    pub fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    /// Decodes the envelope carried by the delivery.
    pub fn message(&self) -> Result<Message, AmqpError> {
        Message::decode(&self.delivery.data)
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }
}
