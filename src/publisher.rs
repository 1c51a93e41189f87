// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishes message envelopes to the main exchange of a topology. Messages are marked
//! persistent and carry the current OpenTelemetry context in their headers. Publishing
//! is fire-and-forget: durability is left to the broker.

use crate::{
    broker::Broker, errors::AmqpError, message::Message, otel::inject_context, topology::Topology,
};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode asking the broker to persist the message
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishes messages to the main exchange of a topology.
pub struct Publisher {
    broker: Arc<dyn Broker>,
    topology: Topology,
}

impl Publisher {
    /// Declares the topology rooted at `exchange` and returns a publisher for it.
    pub async fn declare(broker: Arc<dyn Broker>, exchange: &str) -> Result<Publisher, AmqpError> {
        let topology = Topology::declare(broker.as_ref(), exchange).await?;
        Ok(Publisher::new(broker, topology))
    }

    /// Creates a publisher over an already declared topology.
    pub fn new(broker: Arc<dyn Broker>, topology: Topology) -> Publisher {
        Publisher { broker, topology }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Publishes `message` to the main exchange under `routing_key`.
    ///
    /// `message` is either a `Message` or something convertible into one, such as a
    /// `Record` or a `serde_json::Value` holding an object. A value that cannot be
    /// converted fails with `AmqpError::InvalidMessage` and nothing is sent.
    ///
    /// # Returns
    /// The published envelope
    pub async fn publish<M>(&self, message: M, routing_key: &str) -> Result<Message, AmqpError>
    where
        M: TryInto<Message>,
        M::Error: Into<AmqpError>,
    {
        let message: Message = message.try_into().map_err(Into::into)?;
        let payload = message.encode()?;

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        inject_context(&Context::current(), &mut headers);

        self.broker
            .publish(
                self.topology.exchange(),
                routing_key,
                &payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(message.id()))
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_headers(FieldTable::from(headers)),
            )
            .await?;

        debug!(
            id = message.id(),
            exchange = self.topology.exchange(),
            routing_key,
            "message published"
        );

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broker::MockBroker, message::Record, testing::MemoryBroker};
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_record_is_wrapped() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = Publisher::declare(broker.clone(), "master").await.unwrap();

        let mut record = Record::new();
        record.insert("id".to_owned(), json!("x1"));
        let sent = publisher.publish(record.clone(), "user.created").await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, "master");
        assert_eq!(published[0].routing_key, "user.created");
        assert_eq!(published[0].properties.delivery_mode(), &Some(2));
        assert_eq!(
            published[0].properties.message_id(),
            &Some(ShortString::from(sent.id()))
        );

        let decoded = Message::decode(&published[0].data).unwrap();
        assert_eq!(decoded.body(), &record);
        assert_eq!(decoded.id(), sent.id());
    }

    #[tokio::test]
    async fn test_publish_existing_message_keeps_id() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = Publisher::declare(broker.clone(), "master").await.unwrap();
        let message = Message::try_from(json!({"id": "x2"})).unwrap();

        let sent = publisher.publish(message.clone(), "user.deleted").await.unwrap();

        assert_eq!(sent, message);
    }

    #[tokio::test]
    async fn test_publish_rejects_non_object() {
        let mut mock = MockBroker::new();
        mock.expect_publish().never();

        let publisher = Publisher::new(Arc::new(mock), Topology::new("master"));
        let result = publisher.publish(json!("not a record"), "user.created").await;

        assert!(matches!(result, Err(AmqpError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_publish_error_is_surfaced() {
        let mut mock = MockBroker::new();
        mock.expect_publish()
            .times(1)
            .returning(|exchange, _, _, _| Err(AmqpError::PublishingError(exchange.to_owned())));

        let publisher = Publisher::new(Arc::new(mock), Topology::new("master"));
        let result = publisher.publish(json!({"id": "x3"}), "user.created").await;

        assert_eq!(result, Err(AmqpError::PublishingError("master".to_owned())));
    }
}
