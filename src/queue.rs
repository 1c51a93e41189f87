// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions for the Retry Topology
//!
//! This module provides the queue and binding definitions used by the consumer and the
//! failed-message requeuer. Every logical queue `Q` comes with two companions: `Q@retry`,
//! whose expired messages are dead-lettered back to the main exchange, and `Q@failed`,
//! a terminal quarantine.

use lapin::types::{AMQPValue, LongInt, LongString, ShortString};
use std::collections::BTreeMap;

/// Queue argument naming the exchange expired or rejected messages are sent to
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument holding the per-message TTL in milliseconds
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

/// Name of the retry queue companion of `queue`.
pub fn retry_queue_name(queue: &str) -> String {
    format!("{queue}@retry")
}

/// Name of the failed queue companion of `queue`.
pub fn failed_queue_name(queue: &str) -> String {
    format!("{queue}@failed")
}

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) dead_letter_exchange: Option<String>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is non-durable, with no TTL and no dead-lettering.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue.
    ///
    /// # Parameters
    /// * `ttl` - TTL in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sends expired messages to `exchange`, keeping their routing key.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_ttl(&self) -> Option<i32> {
        self.ttl
    }

    pub fn dead_letter_target(&self) -> Option<&str> {
        self.dead_letter_exchange.as_deref()
    }

    /// Builds the `x-` declaration arguments of the queue.
    pub(crate) fn arguments(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut args = BTreeMap::new();

        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.clone())),
            );
        }

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        args
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    /// These should be set using the `exchange` and `routing_key` methods.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key pattern for the binding.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn pattern(&self) -> &str {
        &self.routing_key
    }
}
