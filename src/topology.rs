// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Topology
//!
//! Every logical channel is made of three durable topic exchanges:
//! - `{base}`: where publishers send messages
//! - `{base}.retry`: failed deliveries waiting for their delayed redelivery
//! - `{base}.failed`: deliveries that used up their retry budget
//!
//! Each consuming queue `Q` bound with a pattern gets a matching queue set:
//! `Q` on the main exchange, `Q@retry` on the retry exchange (TTL plus dead-lettering
//! back to the main exchange) and `Q@failed` on the failed exchange.
//!
//! All declarations are idempotent, so they run on every process start.

use crate::{
    broker::Broker,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{failed_queue_name, retry_queue_name, QueueBinding, QueueDefinition},
};
use tracing::debug;

/// The three exchanges of a logical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    main: String,
    retry: String,
    failed: String,
}

impl Topology {
    /// Derives the exchange names for `base` without touching the broker.
    pub fn new(base: &str) -> Topology {
        Topology {
            main: base.to_owned(),
            retry: format!("{base}.retry"),
            failed: format!("{base}.failed"),
        }
    }

    /// Derives the exchange names for `base` and declares them.
    ///
    /// A broker rejection (for instance an existing exchange of another type) is
    /// returned as `AmqpError::DeclareExchangeError` and is not retried.
    pub async fn declare(broker: &dyn Broker, base: &str) -> Result<Topology, AmqpError> {
        let topology = Topology::new(base);

        for def in topology.exchange_definitions() {
            broker.declare_exchange(&def).await?;
        }

        debug!(exchange = base, "topology declared");
        Ok(topology)
    }

    pub fn exchange(&self) -> &str {
        &self.main
    }

    pub fn retry_exchange(&self) -> &str {
        &self.retry
    }

    pub fn failed_exchange(&self) -> &str {
        &self.failed
    }

    fn exchange_definitions(&self) -> [ExchangeDefinition; 3] {
        [&self.main, &self.retry, &self.failed]
            .map(|name| ExchangeDefinition::new(name).topic().durable())
    }

    /// The queue definitions and bindings of `queue` for `pattern`.
    pub fn queue_set(&self, queue: &str, pattern: &str, retry_ttl_ms: i32) -> QueueSet {
        let retry_name = retry_queue_name(queue);
        let failed_name = failed_queue_name(queue);

        QueueSet {
            retry: (
                QueueDefinition::new(&retry_name)
                    .durable()
                    .ttl(retry_ttl_ms)
                    .dead_letter_exchange(&self.main),
                QueueBinding::new(&retry_name)
                    .exchange(&self.retry)
                    .routing_key(pattern),
            ),
            main: (
                QueueDefinition::new(queue).durable(),
                QueueBinding::new(queue)
                    .exchange(&self.main)
                    .routing_key(pattern),
            ),
            failed: (
                QueueDefinition::new(&failed_name).durable(),
                QueueBinding::new(&failed_name)
                    .exchange(&self.failed)
                    .routing_key(pattern),
            ),
        }
    }
}

/// Queue definitions and their bindings for one (queue, pattern) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSet {
    pub retry: (QueueDefinition, QueueBinding),
    pub main: (QueueDefinition, QueueBinding),
    pub failed: (QueueDefinition, QueueBinding),
}

impl QueueSet {
    /// Declares and binds the retry, main and failed queues, in that order.
    pub async fn declare_all(&self, broker: &dyn Broker) -> Result<(), AmqpError> {
        declare_one(broker, &self.retry).await?;
        declare_one(broker, &self.main).await?;
        declare_one(broker, &self.failed).await
    }

    /// Declares and binds the main and failed queues, skipping the retry queue.
    pub async fn declare_main_and_failed(&self, broker: &dyn Broker) -> Result<(), AmqpError> {
        declare_one(broker, &self.main).await?;
        declare_one(broker, &self.failed).await
    }

    pub fn main_queue(&self) -> &str {
        self.main.0.name()
    }

    pub fn retry_queue(&self) -> &str {
        self.retry.0.name()
    }

    pub fn failed_queue(&self) -> &str {
        self.failed.0.name()
    }
}

async fn declare_one(
    broker: &dyn Broker,
    (def, binding): &(QueueDefinition, QueueBinding),
) -> Result<(), AmqpError> {
    broker.declare_queue(def).await?;
    broker.bind_queue(binding).await
}
