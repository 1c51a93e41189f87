// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Failed Message Requeuer
//!
//! One-shot maintenance pass over a failed queue. Every quarantined message accepted by
//! the filter is republished to the main exchange with its original routing key and its
//! dead-lettering history removed, so it gets a full retry budget again. Rejected
//! messages are dropped. Every delivery is acked once either way.
//!
//! Unlike the consumer loop, the pass ends at the first wait that yields nothing: it
//! processes what is in the queue now and returns.

use crate::{
    broker::{Broker, WaitOutcome},
    config::ConsumerOptions,
    consumer::retry_ttl_millis,
    errors::AmqpError,
    message::SubMessage,
    retry::clear_history,
    topology::Topology,
};
use std::sync::Arc;
use tracing::{debug, info};

/// What a drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages republished to the main exchange
    pub requeued: usize,
    /// Messages acked without being republished
    pub discarded: usize,
}

pub struct RetryRequeuer {
    broker: Arc<dyn Broker>,
    topology: Topology,
    options: ConsumerOptions,
}

impl RetryRequeuer {
    /// Declares the topology rooted at `exchange` and returns a requeuer for it.
    pub async fn declare(
        broker: Arc<dyn Broker>,
        exchange: &str,
        options: ConsumerOptions,
    ) -> Result<RetryRequeuer, AmqpError> {
        let topology = Topology::declare(broker.as_ref(), exchange).await?;
        Ok(RetryRequeuer::new(broker, topology, options))
    }

    pub fn new(broker: Arc<dyn Broker>, topology: Topology, options: ConsumerOptions) -> Self {
        RetryRequeuer {
            broker,
            topology,
            options,
        }
    }

    /// Requeues every message of `queue`'s failed queue.
    pub async fn drain_all(&self, queue: &str, pattern: &str) -> Result<DrainReport, AmqpError> {
        self.drain(queue, pattern, |_| true).await
    }

    /// Drains `queue`'s failed queue, requeuing the messages `filter` accepts.
    pub async fn drain<F>(
        &self,
        queue: &str,
        pattern: &str,
        mut filter: F,
    ) -> Result<DrainReport, AmqpError>
    where
        F: FnMut(&SubMessage) -> bool,
    {
        let queues = self
            .topology
            .queue_set(queue, pattern, retry_ttl_millis(&self.options));
        queues.declare_main_and_failed(self.broker.as_ref()).await?;

        self.broker
            .consume(queues.failed_queue(), self.options.prefetch)
            .await?;

        let mut report = DrainReport::default();

        loop {
            let delivery = match self.broker.wait(self.options.wait_timeout).await {
                WaitOutcome::Delivered(delivery) => delivery,
                WaitOutcome::TimedOut | WaitOutcome::Closed => break,
                WaitOutcome::Interrupted(reason) => {
                    debug!(reason, "wait interrupted, ending drain");
                    break;
                }
            };

            let msg = SubMessage::new(delivery);
            if filter(&msg) {
                let delivery = msg.delivery();
                self.broker
                    .publish(
                        self.topology.exchange(),
                        &delivery.routing_key,
                        &delivery.data,
                        clear_history(&delivery.properties),
                    )
                    .await?;
                report.requeued += 1;
            } else {
                debug!(routing_key = msg.routing_key(), "discarding failed message");
                report.discarded += 1;
            }

            self.broker.ack(msg.delivery().delivery_tag).await?;
        }

        info!(
            queue = queues.failed_queue(),
            requeued = report.requeued,
            discarded = report.discarded,
            "no more pending failed messages"
        );

        Ok(report)
    }
}
