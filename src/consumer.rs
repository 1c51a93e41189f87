// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Loop
//!
//! Long-running consumption of a subscription's main queue. The loop moves through
//! `Idle -> Bound -> Running -> Stopped`:
//!
//! 1. binding declares the exchanges and the retry, main and failed queues
//! 2. running registers the consumer and polls it with a bounded wait; timeouts and
//!    interrupted waits only send the loop back to its stop check
//! 3. every delivery is handed to the subscription, then routed:
//!    - success: ack
//!    - failure with `attempt <= max_retries`: republish to the retry exchange, ack
//!    - failure with `attempt > max_retries`: republish to the failed exchange, ack
//! 4. the loop stops at the top of an iteration once the supervisor says so
//!
//! Each delivery is acked exactly once, after its routing decision, so a crash in
//! between makes the broker redeliver it. Handler failures never leave this module.

use crate::{
    broker::{Broker, Delivery, WaitOutcome},
    config::ConsumerOptions,
    errors::AmqpError,
    message::SubMessage,
    otel,
    subscription::Subscription,
    supervisor::Supervisor,
    topology::{QueueSet, Topology},
};
use futures_util::FutureExt;
use opentelemetry::trace::{Span, Status};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error, info, warn};

/// Lifecycle of a consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Bound,
    Running,
    Stopped,
}

/// Where a handled delivery ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled successfully and acked
    Handled,
    /// Sent to the retry exchange for a delayed redelivery
    Retried,
    /// Sent to the failed exchange
    Failed,
}

pub struct ConsumerLoop {
    broker: Arc<dyn Broker>,
    subscription: Arc<dyn Subscription>,
    options: ConsumerOptions,
    bound: Option<(Topology, QueueSet)>,
    state: ConsumerState,
}

impl ConsumerLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        subscription: Arc<dyn Subscription>,
        options: ConsumerOptions,
    ) -> ConsumerLoop {
        ConsumerLoop {
            broker,
            subscription,
            options,
            bound: None,
            state: ConsumerState::Idle,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Declares the topology and the queue set of the subscription.
    ///
    /// Calling it again once bound is a no-op.
    pub async fn bind(&mut self) -> Result<(), AmqpError> {
        if self.bound.is_some() {
            return Ok(());
        }

        let topology =
            Topology::declare(self.broker.as_ref(), self.subscription.exchange_name()).await?;
        let queues = topology.queue_set(
            self.subscription.queue_name(),
            self.subscription.routing_key(),
            retry_ttl_millis(&self.options),
        );
        queues.declare_all(self.broker.as_ref()).await?;

        debug!(
            queue = queues.main_queue(),
            routing_key = self.subscription.routing_key(),
            "queues bound"
        );

        self.bound = Some((topology, queues));
        self.state = ConsumerState::Bound;
        Ok(())
    }

    /// Consumes the main queue until `supervisor` asks to stop.
    ///
    /// Returns an error when the broker fails outside of a wait (declaration, publish or
    /// ack failures); the loop is then `Stopped` as well.
    pub async fn run(&mut self, supervisor: &mut Supervisor) -> Result<(), AmqpError> {
        self.bind().await?;
        let (topology, queues) = match &self.bound {
            Some(bound) => bound.clone(),
            None => return Err(AmqpError::InternalError),
        };

        let result = self.poll(&topology, &queues, supervisor).await;
        self.state = ConsumerState::Stopped;

        info!(
            queue = queues.main_queue(),
            remaining_budget = supervisor.remaining(),
            shutdown = supervisor.shutdown_token().is_cancelled(),
            "consumer stopped"
        );

        result
    }

    async fn poll(
        &mut self,
        topology: &Topology,
        queues: &QueueSet,
        supervisor: &mut Supervisor,
    ) -> Result<(), AmqpError> {
        self.broker
            .consume(queues.main_queue(), self.options.prefetch)
            .await?;
        self.state = ConsumerState::Running;
        info!(queue = queues.main_queue(), "consumer running");

        loop {
            if supervisor.should_stop() {
                return Ok(());
            }

            match self.broker.wait(self.options.wait_timeout).await {
                WaitOutcome::Delivered(delivery) => {
                    self.handle(topology, delivery, supervisor).await?;
                }
                WaitOutcome::TimedOut => {}
                WaitOutcome::Interrupted(reason) => {
                    debug!(reason, "wait interrupted");
                }
                WaitOutcome::Closed => {
                    warn!(queue = queues.main_queue(), "consumer closed by the broker");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the handler on one delivery and routes it.
    pub(crate) async fn handle(
        &self,
        topology: &Topology,
        delivery: Delivery,
        supervisor: &mut Supervisor,
    ) -> Result<Outcome, AmqpError> {
        let msg = SubMessage::new(delivery);
        let attempt = msg.retry_count();
        let mut span = otel::new_span(&msg.delivery().properties, msg.routing_key());

        debug!(
            routing_key = msg.routing_key(),
            attempt, "received message"
        );

        let result = AssertUnwindSafe(self.subscription.handle(&msg))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("handler panicked".to_owned()),
        };

        let Some(reason) = failure else {
            supervisor.record_success();
            self.ack(&msg).await?;
            span.set_status(Status::Ok);
            debug!("message successfully processed");
            return Ok(Outcome::Handled);
        };

        supervisor.record_failure();
        span.set_status(Status::Error {
            description: Cow::from(reason.clone()),
        });

        let (exchange, outcome) = if attempt > self.options.max_retries {
            error!(
                reason,
                attempt,
                routing_key = msg.routing_key(),
                "too many attempts, sending to failed queue"
            );
            (topology.failed_exchange(), Outcome::Failed)
        } else {
            warn!(
                reason,
                attempt,
                routing_key = msg.routing_key(),
                "error while handling message, retrying later"
            );
            (topology.retry_exchange(), Outcome::Retried)
        };

        let delivery = msg.delivery();
        self.broker
            .publish(
                exchange,
                &delivery.routing_key,
                &delivery.data,
                delivery.properties.clone(),
            )
            .await?;
        self.ack(&msg).await?;

        Ok(outcome)
    }

    async fn ack(&self, msg: &SubMessage) -> Result<(), AmqpError> {
        self.broker.ack(msg.delivery().delivery_tag).await
    }
}

pub(crate) fn retry_ttl_millis(options: &ConsumerOptions) -> i32 {
    i32::try_from(options.retry_ttl.as_millis()).unwrap_or(i32::MAX)
}
