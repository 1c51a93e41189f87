// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Abstraction
//!
//! The consumer loop and the failed-message requeuer only talk to the broker through
//! the `Broker` trait: declare, bind, publish, consume, a bounded wait and ack. The
//! `AmqpBroker` implementation drives a lapin channel; the single consumer registered
//! on it is polled by `wait`, which turns the lapin stream into an explicit
//! `WaitOutcome` instead of timeouts surfacing as errors.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Consumer,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error};

#[cfg(test)]
use mockall::automock;

/// A message handed out by the broker, detached from the client that received it.
///
/// Acknowledgement goes through `Broker::ack` with `delivery_tag`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
        }
    }
}

/// Result of one bounded wait on the registered consumer.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// A delivery arrived before the timeout
    Delivered(Delivery),
    /// Nothing arrived within the timeout
    TimedOut,
    /// The wait was interrupted by a transient client condition
    Interrupted(String),
    /// No consumer is registered anymore, nothing will ever be delivered
    Closed,
}

/// Broker operations the retry topology is built from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares an exchange. Redeclaring with identical parameters is a no-op.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue. Redeclaring with identical parameters is a no-op.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    /// Binds a queue to an exchange with a routing key pattern.
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Publishes a payload to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Registers the consumer whose deliveries `wait` yields.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<(), AmqpError>;

    /// Waits at most `timeout` for the next delivery.
    async fn wait(&self, timeout: Duration) -> WaitOutcome;

    /// Acknowledges one delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;
}

/// `Broker` implementation backed by a lapin channel.
pub struct AmqpBroker {
    channel: Arc<Channel>,
    consumer: Mutex<Option<Consumer>>,
}

impl AmqpBroker {
    /// Creates a broker over an already opened channel.
    ///
    /// # Returns
    /// An Arc-wrapped AmqpBroker instance for sharing between publisher and consumer
    pub fn new(channel: Arc<Channel>) -> Arc<AmqpBroker> {
        Arc::new(AmqpBroker {
            channel,
            consumer: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::from(def.arguments()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange, routing_key, "error publishing message"
                );
                Err(AmqpError::PublishingError(exchange.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<(), AmqpError> {
        if let Err(err) = self
            .channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "error to configure qos");
            return Err(AmqpError::QoSDeclarationError(queue.to_owned()));
        }

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        *self.consumer.lock().await = Some(consumer);
        debug!("consumer registered on queue: {}", queue);

        Ok(())
    }

    async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let mut guard = self.consumer.lock().await;
        let Some(consumer) = guard.as_mut() else {
            return WaitOutcome::Closed;
        };

        match tokio::time::timeout(timeout, consumer.next()).await {
            Err(_) => WaitOutcome::TimedOut,
            Ok(Some(Ok(delivery))) => WaitOutcome::Delivered(delivery.into()),
            Ok(Some(Err(err))) => WaitOutcome::Interrupted(err.to_string()),
            Ok(None) => {
                *guard = None;
                WaitOutcome::Closed
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                Err(AmqpError::AckMessageError(delivery_tag))
            }
            _ => Ok(()),
        }
    }
}
