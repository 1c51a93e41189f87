// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Topic pub/sub over RabbitMQ with delayed retries, quarantine of failed messages and a
//! consumer loop meant to be restarted by a process supervisor.

mod otel;
#[cfg(test)]
mod testing;

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod requeuer;
pub mod retry;
pub mod routing;
pub mod subscription;
pub mod supervisor;
pub mod topology;

pub use broker::{AmqpBroker, Broker, Delivery, WaitOutcome};
pub use config::{ConsumerOptions, RabbitMQConfigs};
pub use consumer::{ConsumerLoop, ConsumerState};
pub use errors::{AmqpError, HandlerError};
pub use message::{Message, SubMessage};
pub use publisher::Publisher;
pub use requeuer::{DrainReport, RetryRequeuer};
pub use subscription::Subscription;
pub use supervisor::{spawn_signal_listener, Supervisor};
pub use topology::Topology;
