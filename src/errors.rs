// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Implementation
//!
//! This module provides the error types shared by the topology, publisher, consumer
//! loop and failed-message requeuer. The `AmqpError` enum represents every broker or
//! codec failure; failures raised by user handlers are carried separately as
//! `HandlerError` because they never escape the consumer loop.

use std::convert::Infallible;
use thiserror::Error;

/// Error returned by a user-supplied message handler.
///
/// Any error type can be boxed into it with `?` or `.into()`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Each variant provides specific context about which operation failed. Declaration
/// variants are fatal at startup and are never retried.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Value given to the publisher cannot be turned into a message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Error publishing a message
    #[error("failure to publish to exchange `{0}`")]
    PublishingError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),
}

impl From<Infallible> for AmqpError {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}
