// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriptions
//!
//! A subscription names what to consume (exchange, queue, routing key pattern) and how
//! to handle it. The consumer loop calls `handle` for every delivery of the main queue;
//! the failed-message requeuer asks `should_requeue` for every quarantined message.

use crate::{errors::HandlerError, message::SubMessage};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Subscription: Send + Sync {
    /// Base name of the exchanges to bind to
    fn exchange_name(&self) -> &str;

    /// Main queue; its retry and failed companions are derived from it
    fn queue_name(&self) -> &str;

    /// Topic pattern the queues are bound with, e.g. `user.*`
    fn routing_key(&self) -> &str;

    /// Handles one delivery. `msg.retry_count()` tells how many attempts came before.
    ///
    /// An `Err` (or a panic) schedules a delayed retry, or quarantines the message once
    /// its retries are used up.
    async fn handle(&self, msg: &SubMessage) -> Result<(), HandlerError>;

    /// Decides whether a quarantined message goes back to the main exchange.
    ///
    /// Returning `false` discards the message. The default logs it and requeues it.
    fn should_requeue(&self, msg: &SubMessage) -> bool {
        let id = msg
            .message()
            .map(|m| m.id().to_owned())
            .unwrap_or_default();

        info!(
            id,
            routing_key = msg.routing_key(),
            body = %String::from_utf8_lossy(msg.body()),
            "requeuing failed message"
        );

        true
    }
}
