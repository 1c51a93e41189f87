// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of the AMQP connection and the channel used by a
//! publisher or consumer process.

use crate::{config::RabbitMQConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Creates a new AMQP channel for communication with RabbitMQ.
///
/// This function establishes a connection to RabbitMQ using the settings in `cfg`,
/// then creates a channel on that connection. Both are wrapped in Arc so the
/// connection outlives every user of the channel.
///
/// # Parameters
/// * `cfg` - Connection details like host, port, credentials and vhost
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   A tuple containing the connection and channel on success, or an error on failure.
///
/// # Example
/// ```no_run
/// # async fn run() -> Result<(), rabbitmq_pubsub::errors::AmqpError> {
/// use rabbitmq_pubsub::{channel::new_amqp_channel, config::RabbitMQConfigs};
///
/// let (_conn, _channel) = new_amqp_channel(&RabbitMQConfigs::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn new_amqp_channel(
    cfg: &RabbitMQConfigs,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!(host = cfg.host, port = cfg.port, "creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let conn = match Connection::connect_uri(cfg.amqp_uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
