// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection and Consumer Configuration
//!
//! Settings used to reach the broker and the knobs of the retry topology. The
//! defaults reproduce a local RabbitMQ with the `guest` account and the fixed retry
//! constants (30s retry delay, 3 retries, 3s poll wait).

use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use std::time::Duration;

/// Connection settings for the RabbitMQ broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Name reported to the broker for this connection
    pub connection_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            connection_name: "rabbitmq-pubsub".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// Builds the AMQP URI for these settings.
    ///
    /// Credentials and vhost are carried as structured fields, so reserved characters
    /// in them never change where the connection goes.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: AMQPQueryString::default(),
        }
    }
}

/// Per-consumer retry topology settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// A failed delivery whose attempt count exceeds this value is quarantined
    pub max_retries: u64,
    /// Time a message waits in the retry queue before it is dead-lettered back
    pub retry_ttl: Duration,
    /// Bounded wait used by each poll iteration
    pub wait_timeout: Duration,
    /// QoS prefetch applied to the consumer
    pub prefetch: u16,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            max_retries: 3,
            retry_ttl: Duration::from_millis(30_000),
            wait_timeout: Duration::from_secs(3),
            prefetch: 1,
        }
    }
}
