// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Demo publisher and subscriber for the `master` exchange.

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use rabbitmq_pubsub::{
    channel::new_amqp_channel, spawn_signal_listener, AmqpBroker, AmqpError, Broker,
    ConsumerLoop, ConsumerOptions, HandlerError, Publisher, RabbitMQConfigs, RetryRequeuer,
    SubMessage, Subscription, Supervisor,
};
use serde_json::json;
use std::{process::ExitCode, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pubsub-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    rabbitmq: RabbitMQArgs,

    /// Base name of the exchanges
    #[arg(long, env = "RABBITMQ_EXCHANGE", default_value = "master")]
    exchange: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RabbitMQArgs {
    #[arg(long = "rabbitmq-host", env = "RABBITMQ_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long = "rabbitmq-port", env = "RABBITMQ_PORT", default_value_t = 5672)]
    port: u16,

    #[arg(long = "rabbitmq-user", env = "RABBITMQ_USER", default_value = "guest")]
    user: String,

    #[arg(long = "rabbitmq-password", env = "RABBITMQ_PASSWORD", default_value = "guest")]
    password: String,

    #[arg(long = "rabbitmq-vhost", env = "RABBITMQ_VHOST", default_value = "/")]
    vhost: String,
}

impl From<RabbitMQArgs> for RabbitMQConfigs {
    fn from(args: RabbitMQArgs) -> Self {
        RabbitMQConfigs {
            host: args.host,
            port: args.port,
            user: args.user,
            password: args.password,
            vhost: args.vhost,
            ..RabbitMQConfigs::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publishes a user.created and a user.deleted message
    PublishDemo,
    /// Consumes user.* messages from the user-monitor queue
    SubscribeDemo {
        /// Requeue the quarantined messages instead of consuming
        #[arg(long)]
        retry_failed: bool,
    },
}

/// Prints every user event it receives.
struct UserMonitor {
    exchange: String,
}

#[async_trait]
impl Subscription for UserMonitor {
    fn exchange_name(&self) -> &str {
        &self.exchange
    }

    fn queue_name(&self) -> &str {
        "user-monitor"
    }

    fn routing_key(&self) -> &str {
        "user.*"
    }

    async fn handle(&self, msg: &SubMessage) -> Result<(), HandlerError> {
        let message = msg.message()?;
        info!(
            routing_key = msg.routing_key(),
            attempt = msg.retry_count(),
            message = %String::from_utf8_lossy(&message.encode()?),
            "subscriber received message"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = err.to_string(), "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AmqpError> {
    let cfg = RabbitMQConfigs::from(cli.rabbitmq);
    let (_conn, channel) = new_amqp_channel(&cfg).await?;
    let broker: Arc<dyn Broker> = AmqpBroker::new(channel);

    match cli.command {
        Command::PublishDemo => publish_demo(broker, &cli.exchange).await,
        Command::SubscribeDemo { retry_failed } => {
            let subscription = Arc::new(UserMonitor {
                exchange: cli.exchange,
            });
            if retry_failed {
                retry_failed_demo(broker, subscription).await
            } else {
                subscribe_demo(broker, subscription).await
            }
        }
    }
}

async fn publish_demo(broker: Arc<dyn Broker>, exchange: &str) -> Result<(), AmqpError> {
    let publisher = Publisher::declare(broker, exchange).await?;

    publisher
        .publish(
            json!({"id": uuid::Uuid::new_v4().simple().to_string(), "name": "mylxsw"}),
            "user.created",
        )
        .await?;
    publisher
        .publish(
            json!({"id": uuid::Uuid::new_v4().simple().to_string()}),
            "user.deleted",
        )
        .await?;

    info!("messages published");
    Ok(())
}

async fn subscribe_demo(
    broker: Arc<dyn Broker>,
    subscription: Arc<UserMonitor>,
) -> Result<(), AmqpError> {
    let token = CancellationToken::new();
    let signals = spawn_signal_listener(token.clone());

    let mut supervisor = Supervisor::new(token);
    let result = ConsumerLoop::new(broker, subscription, ConsumerOptions::default())
        .run(&mut supervisor)
        .await;

    signals.abort();
    result
}

async fn retry_failed_demo(
    broker: Arc<dyn Broker>,
    subscription: Arc<UserMonitor>,
) -> Result<(), AmqpError> {
    let requeuer =
        RetryRequeuer::declare(broker, subscription.exchange_name(), ConsumerOptions::default())
            .await?;

    let report = requeuer
        .drain(subscription.queue_name(), subscription.routing_key(), |msg| {
            subscription.should_requeue(msg)
        })
        .await?;

    info!(
        requeued = report.requeued,
        discarded = report.discarded,
        "failed messages processed"
    );
    Ok(())
}
