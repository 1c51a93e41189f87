// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker and stub subscriptions for tests.
//!
//! The broker keeps enough of RabbitMQ's behaviour to exercise the retry topology:
//! topic routing, idempotent declarations, manual acks and TTL expiry through
//! `expire_queue`, which dead-letters messages and maintains `x-death` the way the
//! broker does.

use crate::{
    broker::{Broker, Delivery, WaitOutcome},
    errors::{AmqpError, HandlerError},
    exchange::ExchangeDefinition,
    message::{Message, SubMessage},
    queue::{QueueBinding, QueueDefinition},
    retry::{AMQP_HEADERS_COUNT, AMQP_HEADERS_X_DEATH},
    subscription::Subscription,
};
use async_trait::async_trait;
use lapin::{
    types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString},
    BasicProperties,
};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
}

#[derive(Default)]
struct State {
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
    messages: HashMap<String, VecDeque<StoredMessage>>,
    published: Vec<StoredMessage>,
    consuming: Option<String>,
    unacked: BTreeSet<u64>,
    next_tag: u64,
    acks: usize,
    idle: Option<CancellationToken>,
}

impl State {
    fn route(&mut self, message: StoredMessage) {
        let targets: BTreeSet<String> = self
            .bindings
            .iter()
            .filter(|b| {
                b.exchange_name == message.exchange
                    && topic_matches(&b.routing_key, &message.routing_key)
            })
            .map(|b| b.queue_name.clone())
            .collect();

        for queue in targets {
            self.messages
                .entry(queue)
                .or_default()
                .push_back(message.clone());
        }
    }
}

#[derive(Default)]
pub(crate) struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Cancels `token` the next time a wait finds the consumed queue empty.
    pub fn cancel_when_idle(&self, token: CancellationToken) {
        self.state().idle = Some(token);
    }

    /// Lets every message of `queue` expire, dead-lettering it if the queue says so.
    pub fn expire_queue(&self, queue: &str) {
        let mut state = self.state();
        let dlx = state
            .queues
            .iter()
            .find(|q| q.name == queue)
            .and_then(|q| q.dead_letter_exchange.clone());
        let expired: Vec<StoredMessage> = state
            .messages
            .get_mut(queue)
            .map(|m| m.drain(..).collect())
            .unwrap_or_default();

        let Some(dlx) = dlx else {
            return;
        };

        for message in expired {
            let properties = record_death(&message, queue);
            state.route(StoredMessage {
                exchange: dlx.clone(),
                routing_key: message.routing_key,
                data: message.data,
                properties,
            });
        }
    }

    pub fn queue_messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.state()
            .messages
            .get(queue)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<StoredMessage> {
        self.state().published.clone()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state().queues.iter().map(|q| q.name.clone()).collect()
    }

    pub fn exchange_count(&self) -> usize {
        self.state().exchanges.len()
    }

    pub fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    pub fn binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    pub fn ack_count(&self) -> usize {
        self.state().acks
    }

    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state();
        match state.exchanges.iter().find(|e| e.name == def.name) {
            Some(existing) if existing == def => Ok(()),
            Some(_) => Err(AmqpError::DeclareExchangeError(def.name.clone())),
            None => {
                state.exchanges.push(def.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.state();
        match state.queues.iter().find(|q| q.name == def.name) {
            Some(existing) if existing == def => Ok(()),
            Some(_) => Err(AmqpError::DeclareQueueError(def.name.clone())),
            None => {
                state.queues.push(def.clone());
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state();
        let known = state.queues.iter().any(|q| q.name == binding.queue_name)
            && state.exchanges.iter().any(|e| e.name == binding.exchange_name);
        if !known {
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }

        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let mut state = self.state();
        if !state.exchanges.iter().any(|e| e.name == exchange) {
            return Err(AmqpError::PublishingError(exchange.to_owned()));
        }

        let message = StoredMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            data: payload.to_vec(),
            properties,
        };
        state.published.push(message.clone());
        state.route(message);
        Ok(())
    }

    async fn consume(&self, queue: &str, _prefetch: u16) -> Result<(), AmqpError> {
        let mut state = self.state();
        if !state.queues.iter().any(|q| q.name == queue) {
            return Err(AmqpError::BindingConsumerError(queue.to_owned()));
        }
        state.consuming = Some(queue.to_owned());
        Ok(())
    }

    async fn wait(&self, _timeout: Duration) -> WaitOutcome {
        let mut state = self.state();
        let Some(queue) = state.consuming.clone() else {
            return WaitOutcome::Closed;
        };

        let next = state.messages.get_mut(&queue).and_then(VecDeque::pop_front);
        let Some(message) = next else {
            if let Some(token) = state.idle.take() {
                token.cancel();
            }
            return WaitOutcome::TimedOut;
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.unacked.insert(delivery_tag);

        WaitOutcome::Delivered(Delivery {
            delivery_tag,
            exchange: message.exchange,
            routing_key: message.routing_key,
            redelivered: false,
            properties: message.properties,
            data: message.data,
        })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        let mut state = self.state();
        if !state.unacked.remove(&delivery_tag) {
            return Err(AmqpError::AckMessageError(delivery_tag));
        }
        state.acks += 1;
        Ok(())
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` zero or more.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// Adds an `expired` death on `queue` to the message's `x-death` history.
fn record_death(message: &StoredMessage, queue: &str) -> BasicProperties {
    let mut headers = message
        .properties
        .headers()
        .as_ref()
        .map(|h| h.inner().clone())
        .unwrap_or_default();

    let mut deaths: Vec<AMQPValue> = headers
        .get(AMQP_HEADERS_X_DEATH)
        .and_then(AMQPValue::as_array)
        .map(|a| a.as_slice().to_vec())
        .unwrap_or_default();

    let position = deaths.iter().position(|d| {
        d.as_field_table()
            .and_then(|t| t.inner().get("queue"))
            .and_then(AMQPValue::as_long_string)
            .map(|q| q.as_bytes() == queue.as_bytes())
            .unwrap_or(false)
    });

    let entry = match position {
        Some(i) => {
            let previous = deaths.remove(i);
            let mut table = previous
                .as_field_table()
                .map(|t| t.inner().clone())
                .unwrap_or_default();
            let count = table
                .get(AMQP_HEADERS_COUNT)
                .and_then(AMQPValue::as_long_long_int)
                .unwrap_or_default();
            table.insert(
                ShortString::from(AMQP_HEADERS_COUNT),
                AMQPValue::LongLongInt(count + 1),
            );
            FieldTable::from(table)
        }
        None => {
            let mut table = FieldTable::default();
            table.insert(
                ShortString::from(AMQP_HEADERS_COUNT),
                AMQPValue::LongLongInt(1),
            );
            table.insert(
                ShortString::from("queue"),
                AMQPValue::LongString(LongString::from(queue)),
            );
            table.insert(
                ShortString::from("reason"),
                AMQPValue::LongString(LongString::from("expired")),
            );
            table.insert(
                ShortString::from("exchange"),
                AMQPValue::LongString(LongString::from(message.exchange.clone())),
            );
            table
        }
    };
    deaths.insert(0, AMQPValue::FieldTable(entry));

    headers.insert(
        ShortString::from(AMQP_HEADERS_X_DEATH),
        AMQPValue::FieldArray(FieldArray::from(deaths)),
    );
    headers
        .entry(ShortString::from("x-first-death-queue"))
        .or_insert_with(|| AMQPValue::LongString(LongString::from(queue)));

    message
        .properties
        .clone()
        .with_headers(FieldTable::from(headers))
}

enum Behaviour {
    Succeed,
    Fail,
    Panic,
    FailWhen(fn(&Message) -> bool),
}

/// Subscription on `master` / `user-monitor` / `user.*` recording what it handles.
pub(crate) struct StubSubscription {
    behaviour: Behaviour,
    pub calls: AtomicUsize,
    /// `(routing key, attempt, message)` per handled delivery
    pub seen: Mutex<Vec<(String, u64, Message)>>,
}

impl StubSubscription {
    fn with(behaviour: Behaviour) -> StubSubscription {
        StubSubscription {
            behaviour,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> StubSubscription {
        StubSubscription::with(Behaviour::Succeed)
    }

    pub fn failing() -> StubSubscription {
        StubSubscription::with(Behaviour::Fail)
    }

    pub fn panicking() -> StubSubscription {
        StubSubscription::with(Behaviour::Panic)
    }

    pub fn failing_when(predicate: fn(&Message) -> bool) -> StubSubscription {
        StubSubscription::with(Behaviour::FailWhen(predicate))
    }
}

#[async_trait]
impl Subscription for StubSubscription {
    fn exchange_name(&self) -> &str {
        "master"
    }

    fn queue_name(&self) -> &str {
        "user-monitor"
    }

    fn routing_key(&self) -> &str {
        "user.*"
    }

    async fn handle(&self, msg: &SubMessage) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let message = msg.message()?;
        self.seen.lock().unwrap().push((
            msg.routing_key().to_owned(),
            msg.retry_count(),
            message.clone(),
        ));

        match &self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err("handler failure".into()),
            Behaviour::Panic => panic!("handler exploded"),
            Behaviour::FailWhen(predicate) if predicate(&message) => {
                Err("conditional failure".into())
            }
            Behaviour::FailWhen(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("user.*", "user.created"));
        assert!(!topic_matches("user.*", "user.profile.updated"));
        assert!(!topic_matches("user.*", "order.created"));
        assert!(topic_matches("user.#", "user"));
        assert!(topic_matches("user.#", "user.profile.updated"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.created", "order.created"));
    }
}
