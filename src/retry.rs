// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Redelivery History
//!
//! RabbitMQ records every dead-lettering of a message in the `x-death` header. Since
//! retries travel through a TTL queue that dead-letters back to the main exchange, the
//! `count` of the first `x-death` entry is the number of previous attempts. The counter
//! is broker state; this module only reads it, or strips it when a quarantined message
//! is given a fresh start.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable},
};

/// Header holding the dead-lettering history of a message
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Field of an `x-death` entry counting how often it happened
pub const AMQP_HEADERS_COUNT: &str = "count";

/// Summary headers RabbitMQ adds next to `x-death`
const DEATH_SUMMARY_HEADERS: [&str; 6] = [
    "x-first-death-exchange",
    "x-first-death-queue",
    "x-first-death-reason",
    "x-last-death-exchange",
    "x-last-death-queue",
    "x-last-death-reason",
];

/// Reads the attempt number of a delivery from its `x-death` header.
///
/// Returns 0 when the header is missing or malformed.
pub fn attempt_count(props: &AMQPProperties) -> u64 {
    props
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(AMQP_HEADERS_X_DEATH))
        .and_then(AMQPValue::as_array)
        .and_then(|arr| arr.as_slice().first())
        .and_then(AMQPValue::as_field_table)
        .and_then(|table| table.inner().get(AMQP_HEADERS_COUNT))
        .and_then(as_count)
        .unwrap_or_default()
}

fn as_count(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::LongLongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::Timestamp(v) => Some(*v),
        _ => None,
    }
}

/// Returns a copy of `props` without any dead-lettering history.
///
/// Other headers are kept.
pub fn clear_history(props: &AMQPProperties) -> AMQPProperties {
    let Some(headers) = props.headers() else {
        return props.clone();
    };

    let mut table = headers.inner().clone();
    table.remove(AMQP_HEADERS_X_DEATH);
    for key in DEATH_SUMMARY_HEADERS {
        table.remove(key);
    }

    props.clone().with_headers(FieldTable::from(table))
}
