// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Routing keys are `entity.action`.

/// Builds the routing key for `action` on `entity`.
pub fn routing_key(entity: &str, action: &str) -> String {
    format!("{entity}.{action}")
}

/// Splits a routing key into `(entity, action)`.
///
/// The action is the last segment. The entity is what lies strictly between the
/// first and the last segment, so a two-segment key such as `user.created` yields an
/// empty entity.
pub fn parse_routing_key(key: &str) -> (String, String) {
    let segments: Vec<&str> = key.split('.').collect();
    let action = segments.last().copied().unwrap_or_default().to_owned();

    let entity = if segments.len() > 2 {
        segments[1..segments.len() - 1].join(".")
    } else {
        String::new()
    };

    (entity, action)
}
