// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Supervision
//!
//! A consumer process is meant to run under an external process supervisor that
//! restarts it whenever it exits. Two things make it exit:
//!
//! - the error budget: it starts at 200, every handled message costs 2 and every
//!   handler failure costs 20; once it falls below 1 the loop stops, so a process
//!   that keeps failing gets recycled
//! - the shutdown token: cancelled by a signal (SIGUSR2, SIGTERM or SIGINT), checked
//!   between messages, never in the middle of a handler

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Budget a fresh process starts with
pub const INITIAL_ERROR_BUDGET: i64 = 200;
/// Budget consumed by a successfully handled message
pub const SUCCESS_COST: i64 = 2;
/// Budget consumed by a handler failure
pub const FAILURE_COST: i64 = 20;

/// Process-local stop conditions consulted once per poll iteration.
#[derive(Debug, Clone)]
pub struct Supervisor {
    budget: i64,
    shutdown: CancellationToken,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor::new(CancellationToken::new())
    }
}

impl Supervisor {
    pub fn new(shutdown: CancellationToken) -> Supervisor {
        Supervisor::with_budget(INITIAL_ERROR_BUDGET, shutdown)
    }

    pub fn with_budget(budget: i64, shutdown: CancellationToken) -> Supervisor {
        Supervisor { budget, shutdown }
    }

    pub fn record_success(&mut self) {
        self.budget -= SUCCESS_COST;
    }

    pub fn record_failure(&mut self) {
        self.budget -= FAILURE_COST;
    }

    pub fn remaining(&self) -> i64 {
        self.budget
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether the loop must stop before taking another message.
    pub fn should_stop(&self) -> bool {
        self.shutdown.is_cancelled() || self.budget < 1
    }
}

/// Spawns the task that cancels `token` on the first shutdown signal.
///
/// Only the token is shared with the consumer; it never sees the signals themselves.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        ("SIGUSR2", SignalKind::user_defined2()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGINT", SignalKind::interrupt()),
    ];

    let mut streams = Vec::with_capacity(kinds.len());
    for (name, kind) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((name, stream)),
            Err(err) => warn!(
                error = err.to_string(),
                signal = name,
                "failure to register signal handler"
            ),
        }
    }

    if streams.is_empty() {
        std::future::pending::<()>().await;
    }

    let waits = streams.iter_mut().map(|(name, stream)| {
        let name = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    let (name, _, _) = futures_util::future::select_all(waits).await;

    info!(signal = name, "signal received, stopping after the current message");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(
            signal = "ctrl-c",
            "signal received, stopping after the current message"
        ),
        Err(err) => {
            warn!(error = err.to_string(), "failure to register signal handler");
            std::future::pending::<()>().await
        }
    }
}
