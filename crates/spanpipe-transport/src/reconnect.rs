// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Reconnect-scheduling executor. A sender worker that lost its connection
//! asks for a reconnect slot; the service notifies it after a capped
//! exponential backoff so reconnect storms stay off the delivery path.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::TransportError;

#[derive(Debug)]
pub enum ReconnectCommand {
    Schedule {
        attempt: u32,
        response_tx: oneshot::Sender<()>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct ReconnectHandle {
    tx: mpsc::UnboundedSender<ReconnectCommand>,
}

impl ReconnectHandle {
    /// Waits until the given reconnect attempt may proceed.
    pub async fn wait_turn(&self, attempt: u32) -> Result<(), TransportError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ReconnectCommand::Schedule {
                attempt,
                response_tx,
            })
            .map_err(|_| TransportError::ExecutorGone)?;
        response_rx.await.map_err(|_| TransportError::ExecutorGone)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ReconnectCommand::Shutdown);
    }
}

pub struct ReconnectService {
    rx: mpsc::UnboundedReceiver<ReconnectCommand>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl ReconnectService {
    pub fn new(backoff_base_ms: u64, backoff_max_ms: u64) -> (Self, ReconnectHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ReconnectService {
                rx,
                backoff_base: Duration::from_millis(backoff_base_ms),
                backoff_max: Duration::from_millis(backoff_max_ms),
            },
            ReconnectHandle { tx },
        )
    }

    pub async fn run(mut self) {
        debug!("reconnect scheduler started");

        while let Some(command) = self.rx.recv().await {
            match command {
                ReconnectCommand::Schedule {
                    attempt,
                    response_tx,
                } => {
                    let delay = backoff_for(attempt, self.backoff_base, self.backoff_max);
                    // Sleep off the command loop so one long backoff does
                    // not serialize every other waiting sender.
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = response_tx.send(());
                    });
                }
                ReconnectCommand::Shutdown => {
                    debug!("reconnect scheduler shutting down");
                    break;
                }
            }
        }

        debug!("reconnect scheduler stopped");
    }
}

fn backoff_for(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(6);
    base.saturating_mul(factor as u32).min(max)
}
