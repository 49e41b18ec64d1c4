// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Queued data senders.
//!
//! A [`QueuedSender`] is the producer-facing half: `send` either enqueues
//! into a bounded buffer or drops the message with a counted failure —
//! stalling an instrumented application thread is never acceptable, losing
//! a span is. The [`SenderWorker`] half owns the persistent collector
//! connection on a background task, delivering frames with a bounded
//! per-message retry window and scheduling reconnects through the
//! reconnect executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use spanpipe_wire::envelope::Envelope;
use spanpipe_wire::frame::write_frame;

use crate::reconnect::ReconnectHandle;
use crate::resolver::ResolverHandle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Non-blocking, best-effort enqueue seam between recording code and the
/// background delivery machinery.
pub trait DataSender: Send + Sync {
    /// Enqueues a message. Returns false — after counting and logging the
    /// drop — instead of ever blocking past the buffer bound.
    fn send(&self, envelope: Envelope) -> bool;

    /// Messages dropped so far, at enqueue or after the delivery retry
    /// window. Never silently lost without showing up here.
    fn dropped_count(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SenderMetrics {
    enqueue_dropped: AtomicU64,
    delivery_dropped: AtomicU64,
    delivered: AtomicU64,
}

impl SenderMetrics {
    pub fn enqueue_dropped(&self) -> u64 {
        self.enqueue_dropped.load(Ordering::Relaxed)
    }

    pub fn delivery_dropped(&self) -> u64 {
        self.delivery_dropped.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.enqueue_dropped() + self.delivery_dropped()
    }
}

#[derive(Clone)]
pub struct QueuedSender {
    name: &'static str,
    tx: mpsc::Sender<Envelope>,
    metrics: Arc<SenderMetrics>,
}

impl QueuedSender {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn metrics(&self) -> &Arc<SenderMetrics> {
        &self.metrics
    }
}

impl DataSender for QueuedSender {
    fn send(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.enqueue_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sender = self.name, "send buffer full; message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.enqueue_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sender = self.name, "sender closed; message dropped");
                false
            }
        }
    }

    fn dropped_count(&self) -> u64 {
        self.metrics.dropped()
    }
}

pub struct SenderWorker {
    name: &'static str,
    rx: mpsc::Receiver<Envelope>,
    collector_host: String,
    collector_port: u16,
    resolver: ResolverHandle,
    reconnect: ReconnectHandle,
    delivery_max_attempts: u32,
    metrics: Arc<SenderMetrics>,
    cancel: CancellationToken,
}

/// Builds a sender/worker pair sharing one bounded buffer and one metrics
/// block. The worker must be spawned onto a background task.
#[allow(clippy::too_many_arguments)]
pub fn queued_sender(
    name: &'static str,
    capacity: usize,
    collector_host: String,
    collector_port: u16,
    resolver: ResolverHandle,
    reconnect: ReconnectHandle,
    delivery_max_attempts: u32,
    cancel: CancellationToken,
) -> (QueuedSender, SenderWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    let metrics = Arc::new(SenderMetrics::default());
    let sender = QueuedSender {
        name,
        tx,
        metrics: Arc::clone(&metrics),
    };
    let worker = SenderWorker {
        name,
        rx,
        collector_host,
        collector_port,
        resolver,
        reconnect,
        delivery_max_attempts,
        metrics,
        cancel,
    };
    (sender, worker)
}

impl SenderWorker {
    pub async fn run(mut self) {
        debug!(sender = self.name, "sender worker started");
        let mut connection: Option<TcpStream> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(envelope) => self.deliver(&mut connection, envelope).await,
                    None => break,
                },
            }
        }

        // Final drain: ship whatever is still buffered. Each message keeps
        // its bounded retry window, and the lifecycle bounds the whole
        // drain with a shutdown timeout.
        while let Ok(envelope) = self.rx.try_recv() {
            self.deliver(&mut connection, envelope).await;
        }
        debug!(sender = self.name, "sender worker stopped");
    }

    async fn deliver(&mut self, connection: &mut Option<TcpStream>, envelope: Envelope) {
        let bytes = envelope.encode();

        for attempt in 1..=self.delivery_max_attempts {
            if connection.is_none() {
                match self.connect().await {
                    Ok(stream) => *connection = Some(stream),
                    Err(e) => {
                        warn!(
                            sender = self.name,
                            attempt, "connect to collector failed: {e}"
                        );
                        if self.reconnect.wait_turn(attempt).await.is_err() {
                            // Scheduler is gone (shutdown); stop retrying.
                            break;
                        }
                        continue;
                    }
                }
            }

            if let Some(stream) = connection.as_mut() {
                match write_frame(stream, &bytes).await {
                    Ok(()) => {
                        self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(e) => {
                        warn!(
                            sender = self.name,
                            attempt, "write to collector failed, reconnecting: {e}"
                        );
                        *connection = None;
                        if self.reconnect.wait_turn(attempt).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.delivery_dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            sender = self.name,
            attempts = self.delivery_max_attempts,
            "message dropped after exhausting delivery attempts"
        );
    }

    async fn connect(&self) -> Result<TcpStream, crate::TransportError> {
        let addr = self
            .resolver
            .resolve(&self.collector_host, self.collector_port)
            .await?;
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                crate::TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        Ok(stream)
    }
}
