// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Owns the construction order and shutdown order of the senders and their
//! executors: start all senders, run, then drain and close in a fixed
//! order on shutdown. A failure closing one component never prevents
//! closing the rest, and every wait is bounded so shutdown cannot hang.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use spanpipe_context::api_meta::MetadataListener;
use spanpipe_context::span::now_millis;
use spanpipe_context::trace::SpanConsumer;
use spanpipe_wire::envelope::MessageType;
use spanpipe_wire::payload::AgentInfoMessage;

use crate::config::Config;
use crate::reconnect::{ReconnectHandle, ReconnectService};
use crate::report::{
    make_envelope, MetadataSenderBridge, SpanSenderBridge, StatReporter, StatSource,
};
use crate::resolver::{NameResolverService, ResolverHandle};
use crate::sender::{queued_sender, DataSender, QueuedSender};

const AGENT_SERVICE_TYPE: i16 = 1000;

struct SenderUnit {
    name: &'static str,
    sender: QueuedSender,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

pub struct TransportLifecycle {
    config: Arc<Config>,
    agent_id: Arc<str>,
    agent_start_time: i64,

    agent_info: SenderUnit,
    metadata: SenderUnit,
    span: SenderUnit,
    stat: SenderUnit,

    resolver: ResolverHandle,
    resolver_task: JoinHandle<()>,
    reconnect: ReconnectHandle,
    reconnect_task: JoinHandle<()>,

    stat_cancel: CancellationToken,
    stat_task: JoinHandle<()>,
}

impl TransportLifecycle {
    /// Starts senders and executors in declared order: agent-info,
    /// metadata, span, stat, then the name-resolver and reconnect
    /// executors. Publishes the agent-info message and the periodic stat
    /// reporter before returning.
    pub fn start(config: Arc<Config>, stat_source: Arc<dyn StatSource>) -> TransportLifecycle {
        info!("transport start()");

        let agent_id: Arc<str> = Arc::from(config.agent_id.as_str());
        let agent_start_time = now_millis();

        // Executor handles exist before the executors run; requests queue
        // on the channel until the services are spawned below.
        let (resolver_service, resolver) = NameResolverService::new();
        let (reconnect_service, reconnect) = ReconnectService::new(
            config.reconnect_backoff_base_ms,
            config.reconnect_backoff_max_ms,
        );

        let start_sender = |name: &'static str, capacity: usize| -> SenderUnit {
            let cancel = CancellationToken::new();
            let (sender, worker) = queued_sender(
                name,
                capacity,
                config.collector_host.clone(),
                config.collector_port,
                resolver.clone(),
                reconnect.clone(),
                config.delivery_max_attempts,
                cancel.clone(),
            );
            let worker = tokio::spawn(worker.run());
            info!("{name} sender started");
            SenderUnit {
                name,
                sender,
                cancel,
                worker,
            }
        };

        let agent_info = start_sender("agent-info", config.aux_queue_size);
        let metadata = start_sender("metadata", config.aux_queue_size);
        let span = start_sender("span", config.span_queue_size);
        let stat = start_sender("stat", config.aux_queue_size);

        let resolver_task = tokio::spawn(resolver_service.run());
        info!("name resolver executor started");
        let reconnect_task = tokio::spawn(reconnect_service.run());
        info!("reconnect executor started");

        // Register the agent with the collector straight away.
        let info_message = AgentInfoMessage {
            hostname: hostname(),
            pid: std::process::id(),
            agent_version: config.agent_version.clone(),
            service_type: AGENT_SERVICE_TYPE,
            start_time: agent_start_time,
        };
        agent_info.sender.send(make_envelope(
            &agent_id,
            agent_start_time,
            0,
            MessageType::AgentInfo,
            info_message.encode(),
        ));

        let stat_cancel = CancellationToken::new();
        let reporter = StatReporter::new(
            Arc::clone(&agent_id),
            agent_start_time,
            Duration::from_secs(config.stat_interval_secs),
            stat_source,
            vec![
                Arc::clone(agent_info.sender.metrics()),
                Arc::clone(metadata.sender.metrics()),
                Arc::clone(span.sender.metrics()),
                Arc::clone(stat.sender.metrics()),
            ],
            Arc::new(stat.sender.clone()) as Arc<dyn DataSender>,
            stat_cancel.clone(),
        );
        let stat_task = tokio::spawn(reporter.run());

        TransportLifecycle {
            config,
            agent_id,
            agent_start_time,
            agent_info,
            metadata,
            span,
            stat,
            resolver,
            resolver_task,
            reconnect,
            reconnect_task,
            stat_cancel,
            stat_task,
        }
    }

    pub fn agent_id(&self) -> &Arc<str> {
        &self.agent_id
    }

    pub fn agent_start_time(&self) -> i64 {
        self.agent_start_time
    }

    /// The consumer to hand finished spans to; wire it into the tracer.
    pub fn span_consumer(&self) -> Arc<dyn SpanConsumer> {
        Arc::new(SpanSenderBridge::new(
            Arc::clone(&self.agent_id),
            self.agent_start_time,
            Arc::new(self.span.sender.clone()) as Arc<dyn DataSender>,
        ))
    }

    /// The listener to hand to the API-metadata registry.
    pub fn metadata_listener(&self) -> Arc<dyn MetadataListener> {
        Arc::new(MetadataSenderBridge::new(
            Arc::clone(&self.agent_id),
            self.agent_start_time,
            Arc::new(self.metadata.sender.clone()) as Arc<dyn DataSender>,
        ))
    }

    pub fn span_sender(&self) -> QueuedSender {
        self.span.sender.clone()
    }

    /// Closes senders and executors in fixed order. Each close is
    /// attempted independently with a bounded wait; timeouts are logged as
    /// warnings rather than hanging shutdown.
    pub async fn shutdown(self) {
        info!("transport shutdown()");
        let wait = Duration::from_secs(self.config.shutdown_wait_secs);

        // The stat reporter feeds the stat sender; stop producing first.
        self.stat_cancel.cancel();
        if tokio::time::timeout(wait, self.stat_task).await.is_err() {
            warn!("stat reporter shutdown failed");
        }

        close_sender(self.span, wait).await;
        close_sender(self.stat, wait).await;
        close_sender(self.agent_info, wait).await;
        close_sender(self.metadata, wait).await;

        self.resolver.shutdown();
        if tokio::time::timeout(wait, self.resolver_task).await.is_err() {
            warn!("name resolver executor shutdown failed");
        }
        self.reconnect.shutdown();
        if tokio::time::timeout(wait, self.reconnect_task).await.is_err() {
            warn!("reconnect executor shutdown failed");
        }
        info!("transport shutdown complete");
    }
}

async fn close_sender(unit: SenderUnit, wait: Duration) {
    unit.cancel.cancel();
    match tokio::time::timeout(wait, unit.worker).await {
        Ok(Ok(())) => debug!("{} sender closed", unit.name),
        Ok(Err(e)) => warn!("{} sender close fail: {e}", unit.name),
        Err(_) => warn!("{} sender close timed out", unit.name),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
