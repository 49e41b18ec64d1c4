// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! Name-resolution executor: sender workers never resolve inline; they ask
//! this service task through its handle.

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::TransportError;

#[derive(Debug)]
pub enum ResolverCommand {
    Resolve {
        host: String,
        port: u16,
        response_tx: oneshot::Sender<Result<SocketAddr, TransportError>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::UnboundedSender<ResolverCommand>,
}

impl ResolverHandle {
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ResolverCommand::Resolve {
                host: host.to_string(),
                port,
                response_tx,
            })
            .map_err(|_| TransportError::ExecutorGone)?;
        response_rx.await.map_err(|_| TransportError::ExecutorGone)?
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ResolverCommand::Shutdown);
    }
}

pub struct NameResolverService {
    rx: mpsc::UnboundedReceiver<ResolverCommand>,
}

impl NameResolverService {
    pub fn new() -> (Self, ResolverHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NameResolverService { rx }, ResolverHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("name resolver started");

        while let Some(command) = self.rx.recv().await {
            match command {
                ResolverCommand::Resolve {
                    host,
                    port,
                    response_tx,
                } => {
                    let result = resolve(&host, port).await;
                    if response_tx.send(result).is_err() {
                        debug!("resolver reply dropped - requester gone");
                    }
                }
                ResolverCommand::Shutdown => {
                    debug!("name resolver shutting down");
                    break;
                }
            }
        }

        debug!("name resolver stopped");
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let target = format!("{host}:{port}");
    let mut addrs = tokio::net::lookup_host(target.clone())
        .await
        .map_err(|_| TransportError::Resolve(target.clone()))?;
    addrs.next().ok_or(TransportError::Resolve(target))
}
