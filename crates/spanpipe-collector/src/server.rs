// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! TCP ingest server: accepts agent connections, reads length-prefixed
//! envelope frames, and dispatches each through the router. Independent
//! messages are processed concurrently (one task per connection), and a
//! failure handling one message never tears down the read loop.

use std::io;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use spanpipe_wire::envelope::Envelope;
use spanpipe_wire::frame::read_frame;

use crate::config::CollectorConfig;
use crate::router::IngestRouter;

pub struct IngestServer {
    config: Arc<CollectorConfig>,
    router: Arc<IngestRouter>,
    cancel: CancellationToken,
}

impl IngestServer {
    pub fn new(
        config: Arc<CollectorConfig>,
        router: Arc<IngestRouter>,
        cancel: CancellationToken,
    ) -> Self {
        IngestServer {
            config,
            router,
            cancel,
        }
    }

    /// Binds the configured address and returns the listener so callers
    /// can learn the bound port before serving.
    pub async fn bind(&self) -> Result<TcpListener, io::Error> {
        let addr = format!("{}:{}", self.config.bind_host, self.config.bind_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("ingest server listening on {addr}");
        Ok(listener)
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), io::Error> {
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("ingest server shutting down");
                    break;
                }
                conn_res = listener.accept() => match conn_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("ingest server error: {e}");
                        return Err(e);
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill the server on a connection handler
                        // panic; log and keep accepting.
                        error!("connection handler panicked: {e:?}");
                        continue;
                    }
                    Ok(()) | Err(_) => continue,
                },
            };

            let router = Arc::clone(&self.router);
            let max_frame_len = self.config.max_frame_len;
            let cancel = self.cancel.clone();
            joinset.spawn(async move {
                handle_connection(conn, router, max_frame_len, cancel).await;
            });
        }

        // Let in-flight connections drain briefly, then abort the rest.
        joinset.shutdown().await;
        Ok(())
    }
}

async fn handle_connection(
    mut conn: TcpStream,
    router: Arc<IngestRouter>,
    max_frame_len: usize,
    cancel: CancellationToken,
) {
    let peer = conn
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(peer = %peer, "agent connected");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_frame(&mut conn, max_frame_len) => match read {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!(peer = %peer, "dropping connection on frame error: {e}");
                    break;
                }
            },
        };

        match Envelope::decode(&frame) {
            // One bad envelope costs that envelope, not the connection.
            Err(e) => error!(peer = %peer, "discarding undecodable envelope: {e}"),
            Ok(envelope) => router.dispatch(&envelope).await,
        }
    }

    debug!(peer = %peer, "agent disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;

    use spanpipe_wire::envelope::{Header, MessageType};
    use spanpipe_wire::frame::write_frame;
    use spanpipe_wire::payload::{SpanMessage, NONE_SPAN_ID};

    use crate::handler::default_handlers;
    use crate::record::{AgentInfoRecord, AgentStatRecord, ApiMetadataRecord, SpanRecord};
    use crate::storage::{MemoryStore, Store};

    struct Fixture {
        port: u16,
        cancel: CancellationToken,
        span_store: Arc<MemoryStore<SpanRecord>>,
    }

    async fn start_server(stat_enabled: bool) -> Fixture {
        let config = Arc::new(CollectorConfig {
            bind_host: "127.0.0.1".into(),
            bind_port: 0,
            max_frame_len: 1024 * 1024,
            stat_enabled,
            storage_dir: std::path::PathBuf::from("unused"),
        });

        let span_store = Arc::new(MemoryStore::new());
        let handlers = default_handlers(
            &config,
            Arc::clone(&span_store) as Arc<dyn Store<SpanRecord>>,
            Arc::new(MemoryStore::<AgentStatRecord>::new()),
            Arc::new(MemoryStore::<ApiMetadataRecord>::new()),
            Arc::new(MemoryStore::<AgentInfoRecord>::new()),
        );
        let router = Arc::new(IngestRouter::new(handlers));
        let cancel = CancellationToken::new();

        let server = IngestServer::new(config, router, cancel.clone());
        let listener = server.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        Fixture {
            port,
            cancel,
            span_store,
        }
    }

    fn span_envelope(sequence: u64) -> Envelope {
        let message = SpanMessage {
            transaction_sequence: sequence,
            span_id: sequence as i64 + 100,
            parent_span_id: NONE_SPAN_ID,
            flags: 0,
            start_time: 1,
            elapsed: 1,
            service_type: 1000,
            end_point: String::new(),
            events: Vec::new(),
        };
        let mut header = Header::new("agent-srv", 9);
        header.transaction_sequence = sequence;
        Envelope::new(header, MessageType::Span, message.encode())
    }

    async fn wait_for_records(store: &MemoryStore<SpanRecord>, count: usize) -> bool {
        for _ in 0..100 {
            if store.len() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_server_ingests_span_frames() {
        let fixture = start_server(true).await;

        let mut conn = TcpStream::connect(("127.0.0.1", fixture.port)).await.unwrap();
        write_frame(&mut conn, &span_envelope(0).encode()).await.unwrap();
        write_frame(&mut conn, &span_envelope(1).encode()).await.unwrap();
        drop(conn);

        assert!(wait_for_records(&fixture.span_store, 2).await);
        let records = fixture.span_store.records();
        assert_eq!(records[0].transaction_id, "agent-srv^9^0");
        assert_eq!(records[1].span_id, 101);

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn test_bad_envelope_does_not_kill_connection() {
        let fixture = start_server(true).await;

        let mut conn = TcpStream::connect(("127.0.0.1", fixture.port)).await.unwrap();
        // Unknown message-type tag; decodes as an error and is discarded.
        write_frame(&mut conn, &Bytes::from_static(&[0x7f, 0, 0, 0, 0]))
            .await
            .unwrap();
        write_frame(&mut conn, &span_envelope(5).encode()).await.unwrap();
        drop(conn);

        assert!(wait_for_records(&fixture.span_store, 1).await);
        assert_eq!(fixture.span_store.records()[0].transaction_id, "agent-srv^9^5");

        fixture.cancel.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_connections() {
        let fixture = start_server(true).await;

        let mut tasks = Vec::new();
        for i in 0..4u64 {
            let port = fixture.port;
            tasks.push(tokio::spawn(async move {
                let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
                write_frame(&mut conn, &span_envelope(i).encode()).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(wait_for_records(&fixture.span_store, 4).await);
        fixture.cancel.cancel();
    }
}
