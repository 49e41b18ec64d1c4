// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

//! The storage capability: `save(record)`, fire-and-forget. Persistence
//! engines live behind this seam; failures are logged by callers and never
//! retried here.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait Store<R>: Send + Sync {
    async fn save(&self, record: R) -> Result<(), StoreError>;
}

/// In-memory store for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore<R> {
    records: Mutex<Vec<R>>,
}

impl<R: Clone> MemoryStore<R> {
    pub fn new() -> Self {
        MemoryStore {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<R> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<R: Send + Sync + 'static> Store<R> for MemoryStore<R> {
    async fn save(&self, record: R) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Appends one JSON object per record to a file.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlStore { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl<R: Serialize + Send + Sync + 'static> Store<R> for JsonlStore {
    async fn save(&self, record: R) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: u32,
        label: String,
    }

    #[tokio::test]
    async fn test_memory_store_accumulates() {
        let store = MemoryStore::new();
        store
            .save(Sample {
                id: 1,
                label: "a".into(),
            })
            .await
            .unwrap();
        store
            .save(Sample {
                id: 2,
                label: "b".into(),
            })
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.records()[1].id, 2);
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = JsonlStore::new(&path);

        for id in 0..3u32 {
            store
                .save(Sample {
                    id,
                    label: "x".into(),
                })
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: Sample = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed.id, 2);
    }

    #[tokio::test]
    async fn test_jsonl_store_unwritable_path_errors() {
        let store = JsonlStore::new("/definitely/not/a/real/dir/records.jsonl");
        let err = store
            .save(Sample {
                id: 1,
                label: "a".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
