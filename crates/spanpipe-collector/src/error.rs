// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

use crate::storage::StoreError;

/// A failure handling one inbound message. Always isolated to that
/// message: the router logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to decode payload: {0}")]
    Codec(#[from] spanpipe_wire::CodecError),

    #[error("failed to store record: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Handler(String),
}
