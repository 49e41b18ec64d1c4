// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

/// Errors internal to the transport layer. None of these ever propagate to
/// recording code; producers only observe a boolean enqueue result.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("sender queue is full")]
    QueueFull,

    #[error("sender is closed")]
    Closed,

    #[error("name resolution failed for {0}")]
    Resolve(String),

    #[error("executor shut down before replying")]
    ExecutorGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TransportError::Resolve("collector.internal:9995".into()).to_string(),
            "name resolution failed for collector.internal:9995"
        );
        assert_eq!(TransportError::QueueFull.to_string(), "sender queue is full");
    }
}
