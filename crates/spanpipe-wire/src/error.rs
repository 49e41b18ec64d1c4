// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while decoding wire data. Fatal to the single decode call
/// that produced them, never to the process.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown annotation type code {0:#04x}")]
    UnknownTypeCode(u8),

    #[error("unknown message type tag {0:#04x}")]
    UnknownMessageType(u8),

    #[error("buffer truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid utf-8 while reading {0}")]
    InvalidUtf8(&'static str),

    #[error("declared length {declared} for {field} exceeds remaining {remaining} bytes")]
    BadLength {
        field: &'static str,
        declared: usize,
        remaining: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CodecError::UnknownTypeCode(0xff);
        assert_eq!(error.to_string(), "unknown annotation type code 0xff");
    }

    #[test]
    fn test_truncated_display() {
        let error = CodecError::Truncated("span.end_point");
        assert_eq!(
            error.to_string(),
            "buffer truncated while reading span.end_point"
        );
    }
}
