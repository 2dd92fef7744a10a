// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for the shared-memory consumer.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while consuming a shared-memory stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The allocator connection is unusable. Fatal for the session.
    #[error("connection error: {0}")]
    Connection(String),

    /// A claimed segment could not be attached.
    #[error("failed to map segment {id}: {source}")]
    Map {
        id: i32,
        #[source]
        source: io::Error,
    },

    /// A stream descriptor carried a media kind this consumer does not handle.
    #[error("unsupported media kind {kind} for stream {index}")]
    UnsupportedStreamKind { index: usize, kind: i32 },

    /// No segment became available before the read deadline.
    #[error("no data within {0:?}")]
    Timeout(std::time::Duration),

    /// Unmapping or returning a segment failed.
    #[error("failed to release segment {id}: {message}")]
    Release { id: i32, message: String },

    /// A frame referenced a stream that is not registered.
    #[error("bad stream index {0}")]
    BadStreamIndex(i64),

    /// The segment header is malformed or points outside the segment.
    #[error("malformed segment: {0}")]
    Decode(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a release error.
    pub fn release(id: i32, message: impl Into<String>) -> Self {
        Self::Release {
            id,
            message: message.into(),
        }
    }

    /// Whether this error signals the end of the stream rather than a fault.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
