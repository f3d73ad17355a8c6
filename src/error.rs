//! Error types for the upload pipeline.
//!
//! Retryable failures (transport errors and tree hash mismatches while
//! uploading a part) are handled inside the orchestrator's retry loop and
//! never surface here. Everything in [`PipeError`] ends the session.

use std::io;

use thiserror::Error;

/// Fatal outcome of an upload session.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Invalid settings, detected before any network activity
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The staging buffer was used out of order; this is a bug
    #[error("staging buffer misuse: {0}")]
    Contract(#[from] StagingError),

    /// Reading the source stream failed
    #[error("failed to read source: {0}")]
    Source(#[source] io::Error),

    /// The remote service refused to start a multipart upload
    #[error("failed to initiate multipart upload: {0:#}")]
    BeginSession(#[source] anyhow::Error),

    /// The remote service refused to assemble the archive
    #[error("failed to complete multipart upload: {0:#}")]
    CompleteSession(#[source] anyhow::Error),

    /// A part kept failing until the retry ceiling was reached
    #[error("failed to upload part {part} after {attempts} attempts: {source:#}")]
    RetriesExhausted {
        part: u32,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A sleep or blocking call was interrupted by cancellation
    #[error("upload interrupted")]
    Interrupted,
}

impl PipeError {
    /// Always false: retryable failures are absorbed by the retry loop.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the error is an I/O-class failure (source failure or interruption).
    pub fn is_io(&self) -> bool {
        matches!(self, PipeError::Source(_) | PipeError::Interrupted)
    }
}

/// Violation of the staging buffer's single-writer-then-readers discipline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("a writer is already open")]
    WriterOpen,

    #[error("{0} reader(s) still open")]
    ReadersOpen(usize),

    #[error("capacity {0} is not a power of two between 1MB and 4GB")]
    InvalidCapacity(u64),
}
