//! # glacier-pipe
//!
//! Streams an unbounded, non-seekable input (typically stdin) into a
//! cold-storage archive vault as a multipart upload.
//!
//! ## Overview
//!
//! The source is read exactly once. Each part is staged in memory, tree
//! hashed, and sent as many times as it takes for the service to accept it
//! and echo back the same hash. Once the source is exhausted the archive is
//! completed with the tree hash of the whole stream.
//!
//! ## Features
//!
//! - **End-to-end integrity**: per-part and whole-archive SHA-256 tree hashes
//! - **Long outage tolerance**: exponential backoff capped at five minutes,
//!   up to a thousand attempts per part by default
//! - **Rate limiting**: a fixed rate, or an adaptive rate that backs off when
//!   round-trip latency rises above its measured baseline
//! - **Hot reload**: throttling changes in the config file apply mid-upload
//! - **Observable**: every step is reported as a [`pipe::PipeEvent`]
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use glacier_pipe::cloud::{create_glacier_client, GlacierTarget};
//! use glacier_pipe::config::Credentials;
//! use glacier_pipe::pipe::{GlacierPipe, LogObserver, PipeOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let endpoint = "https://glacier.us-east-1.amazonaws.com/";
//! let connection = create_glacier_client(endpoint, &Credentials::DefaultChain).await?;
//!
//! let mut pipe = GlacierPipe::new(
//!     Arc::new(GlacierTarget::new(connection)),
//!     PipeOptions::default(),
//!     Arc::new(LogObserver::new()),
//! )?;
//!
//! let receipt = pipe.upload(tokio::io::stdin(), "backups", "nightly").await?;
//! println!("{}", receipt.location);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`pipe`]: The upload orchestrator and its event stream
//! - [`stream`]: Staging buffer, rate limiting reader, progress metering
//! - [`qos`]: Fixed, adaptive and hot-reloadable rate sources
//! - [`cloud`]: The remote storage trait and its Glacier implementation
//! - [`config`]: Configuration file and validation
//! - [`utils`]: Tree hashing, periodic tasks, size formatting
//! - [`security`]: Credential scrubbing for logs
//! - [`cli`]: Command-line interface definitions
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Upload orchestration and pipeline events
pub mod pipe;

/// Byte stream adapters between the source and the network
pub mod stream;

/// Upload rate selection, fixed and adaptive
pub mod qos;

/// Remote archive storage
pub mod cloud;

/// Configuration management
pub mod config;

/// Utility functions for hashing, timers and formatting
pub mod utils;

/// Error types
pub mod error;

/// Application constants and configuration values
pub mod constants;

/// Security utilities for credential protection
pub mod security;

pub use error::{PipeError, StagingError};
