//! The upload pipeline.
//!
//! [`GlacierPipe`] turns a one-pass byte source into a multipart archive:
//! buffer a part, tree hash it, send it (retrying as long as needed), repeat,
//! then complete the archive with the whole-stream tree hash.
//!
//! Everything that happens along the way is reported as a [`PipeEvent`] to a
//! [`PipeObserver`]. Use [`LogObserver`] for log output, an
//! `UnboundedSender<PipeEvent>` to consume events elsewhere, or
//! [`NoopObserver`] to ignore them.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glacier_pipe::cloud::ArchiveTarget;
//! use glacier_pipe::pipe::{GlacierPipe, LogObserver, PipeOptions};
//!
//! # async fn example(target: Arc<dyn ArchiveTarget>) -> anyhow::Result<()> {
//! let mut pipe = GlacierPipe::new(target, PipeOptions::default(), Arc::new(LogObserver::new()))?;
//! let receipt = pipe.upload(tokio::io::stdin(), "backups", "nightly").await?;
//! println!("{}", receipt.location);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod orchestrator;

pub use events::{LogObserver, NoopObserver, PipeEvent, PipeObserver};
pub use orchestrator::{ArchiveReceipt, GlacierPipe, PipeOptions, RetryPolicy};
