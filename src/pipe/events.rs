use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::security::scrub_credentials;
use crate::utils::format::{human_rate, human_size};

/// Everything the pipeline reports while it runs, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeEvent {
    /// The remote service opened a multipart upload
    SessionStarted { upload_id: String },

    BufferingStarted { part: u32 },
    /// Bytes buffered since the previous progress event (may be zero)
    BufferingProgress { part: u32, bytes: u64 },
    BufferingEnded { part: u32, bytes: u64 },

    /// Tree hash of the buffered part, hex encoded
    PartHashed { part: u32, tree_hash: String },

    /// An upload attempt began
    UploadStarted { part: u32 },
    /// Bytes sent since the previous progress event (may be zero)
    UploadProgress { part: u32, bytes: u64 },
    /// An upload attempt ended, successfully or not
    UploadEnded { part: u32 },
    /// An upload attempt failed; `attempt` counts from 1
    UploadFailed { part: u32, error: String, attempt: u32, will_retry: bool },

    /// Waiting before the next attempt
    BackoffSleeping { duration: Duration },

    SessionDone { tree_hash: String, location: String },
    SessionFatal { error: String },
}

/// Receives [`PipeEvent`]s synchronously from the upload path.
///
/// Implementations must not block; anything slow belongs on the other end
/// of a channel (see the [`UnboundedSender`] implementation).
pub trait PipeObserver: Send + Sync {
    fn notify(&self, event: PipeEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipeObserver for NoopObserver {
    fn notify(&self, _event: PipeEvent) {}
}

/// Forwards events to a channel. A closed receiver is ignored.
impl PipeObserver for UnboundedSender<PipeEvent> {
    fn notify(&self, event: PipeEvent) {
        let _ = self.send(event);
    }
}

#[derive(Default)]
struct Transfer {
    started: Option<Instant>,
    bytes: u64,
}

impl Transfer {
    fn start(&mut self) {
        self.started = Some(Instant::now());
        self.bytes = 0;
    }

    fn rate(&self) -> String {
        match self.started.map(|s| s.elapsed().as_secs_f64()) {
            Some(secs) if secs > 0.0 => human_rate(self.bytes as f64 / secs),
            _ => human_rate(f64::INFINITY),
        }
    }
}

#[derive(Default)]
struct LogState {
    buffering: Transfer,
    uploading: Transfer,
    total: u64,
}

/// Renders events as log lines, with error text scrubbed of credentials.
///
/// Lifecycle events log at info, progress at debug.
#[derive(Default)]
pub struct LogObserver {
    state: Mutex<LogState>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PipeObserver for LogObserver {
    fn notify(&self, event: PipeEvent) {
        let mut state = self.lock();

        match event {
            PipeEvent::SessionStarted { upload_id } => {
                info!("Started multipart upload {}", upload_id);
            }
            PipeEvent::BufferingStarted { part } => {
                state.buffering.start();
                debug!("Buffering part {}", part);
            }
            PipeEvent::BufferingProgress { part, bytes } => {
                state.buffering.bytes += bytes;
                if bytes > 0 {
                    debug!(
                        "Part {}: buffered {} ({})",
                        part,
                        human_size(state.buffering.bytes),
                        state.buffering.rate()
                    );
                }
            }
            PipeEvent::BufferingEnded { part, bytes } => {
                state.buffering.bytes = bytes;
                state.total += bytes;
                info!(
                    "Part {}: buffered {} at {} (archive so far {})",
                    part,
                    human_size(bytes),
                    state.buffering.rate(),
                    human_size(state.total)
                );
            }
            PipeEvent::PartHashed { part, tree_hash } => {
                debug!("Part {}: tree hash {}", part, tree_hash);
            }
            PipeEvent::UploadStarted { part } => {
                state.uploading.start();
                debug!("Part {}: uploading", part);
            }
            PipeEvent::UploadProgress { part, bytes } => {
                state.uploading.bytes += bytes;
                if bytes > 0 {
                    debug!(
                        "Part {}: sent {} ({})",
                        part,
                        human_size(state.uploading.bytes),
                        state.uploading.rate()
                    );
                }
            }
            PipeEvent::UploadEnded { part } => {
                info!(
                    "Part {}: sent {} at {}",
                    part,
                    human_size(state.uploading.bytes),
                    state.uploading.rate()
                );
            }
            PipeEvent::UploadFailed { part, error, attempt, will_retry } => {
                let error = scrub_credentials(&error);
                if will_retry {
                    warn!("Part {}: attempt {} failed, will retry: {}", part, attempt, error);
                } else {
                    error!("Part {}: attempt {} failed, giving up: {}", part, attempt, error);
                }
            }
            PipeEvent::BackoffSleeping { duration } => {
                info!("Waiting {:.1}s before retrying", duration.as_secs_f64());
            }
            PipeEvent::SessionDone { tree_hash, location } => {
                info!(
                    "Upload complete: {} in {} (tree hash {})",
                    location,
                    human_size(state.total),
                    tree_hash
                );
            }
            PipeEvent::SessionFatal { error } => {
                error!("Upload failed: {}", scrub_credentials(&error));
            }
        }
    }
}
