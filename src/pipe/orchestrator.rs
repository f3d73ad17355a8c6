use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::cloud::target::{ArchiveTarget, PartBody, PartRange};
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_PART_SIZE, RETRY_BACKOFF_FACTOR, RETRY_BASE_DELAY_MS,
    RETRY_MAX_DELAY_MS, SOURCE_READ_SIZE,
};
use crate::error::{PipeError, StagingError};
use crate::pipe::events::{PipeEvent, PipeObserver};
use crate::qos::rate::RateSource;
use crate::stream::{ProgressMeter, StagingBuffer};
use crate::utils::format::human_size;
use crate::utils::tree_hash::{to_hex, TreeHash, TreeHashDigest};

/// How long to wait after a failed part upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per part before the session is abandoned
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            factor: RETRY_BACKOFF_FACTOR,
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }

    /// `min(base * factor^attempts, max)`. Exponential at first, then flat
    /// at the cap after about fifteen attempts.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let delay = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Settings for a [`GlacierPipe`].
#[derive(Clone)]
pub struct PipeOptions {
    /// Bytes per part; a power of two between 1MB and 4GB
    pub part_size: u64,
    pub retry: RetryPolicy,
    /// Pacing for the upload pass, `None` for unthrottled
    pub rate: Option<Arc<dyn RateSource>>,
    /// Cancelling this aborts the upload with [`PipeError::Interrupted`]
    pub cancel: CancellationToken,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            retry: RetryPolicy::default(),
            rate: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// What the service returned for a finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub location: String,
    /// Tree hash of the whole archive, hex encoded
    pub tree_hash: String,
    pub size: u64,
    pub parts: u32,
}

/// State of one archive upload, from initiation to completion.
struct UploadSession {
    upload_id: String,
    transferred: u64,
    archive_hash: TreeHash,
    part_index: u32,
}

/// A buffered part, ready to send.
struct BufferedPart {
    index: u32,
    len: u64,
    tree_hash: TreeHashDigest,
    /// Whether the part filled the buffer; a short part is the last one
    full: bool,
}

/// Streams a one-pass source into a multipart archive upload.
///
/// Parts are buffered and sent strictly one after another:
///
/// 1. Initiate the multipart upload
/// 2. Buffer up to `part_size` bytes from the source, tree hashing them
/// 3. Send the buffered part, retrying with backoff until the service
///    accepts it and echoes the same tree hash
/// 4. Repeat from 2 until the source is exhausted
/// 5. Complete the upload with the total size and the archive tree hash
///
/// The staging buffer is allocated once and reused for every part.
pub struct GlacierPipe {
    target: Arc<dyn ArchiveTarget>,
    observer: Arc<dyn PipeObserver>,
    buffer: StagingBuffer,
    retry: RetryPolicy,
    rate: Option<Arc<dyn RateSource>>,
    cancel: CancellationToken,
}

impl GlacierPipe {
    /// Create a pipe, rejecting invalid part sizes and retry limits.
    pub fn new(
        target: Arc<dyn ArchiveTarget>,
        options: PipeOptions,
        observer: Arc<dyn PipeObserver>,
    ) -> Result<Self, PipeError> {
        let buffer = StagingBuffer::new(options.part_size).map_err(|e| match e {
            StagingError::InvalidCapacity(_) => PipeError::Config(format!("part size {}", e)),
            other => PipeError::Contract(other),
        })?;

        if options.retry.max_retries < 1 {
            return Err(PipeError::Config("max retries must be at least 1".to_string()));
        }

        Ok(Self {
            target,
            observer,
            buffer,
            retry: options.retry,
            rate: options.rate,
            cancel: options.cancel,
        })
    }

    pub fn part_size(&self) -> u64 {
        self.buffer.capacity()
    }

    /// Upload everything `source` yields as one archive.
    ///
    /// # Arguments
    ///
    /// * `source` - Read once, front to back
    /// * `vault` - Destination vault
    /// * `description` - Archive description stored with the archive
    ///
    /// # Returns
    ///
    /// The archive receipt, or the fatal error that ended the session. Fatal
    /// errors are reported to the observer before they are returned.
    pub async fn upload<R>(
        &mut self,
        mut source: R,
        vault: &str,
        description: &str,
    ) -> Result<ArchiveReceipt, PipeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.run(&mut source, vault, description).await;
        if let Err(e) = &result {
            self.observer.notify(PipeEvent::SessionFatal { error: e.to_string() });
        }
        result
    }

    async fn run<R>(
        &self,
        source: &mut R,
        vault: &str,
        description: &str,
    ) -> Result<ArchiveReceipt, PipeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let upload_id = self
            .interruptible(self.target.begin_multipart_upload(vault, description, self.part_size()))
            .await?
            .map_err(PipeError::BeginSession)?;

        info!(
            "Uploading to vault {} in parts of {}",
            vault,
            human_size(self.part_size())
        );
        self.observer.notify(PipeEvent::SessionStarted { upload_id: upload_id.clone() });

        let mut session = UploadSession {
            upload_id,
            transferred: 0,
            archive_hash: TreeHash::new(),
            part_index: 0,
        };
        let mut chunk = vec![0u8; SOURCE_READ_SIZE];

        loop {
            let part = self.buffer_part(source, &mut session, &mut chunk).await?;
            if part.len == 0 {
                break;
            }

            self.upload_part(vault, &session, &part).await?;
            session.transferred += part.len;
            session.part_index += 1;

            if !part.full {
                break;
            }
        }

        let tree_hash = to_hex(&session.archive_hash.finalize_reset());
        debug!(
            "Completing upload {}: {} bytes in {} parts",
            session.upload_id, session.transferred, session.part_index
        );

        let location = self
            .interruptible(self.target.complete_multipart_upload(
                vault,
                &session.upload_id,
                session.transferred,
                &tree_hash,
            ))
            .await?
            .map_err(PipeError::CompleteSession)?;

        self.observer.notify(PipeEvent::SessionDone {
            tree_hash: tree_hash.clone(),
            location: location.clone(),
        });

        Ok(ArchiveReceipt {
            location,
            tree_hash,
            size: session.transferred,
            parts: session.part_index,
        })
    }

    /// Drain the source into the staging buffer until it is full or the
    /// source ends.
    async fn buffer_part<R>(
        &self,
        source: &mut R,
        session: &mut UploadSession,
        chunk: &mut [u8],
    ) -> Result<BufferedPart, PipeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let index = session.part_index;
        self.observer.notify(PipeEvent::BufferingStarted { part: index });

        let mut writer = self.buffer.open_writer()?;
        let mut part_hash = TreeHash::new();
        let observer = Arc::clone(&self.observer);
        let meter = ProgressMeter::start(move |bytes| {
            observer.notify(PipeEvent::BufferingProgress { part: index, bytes })
        });

        loop {
            let want = (writer.remaining() as usize).min(chunk.len());
            if want == 0 {
                break;
            }

            let n = self
                .interruptible(source.read(&mut chunk[..want]))
                .await?
                .map_err(PipeError::Source)?;
            if n == 0 {
                break;
            }

            let bytes = &chunk[..n];
            session.archive_hash.update(bytes);
            std::io::Write::write_all(&mut writer, bytes).map_err(PipeError::Source)?;
            part_hash.update(bytes);
            meter.record(n as u64);
        }

        let len = writer.finish();
        drop(meter);
        self.observer.notify(PipeEvent::BufferingEnded { part: index, bytes: len });

        Ok(BufferedPart {
            index,
            len,
            tree_hash: part_hash.finalize_reset(),
            full: len == self.buffer.capacity(),
        })
    }

    /// Send the buffered part until the service accepts it with a matching
    /// tree hash. Transport errors and hash mismatches are both retried.
    async fn upload_part(
        &self,
        vault: &str,
        session: &UploadSession,
        part: &BufferedPart,
    ) -> Result<(), PipeError> {
        let Some(range) = PartRange::new(session.transferred, part.len) else {
            debug!("Part {} is empty, nothing to send", part.index);
            return Ok(());
        };
        let tree_hash = to_hex(&part.tree_hash);
        self.observer.notify(PipeEvent::PartHashed {
            part: part.index,
            tree_hash: tree_hash.clone(),
        });

        let mut attempts = 0u32;

        loop {
            self.observer.notify(PipeEvent::UploadStarted { part: part.index });
            let body = PartBody::new(
                &self.buffer,
                self.rate.clone(),
                Arc::clone(&self.observer),
                part.index,
            );

            let outcome = self
                .interruptible(self.target.upload_part(
                    vault,
                    &session.upload_id,
                    range,
                    &tree_hash,
                    body,
                ))
                .await?;
            self.observer.notify(PipeEvent::UploadEnded { part: part.index });

            let failure = match outcome {
                Ok(echoed) if echoed.eq_ignore_ascii_case(&tree_hash) => {
                    debug!("Part {} ({}) accepted", part.index, range);
                    return Ok(());
                }
                Ok(echoed) => anyhow!(
                    "tree hash mismatch: sent {}, service computed {}",
                    tree_hash,
                    echoed
                ),
                Err(e) => e,
            };

            attempts += 1;
            let will_retry = attempts < self.retry.max_retries;
            self.observer.notify(PipeEvent::UploadFailed {
                part: part.index,
                error: format!("{:#}", failure),
                attempt: attempts,
                will_retry,
            });

            if !will_retry {
                return Err(PipeError::RetriesExhausted {
                    part: part.index,
                    attempts,
                    source: failure,
                });
            }

            let delay = self.retry.backoff_delay(attempts);
            self.observer.notify(PipeEvent::BackoffSleeping { duration: delay });
            self.interruptible(tokio::time::sleep(delay)).await?;
        }
    }

    /// Run `future` unless the pipe is cancelled first.
    async fn interruptible<F: Future>(&self, future: F) -> Result<F::Output, PipeError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipeError::Interrupted),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2250));
        assert_eq!(policy.backoff_delay(20), Duration::from_secs(300));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..30).map(|a| policy.backoff_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }
}
