use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::StagingError;
use crate::pipe::events::{PipeEvent, PipeObserver};
use crate::qos::rate::{RateSource, UnlimitedRate};
use crate::stream::{ObservedReader, ProgressMeter, StagingBuffer, StagingReader, ThrottledReader};

/// Inclusive byte range of a part within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    /// Range of `len` bytes starting at `offset`, or `None` when `len` is
    /// zero or the range would run past `u64::MAX`.
    pub fn new(offset: u64, len: u64) -> Option<Self> {
        let end = offset.checked_add(len.checked_sub(1)?)?;
        Some(Self { start: offset, end })
    }

    /// Number of bytes covered, never zero.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value, e.g. `bytes 0-1048575/*`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }
}

impl fmt::Display for PartRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Paced, progress-reporting reader over a part's bytes.
pub type PartReader = ObservedReader<ThrottledReader<StagingReader>>;

/// Handle to the bytes of the part being uploaded.
///
/// Each open starts again from the first byte, so a transport may read the
/// body as many times as it needs. Use [`open_unpaced`](PartBody::open_unpaced)
/// for integrity pre-reads and [`open`](PartBody::open) for the pass that
/// actually goes over the wire; only the latter is rate limited and shows up
/// as upload progress.
pub struct PartBody<'a> {
    buffer: &'a StagingBuffer,
    rate: Arc<dyn RateSource>,
    observer: Arc<dyn PipeObserver>,
    part: u32,
}

impl<'a> PartBody<'a> {
    pub fn new(
        buffer: &'a StagingBuffer,
        rate: Option<Arc<dyn RateSource>>,
        observer: Arc<dyn PipeObserver>,
        part: u32,
    ) -> Self {
        Self {
            buffer,
            rate: rate.unwrap_or_else(|| Arc::new(UnlimitedRate)),
            observer,
            part,
        }
    }

    /// Part length in bytes.
    pub fn len(&self) -> u64 {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Open the wire pass: rate limited and reported as upload progress.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self) -> Result<PartReader, StagingError> {
        let reader = self.buffer.open_reader()?;
        let observer = Arc::clone(&self.observer);
        let part = self.part;
        let meter = ProgressMeter::start(move |bytes| {
            observer.notify(PipeEvent::UploadProgress { part, bytes })
        });

        Ok(ObservedReader::new(
            ThrottledReader::new(reader, Arc::clone(&self.rate)),
            meter,
        ))
    }

    /// Open a plain pass over the bytes, without pacing or progress.
    pub fn open_unpaced(&self) -> Result<StagingReader, StagingError> {
        self.buffer.open_reader()
    }

    /// Read the wire pass into memory.
    pub async fn read_paced(&self) -> std::io::Result<Vec<u8>> {
        let mut reader = self
            .open()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut body = Vec::with_capacity(self.len() as usize);
        reader.read_to_end(&mut body).await?;
        Ok(body)
    }
}

/// The three remote operations of a multipart archive upload.
///
/// Errors from any of them are transport-class; the orchestrator retries
/// [`upload_part`](ArchiveTarget::upload_part) and treats the other two as
/// fatal.
#[async_trait]
pub trait ArchiveTarget: Send + Sync {
    /// Open a multipart upload and return its upload id.
    async fn begin_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<String>;

    /// Send one part and return the tree hash the service computed for it,
    /// hex encoded.
    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: PartRange,
        tree_hash: &str,
        body: PartBody<'_>,
    ) -> Result<String>;

    /// Assemble the uploaded parts into an archive and return its location.
    async fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        tree_hash: &str,
    ) -> Result<String>;
}
