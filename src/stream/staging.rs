use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use log::trace;
use tokio::io::{AsyncRead, ReadBuf};

use crate::constants::{MAX_PART_SIZE, MIN_PART_SIZE, STAGING_SEGMENT_SIZE};
use crate::error::StagingError;

/// Fixed-capacity in-memory staging area for one part.
///
/// The source stream can only be read once, but a part may have to be sent
/// several times (retries, and transports that read the body twice to compute
/// their own checksums). The staging buffer bridges the two: one writer fills
/// it, then any number of readers replay exactly the committed bytes.
///
/// Access discipline:
/// - [`StagingBuffer::open_writer`] fails while a writer or any reader is open,
///   and resets the committed length to zero
/// - [`StagingBuffer::open_reader`] fails while a writer is open
///
/// Memory is held in a pool of 1MB segments that is allocated on first use and
/// kept across parts, so buffering the next part never reallocates.
#[derive(Clone)]
pub struct StagingBuffer {
    shared: Arc<Shared>,
}

struct Shared {
    capacity: u64,
    segment_size: usize,
    state: Mutex<State>,
}

struct State {
    segments: Vec<Box<[u8]>>,
    filled: u64,
    access: Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Idle,
    Writing,
    Reading(usize),
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn segment_len(&self, index: usize) -> usize {
        let start = index as u64 * self.segment_size as u64;
        (self.capacity - start).min(self.segment_size as u64) as usize
    }
}

impl StagingBuffer {
    /// Create a staging buffer holding up to `capacity` bytes.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Part size in bytes; a power of two between 1MB and 4GB
    ///
    /// # Returns
    ///
    /// The buffer, or [`StagingError::InvalidCapacity`]
    pub fn new(capacity: u64) -> Result<Self, StagingError> {
        Self::with_segment_size(capacity, STAGING_SEGMENT_SIZE)
    }

    /// Like [`StagingBuffer::new`] with a custom pool segment size.
    pub fn with_segment_size(capacity: u64, segment_size: usize) -> Result<Self, StagingError> {
        if !capacity.is_power_of_two()
            || capacity < MIN_PART_SIZE
            || capacity > MAX_PART_SIZE
            || segment_size == 0
        {
            return Err(StagingError::InvalidCapacity(capacity));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                segment_size,
                state: Mutex::new(State {
                    segments: Vec::new(),
                    filled: 0,
                    access: Access::Idle,
                }),
            }),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.shared.capacity
    }

    /// Number of committed bytes.
    pub fn len(&self) -> u64 {
        self.shared.lock().filled
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can still be written before the buffer is full.
    pub fn remaining(&self) -> u64 {
        self.shared.capacity - self.len()
    }

    /// Start a new write pass, discarding the previously committed bytes.
    pub fn open_writer(&self) -> Result<StagingWriter, StagingError> {
        let mut state = self.shared.lock();
        match state.access {
            Access::Writing => return Err(StagingError::WriterOpen),
            Access::Reading(n) => return Err(StagingError::ReadersOpen(n)),
            Access::Idle => {}
        }

        state.access = Access::Writing;
        state.filled = 0;
        trace!("Staging buffer opened for writing ({} bytes capacity)", self.shared.capacity);

        Ok(StagingWriter {
            shared: Arc::clone(&self.shared),
            open: true,
        })
    }

    /// Start a read pass over the committed bytes, from byte 0.
    pub fn open_reader(&self) -> Result<StagingReader, StagingError> {
        let mut state = self.shared.lock();
        let readers = match state.access {
            Access::Writing => return Err(StagingError::WriterOpen),
            Access::Reading(n) => n + 1,
            Access::Idle => 1,
        };

        state.access = Access::Reading(readers);

        Ok(StagingReader {
            shared: Arc::clone(&self.shared),
            len: state.filled,
            position: 0,
            mark: 0,
            open: true,
        })
    }
}

/// Write side of a [`StagingBuffer`]. Closing (or dropping) commits the bytes.
pub struct StagingWriter {
    shared: Arc<Shared>,
    open: bool,
}

impl StagingWriter {
    /// Bytes written in this pass so far.
    pub fn written(&self) -> u64 {
        self.shared.lock().filled
    }

    /// Space left before the buffer is full.
    pub fn remaining(&self) -> u64 {
        self.shared.capacity - self.written()
    }

    /// Close the pass and return the committed length.
    pub fn finish(mut self) -> u64 {
        self.close()
    }

    fn close(&mut self) -> u64 {
        let mut state = self.shared.lock();
        if self.open {
            self.open = false;
            state.access = Access::Idle;
        }
        state.filled
    }
}

impl Write for StagingWriter {
    /// Append `buf` in full, or fail without writing anything if it would not fit.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.lock();
        let remaining = shared.capacity - state.filled;

        if buf.len() as u64 > remaining {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "write of {} bytes would overflow staging buffer ({} bytes remaining)",
                    buf.len(),
                    remaining
                ),
            ));
        }

        let mut offset = state.filled;
        let mut data = buf;
        while !data.is_empty() {
            let segment = (offset / shared.segment_size as u64) as usize;
            let within = (offset % shared.segment_size as u64) as usize;

            if segment == state.segments.len() {
                let len = shared.segment_len(segment);
                state.segments.push(vec![0u8; len].into_boxed_slice());
            }

            let target = &mut state.segments[segment];
            let n = (target.len() - within).min(data.len());
            target[within..within + n].copy_from_slice(&data[..n]);

            offset += n as u64;
            data = &data[n..];
        }

        state.filled = offset;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StagingWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read side of a [`StagingBuffer`], yielding exactly the committed bytes.
///
/// Supports [`mark`](StagingReader::mark) and [`rewind`](StagingReader::rewind)
/// for transports that need to re-read the body.
pub struct StagingReader {
    shared: Arc<Shared>,
    len: u64,
    position: u64,
    mark: u64,
    open: bool,
}

impl StagingReader {
    /// Total bytes this reader yields.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.len - self.position
    }

    /// Remember the current position.
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    /// Return to the last mark (byte 0 if never marked).
    pub fn rewind(&mut self) {
        self.position = self.mark;
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let want = (self.remaining().min(buf.len() as u64)) as usize;
        if want == 0 {
            return 0;
        }

        let state = self.shared.lock();
        let segment_size = self.shared.segment_size as u64;
        let mut copied = 0;

        while copied < want {
            let segment = (self.position / segment_size) as usize;
            let within = (self.position % segment_size) as usize;
            let source = &state.segments[segment];
            let n = (source.len() - within).min(want - copied);

            buf[copied..copied + n].copy_from_slice(&source[within..within + n]);
            copied += n;
            self.position += n as u64;
        }

        copied
    }
}

impl Read for StagingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf))
    }
}

impl AsyncRead for StagingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = this.read_into(buf.initialize_unfilled());
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl Drop for StagingReader {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut state = self.shared.lock();
        state.access = match state.access {
            Access::Reading(n) if n > 1 => Access::Reading(n - 1),
            _ => Access::Idle,
        };
    }
}
