use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::constants::PROGRESS_FLUSH_INTERVAL;
use crate::utils::periodic::PeriodicTask;

type Report = Box<dyn Fn(u64) + Send + Sync>;

struct MeterState {
    pending: u64,
    closed: bool,
    report: Report,
}

#[derive(Clone)]
struct MeterHandle(Arc<Mutex<MeterState>>);

impl MeterHandle {
    fn lock(&self) -> MutexGuard<'_, MeterState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report the bytes accumulated since the last flush, even if none.
    fn flush(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        let delta = std::mem::take(&mut state.pending);
        (state.report)(delta);
    }
}

/// Accumulates byte counts and reports them on a 500ms heartbeat.
///
/// The heartbeat fires even when nothing was transferred, so an observer
/// keeps getting updates during long quiet reads. Closing the meter (or
/// dropping it) stops the heartbeat and reports whatever is still pending.
pub struct ProgressMeter {
    handle: MeterHandle,
    heartbeat: Option<PeriodicTask>,
}

impl ProgressMeter {
    /// Start a meter calling `report` with each flushed byte delta.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(report: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let handle = MeterHandle(Arc::new(Mutex::new(MeterState {
            pending: 0,
            closed: false,
            report: Box::new(report),
        })));

        let ticker = handle.clone();
        let heartbeat = PeriodicTask::spawn(
            "progress-flush",
            PROGRESS_FLUSH_INTERVAL,
            PROGRESS_FLUSH_INTERVAL,
            move || {
                ticker.flush();
                async {}
            },
        );

        Self {
            handle,
            heartbeat: Some(heartbeat),
        }
    }

    /// Count `bytes` towards the next report.
    pub fn record(&self, bytes: u64) {
        self.handle.lock().pending += bytes;
    }

    /// Stop the heartbeat and flush the remainder.
    pub fn close(&mut self) {
        self.heartbeat.take();
        let mut state = self.handle.lock();
        if state.closed {
            return;
        }
        let delta = std::mem::take(&mut state.pending);
        if delta > 0 {
            (state.report)(delta);
        }
        state.closed = true;
    }
}

impl Drop for ProgressMeter {
    fn drop(&mut self) {
        self.close();
    }
}

/// An [`AsyncRead`] adapter that counts every byte it yields into a
/// [`ProgressMeter`].
pub struct ObservedReader<R> {
    inner: R,
    meter: ProgressMeter,
}

impl<R> ObservedReader<R> {
    pub fn new(inner: R, meter: ProgressMeter) -> Self {
        Self { inner, meter }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ObservedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.meter.record((buf.filled().len() - before) as u64);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn collecting() -> (Arc<Mutex<Vec<u64>>>, impl Fn(u64) + Send + Sync + 'static) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        (reports, move |delta| sink.lock().unwrap().push(delta))
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_idle_periods() {
        let (reports, report) = collecting();
        let meter = ProgressMeter::start(report);

        meter.record(10);
        tokio::time::sleep(Duration::from_millis(1600)).await;
        drop(meter);

        let seen = reports.lock().unwrap().clone();
        assert_eq!(seen, vec![10, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_remainder_once() {
        let (reports, report) = collecting();
        let mut meter = ProgressMeter::start(report);

        meter.record(5);
        meter.record(7);
        meter.close();
        meter.record(100);
        drop(meter);

        assert_eq!(*reports.lock().unwrap(), vec![12]);
    }

    #[tokio::test]
    async fn test_observed_reader_counts_bytes() {
        let (reports, report) = collecting();
        let data = vec![3u8; 1234];
        let mut reader = ObservedReader::new(&data[..], ProgressMeter::start(report));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        drop(reader);

        let total: u64 = reports.lock().unwrap().iter().sum();
        assert_eq!(total, 1234);
    }
}
