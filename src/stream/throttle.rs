use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};

use crate::constants::QUANTUM;
use crate::qos::rate::RateSource;

/// Latest boundary a reader will ever sleep until.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Paces an [`AsyncRead`] to the rate published by a [`RateSource`].
///
/// Each second is split into quanta of 50ms. A quantum carries a budget of
/// `rate / 20` bytes; reads are capped to what is left of it. Once it is
/// spent the reader sleeps until the next quantum boundary and asks the rate
/// source again, so rate changes take effect within one quantum.
pub struct ThrottledReader<R> {
    inner: R,
    rate: Arc<dyn RateSource>,
    start: Instant,
    quantum: Option<u64>,
    allowance: Option<u64>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<R> ThrottledReader<R> {
    pub fn new(inner: R, rate: Arc<dyn RateSource>) -> Self {
        Self {
            inner,
            rate,
            start: Instant::now(),
            quantum: None,
            allowance: None,
            sleep: None,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn quantum_index(&self, now: Instant) -> u64 {
        (now.duration_since(self.start).as_nanos() / QUANTUM.as_nanos()) as u64
    }

    fn quantum_start(&self, index: u64) -> Instant {
        let offset = QUANTUM.as_nanos().saturating_mul(u128::from(index));
        let offset = Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX));
        self.start
            .checked_add(offset)
            .unwrap_or_else(|| self.start + FAR_FUTURE)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ThrottledReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                this.sleep = None;
            }

            let index = this.quantum_index(Instant::now());
            if this.quantum != Some(index) {
                this.quantum = Some(index);
                this.allowance = this.rate.current_rate().quantum_budget();
            }

            let allowance = match this.allowance {
                None => return Pin::new(&mut this.inner).poll_read(cx, buf),
                Some(0) => {
                    let boundary = this.quantum_start(index + 1);
                    this.sleep = Some(Box::pin(sleep_until(boundary)));
                    continue;
                }
                Some(allowance) => allowance,
            };

            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let cap = allowance.min(buf.remaining() as u64) as usize;
            let n = {
                let window = buf.initialize_unfilled_to(cap);
                let mut limited = ReadBuf::new(window);
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
                limited.filled().len()
            };

            buf.advance(n);
            this.allowance = Some(allowance - n as u64);
            return Poll::Ready(Ok(()));
        }
    }
}
