use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::constants::QOS_PROBE_TIMEOUT;
use crate::utils::periodic::PeriodicTask;

/// Summary of the most recent latency window, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

impl LatencyStats {
    /// Mean plus one standard deviation; windows above this are congested.
    pub fn threshold(&self) -> f64 {
        self.mean + self.stddev
    }
}

/// Rolling window of the last `capacity` latency samples.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Add a sample, evicting the oldest when full, and return the new stats.
    pub fn push(&mut self, latency_ms: f64) -> LatencyStats {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
        self.stats()
    }

    /// Mean and population standard deviation of the current samples.
    pub fn stats(&self) -> LatencyStats {
        let count = self.samples.len();
        if count == 0 {
            return LatencyStats { mean: 0.0, stddev: 0.0, samples: 0 };
        }

        let mean = self.samples.iter().sum::<f64>() / count as f64;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / count as f64;

        LatencyStats {
            mean,
            stddev: variance.sqrt(),
            samples: count,
        }
    }
}

/// One round trip to a reference endpoint.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self) -> Result<Duration>;
}

/// Times an HTTP GET against a fixed URL, status code ignored.
///
/// A request that times out counts as a sample of the full timeout, since a
/// saturated link is exactly what the controller needs to see. Other failures
/// (DNS, refused connection) produce no sample.
pub struct HttpLatencyProbe {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpLatencyProbe {
    pub fn new(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .with_context(|| format!("Invalid latency probe URL: {}", url))?;
        let client = reqwest::Client::builder()
            .timeout(QOS_PROBE_TIMEOUT)
            .build()
            .context("Failed to create HTTP client for latency probing")?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl LatencyProbe for HttpLatencyProbe {
    async fn probe(&self) -> Result<Duration> {
        let started = Instant::now();
        match self.client.get(self.url.clone()).send().await {
            Ok(_) => Ok(started.elapsed()),
            Err(e) if e.is_timeout() => Ok(QOS_PROBE_TIMEOUT),
            Err(e) => Err(e).context(format!("Latency probe to {} failed", self.url)),
        }
    }
}

/// Latest published stats, consumed at most once.
pub type StatsSlot = Arc<Mutex<Option<LatencyStats>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take the published stats, leaving the slot empty.
pub fn take_stats(slot: &StatsSlot) -> Option<LatencyStats> {
    lock(slot).take()
}

/// Start a background worker that probes every `period`, keeps a rolling
/// window of `window` samples and publishes its stats into `slot` after
/// each successful probe. The first probe runs immediately.
///
/// The first failure of a streak is logged as a warning, later ones at debug
/// level until a probe succeeds again.
pub fn spawn_sampler(
    probe: Arc<dyn LatencyProbe>,
    window: usize,
    period: Duration,
    slot: StatsSlot,
) -> PeriodicTask {
    let history = Arc::new(Mutex::new(LatencyWindow::new(window)));
    let failures = Arc::new(AtomicU32::new(0));

    PeriodicTask::spawn("latency-probe", Duration::ZERO, period, move || {
        let probe = Arc::clone(&probe);
        let history = Arc::clone(&history);
        let slot = Arc::clone(&slot);
        let failures = Arc::clone(&failures);

        async move {
            match probe.probe().await {
                Ok(latency) => {
                    let failed = failures.swap(0, Ordering::Relaxed);
                    if failed > 0 {
                        info!("Latency probing recovered after {} failed attempts", failed);
                    }
                    let stats = lock(&history).push(latency.as_secs_f64() * 1000.0);
                    *lock(&slot) = Some(stats);
                }
                Err(e) => {
                    if failures.fetch_add(1, Ordering::Relaxed) == 0 {
                        warn!("{:#}; upload rate stays put until probing works", e);
                    } else {
                        debug!("{:#}", e);
                    }
                }
            }
        }
    })
}
