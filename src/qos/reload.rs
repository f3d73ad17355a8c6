use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use anyhow::Result;
use log::{debug, info, warn};

use crate::config::{ConfigFile, ThrottleMode};
use crate::constants::CONFIG_POLL_INTERVAL;
use crate::qos::controller::QosRateController;
use crate::qos::latency::HttpLatencyProbe;
use crate::qos::rate::{FixedRate, Rate, RateSource, UnlimitedRate};
use crate::utils::periodic::PeriodicTask;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the rate source for a throttle mode.
pub fn rate_source_for(mode: &ThrottleMode) -> Result<Arc<dyn RateSource>> {
    Ok(match mode {
        ThrottleMode::Unlimited => Arc::new(UnlimitedRate),
        ThrottleMode::Fixed(rate) => Arc::new(FixedRate(*rate)),
        ThrottleMode::Adaptive { probe_url } => {
            let probe = HttpLatencyProbe::new(probe_url)?;
            Arc::new(QosRateController::new(Arc::new(probe)))
        }
    })
}

/// A [`RateSource`] that forwards to a delegate which can be replaced at
/// any time. Replacing drops the old delegate, stopping its probe worker.
pub struct SwappableRate {
    current: Mutex<Arc<dyn RateSource>>,
}

impl SwappableRate {
    pub fn new(initial: Arc<dyn RateSource>) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    /// Install `next` and hand back the previous delegate.
    pub fn replace(&self, next: Arc<dyn RateSource>) -> Arc<dyn RateSource> {
        std::mem::replace(&mut *lock(&self.current), next)
    }
}

impl RateSource for SwappableRate {
    fn current_rate(&self) -> Rate {
        let delegate = Arc::clone(&lock(&self.current));
        delegate.current_rate()
    }
}

struct WatchState {
    path: PathBuf,
    endpoint: String,
    overrides: ConfigFile,
    target: Arc<SwappableRate>,
    mode: Mutex<ThrottleMode>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl WatchState {
    fn poll(&self) {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!("Unable to stat {}: {}", self.path.display(), e);
                return;
            }
        };

        {
            let mut last = lock(&self.last_modified);
            if *last == Some(modified) {
                return;
            }
            *last = Some(modified);
        }

        if let Err(e) = self.reload() {
            warn!("Ignoring changes to {}: {:#}", self.path.display(), e);
        }
    }

    fn reload(&self) -> Result<()> {
        let merged = ConfigFile::from_yaml_file(&self.path)?.merge(self.overrides.clone());
        let next = ThrottleMode::resolve(
            merged.max_upload_rate.as_deref(),
            merged.qos_url.as_deref(),
            &self.endpoint,
        )?;

        let mut mode = lock(&self.mode);
        if *mode == next {
            debug!("Reloaded {}, throttling unchanged", self.path.display());
            return Ok(());
        }

        self.target.replace(rate_source_for(&next)?);
        info!("Throttling changed from {} to {}", *mode, next);
        *mode = next;
        Ok(())
    }
}

/// Polls a config file once per second and swaps the active rate source
/// when its throttling settings change. Stops when dropped.
///
/// Command-line overrides keep winning over the file, exactly as at startup.
/// Files that fail to parse are logged and skipped.
pub struct ConfigWatcher {
    _task: PeriodicTask,
}

impl ConfigWatcher {
    /// Start watching `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Config file to poll
    /// * `overrides` - Command-line values layered over every reload
    /// * `endpoint` - Resolved endpoint, used to derive the probe URL
    /// * `mode` - Throttle mode currently installed in `target`
    /// * `target` - Rate source to update
    pub fn spawn(
        path: &Path,
        overrides: ConfigFile,
        endpoint: String,
        mode: ThrottleMode,
        target: Arc<SwappableRate>,
    ) -> Self {
        let last_modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        let state = Arc::new(WatchState {
            path: path.to_path_buf(),
            endpoint,
            overrides,
            target,
            mode: Mutex::new(mode),
            last_modified: Mutex::new(last_modified),
        });

        debug!("Watching {} for throttling changes", path.display());
        let task = PeriodicTask::spawn("config-reload", CONFIG_POLL_INTERVAL, CONFIG_POLL_INTERVAL, move || {
            state.poll();
            async {}
        });

        Self { _task: task }
    }
}
