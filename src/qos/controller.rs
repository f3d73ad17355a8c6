use std::mem::discriminant;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::constants::{
    QOS_BACKOFF_FACTOR, QOS_BASELINE_WINDOW, QOS_DECREASE_FACTOR, QOS_HOLD_PROBE_INTERVAL,
    QOS_HOLD_WINDOW, QOS_INCREASE_FACTOR, QOS_INITIAL_RATE, QOS_MAX_HOLD, QOS_PROBE_INTERVAL,
    QOS_REBASELINE_FACTOR, QOS_THROTTLE_DOWN_WINDOW, QOS_THROTTLE_UP_WINDOW,
};
use crate::qos::latency::{spawn_sampler, take_stats, LatencyProbe, LatencyStats, StatsSlot};
use crate::qos::rate::{Rate, RateSource};
use crate::utils::format::human_rate;
use crate::utils::periodic::PeriodicTask;

/// State of the adaptive controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Measuring latency at a low fixed rate
    Baselining,
    /// Raising the rate while latency stays near the baseline
    ThrottlingUp { baseline: LatencyStats },
    /// Keeping the rate, watching for drift either way
    Holding { baseline: LatencyStats, since: Instant },
    /// Lowering the rate until latency recovers
    ThrottlingDown { baseline: LatencyStats },
}

impl Phase {
    /// Samples in one evaluation window.
    pub fn window(&self) -> usize {
        match self {
            Phase::Baselining => QOS_BASELINE_WINDOW,
            Phase::ThrottlingUp { .. } => QOS_THROTTLE_UP_WINDOW,
            Phase::Holding { .. } => QOS_HOLD_WINDOW,
            Phase::ThrottlingDown { .. } => QOS_THROTTLE_DOWN_WINDOW,
        }
    }

    /// Delay between latency probes.
    pub fn probe_interval(&self) -> Duration {
        match self {
            Phase::Holding { .. } => QOS_HOLD_PROBE_INTERVAL,
            _ => QOS_PROBE_INTERVAL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Baselining => "baselining",
            Phase::ThrottlingUp { .. } => "throttling up",
            Phase::Holding { .. } => "holding",
            Phase::ThrottlingDown { .. } => "throttling down",
        }
    }

    /// Whether `other` is the same phase, ignoring its data.
    pub fn same_kind(&self, other: &Phase) -> bool {
        discriminant(self) == discriminant(other)
    }
}

/// The control law: given the current phase and rate, the freshly published
/// latency stats (if any) and the current time, produce the next phase and rate.
///
/// Latency plays the role packet loss plays in TCP congestion control: a
/// window whose mean rises above `baseline.mean + baseline.stddev` is
/// congested.
pub fn transition(
    phase: Phase,
    rate: f64,
    stats: Option<&LatencyStats>,
    now: Instant,
) -> (Phase, f64) {
    match phase {
        Phase::Baselining => match stats {
            Some(stats) if stats.samples == QOS_BASELINE_WINDOW => {
                (Phase::ThrottlingUp { baseline: *stats }, rate)
            }
            _ => (phase, rate),
        },

        Phase::ThrottlingUp { baseline } => match stats {
            Some(stats) if stats.samples == QOS_THROTTLE_UP_WINDOW => {
                if stats.mean > baseline.threshold() {
                    (Phase::Holding { baseline, since: now }, rate * QOS_BACKOFF_FACTOR)
                } else {
                    (phase, rate * QOS_INCREASE_FACTOR)
                }
            }
            _ => (phase, rate),
        },

        Phase::ThrottlingDown { baseline } => match stats {
            Some(stats) if stats.samples == QOS_THROTTLE_DOWN_WINDOW => {
                if stats.mean > baseline.threshold() {
                    (phase, rate * QOS_DECREASE_FACTOR)
                } else {
                    (Phase::Holding { baseline, since: now }, rate)
                }
            }
            _ => (phase, rate),
        },

        Phase::Holding { baseline, since } => {
            if let Some(stats) = stats {
                if stats.samples >= QOS_HOLD_WINDOW / 2 && stats.mean > baseline.threshold() {
                    return (Phase::ThrottlingDown { baseline }, rate);
                }
                if stats.samples == QOS_HOLD_WINDOW
                    && stats.mean < baseline.mean + baseline.stddev / 2.0
                {
                    return (Phase::ThrottlingUp { baseline }, rate);
                }
            }

            if now.saturating_duration_since(since) > QOS_MAX_HOLD {
                (Phase::Baselining, rate * QOS_REBASELINE_FACTOR)
            } else {
                (phase, rate)
            }
        }
    }
}

struct ControllerState {
    phase: Phase,
    rate: f64,
    sampler: Option<(PeriodicTask, StatsSlot)>,
}

/// Adaptive [`RateSource`] driven by live latency measurements.
///
/// Every call to [`current_rate`](RateSource::current_rate) advances the
/// state machine. The latency probe worker for a phase is started on the
/// first evaluation in that phase and stopped when the phase changes, so
/// stats from one phase never leak into the next.
///
/// Must be polled from within a Tokio runtime.
pub struct QosRateController {
    probe: Arc<dyn LatencyProbe>,
    state: Mutex<ControllerState>,
}

impl QosRateController {
    pub fn new(probe: Arc<dyn LatencyProbe>) -> Self {
        Self::with_initial_rate(probe, QOS_INITIAL_RATE)
    }

    pub fn with_initial_rate(probe: Arc<dyn LatencyProbe>, rate: f64) -> Self {
        Self {
            probe,
            state: Mutex::new(ControllerState {
                phase: Phase::Baselining,
                rate,
                sampler: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Rate without advancing the state machine.
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    /// Advance the state machine once and return the resulting rate.
    pub fn evaluate(&self) -> f64 {
        let mut state = self.lock();

        if state.sampler.is_none() {
            debug!("QoS {} at {}", state.phase.name(), human_rate(state.rate));
            let slot = StatsSlot::default();
            let task = spawn_sampler(
                Arc::clone(&self.probe),
                state.phase.window(),
                state.phase.probe_interval(),
                Arc::clone(&slot),
            );
            state.sampler = Some((task, slot));
        }

        let stats = state.sampler.as_ref().and_then(|(_, slot)| take_stats(slot));
        let (next, rate) = transition(state.phase, state.rate, stats.as_ref(), Instant::now());

        if let (Phase::Baselining, Phase::ThrottlingUp { baseline }) = (state.phase, next) {
            debug!(
                "QoS baselined: mean = {:.1}ms, stddev = {:.1}ms",
                baseline.mean, baseline.stddev
            );
        }

        if rate != state.rate {
            debug!("QoS {}: rate {}", next.name(), human_rate(rate));
        }

        if !next.same_kind(&state.phase) {
            debug!("QoS {} -> {}", state.phase.name(), next.name());
            state.sampler = None;
        }

        state.phase = next;
        state.rate = rate;
        rate
    }
}

impl RateSource for QosRateController {
    fn current_rate(&self) -> Rate {
        Rate::Limited(self.evaluate())
    }
}
