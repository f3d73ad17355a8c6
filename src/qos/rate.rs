use std::fmt;
use std::sync::Arc;

use crate::constants::QUANTA_PER_SECOND;
use crate::utils::format::human_rate;

/// A target upload rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// No pacing at all
    Unlimited,
    /// Bytes per second
    Limited(f64),
}

impl Rate {
    /// Bytes per second, or `None` when unlimited.
    pub fn bytes_per_second(&self) -> Option<f64> {
        match self {
            Rate::Unlimited => None,
            Rate::Limited(rate) => Some(*rate),
        }
    }

    /// Bytes allowed in one pacing quantum, never less than one so a
    /// very low rate still makes progress.
    pub fn quantum_budget(&self) -> Option<u64> {
        match self {
            Rate::Unlimited => None,
            Rate::Limited(rate) => {
                let budget = (rate / QUANTA_PER_SECOND as f64).round();
                Some(if budget.is_finite() && budget >= 1.0 {
                    budget as u64
                } else if budget.is_infinite() {
                    u64::MAX
                } else {
                    1
                })
            }
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rate::Unlimited => write!(f, "unlimited"),
            Rate::Limited(rate) => write!(f, "{}", human_rate(*rate)),
        }
    }
}

/// Something that decides how fast the uploader may send.
///
/// Polled by the rate limiter at every quantum boundary. Implementations may
/// advance internal state as a side effect of being polled.
pub trait RateSource: Send + Sync {
    fn current_rate(&self) -> Rate;
}

impl<T: RateSource + ?Sized> RateSource for Arc<T> {
    fn current_rate(&self) -> Rate {
        (**self).current_rate()
    }
}

/// Operator-configured constant rate.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub f64);

impl RateSource for FixedRate {
    fn current_rate(&self) -> Rate {
        Rate::Limited(self.0)
    }
}

/// No throttling.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedRate;

impl RateSource for UnlimitedRate {
    fn current_rate(&self) -> Rate {
        Rate::Unlimited
    }
}
