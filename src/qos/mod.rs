//! Upload rate selection.
//!
//! The rate limiter asks a [`RateSource`] for the target rate at every pacing
//! quantum. Sources available:
//!
//! - [`FixedRate`] / [`UnlimitedRate`]: operator-chosen
//! - [`QosRateController`]: adaptive, backing off when round-trip latency to a
//!   reference endpoint rises above its measured baseline
//! - [`SwappableRate`]: forwards to one of the above and is updated by a
//!   [`ConfigWatcher`] when the config file changes mid-upload
//!
//! The controller's control law is the pure function [`transition`], kept
//! apart from the background latency probing so it can be tested directly.

pub mod controller;
pub mod latency;
pub mod rate;
pub mod reload;

pub use controller::{transition, Phase, QosRateController};
pub use latency::{HttpLatencyProbe, LatencyProbe, LatencyStats, LatencyWindow};
pub use rate::{FixedRate, Rate, RateSource, UnlimitedRate};
pub use reload::{rate_source_for, ConfigWatcher, SwappableRate};
