//! Global constants for the glacier-pipe application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

use std::time::Duration;

// Size constants
/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Tree hash leaf size (1MB, fixed by the remote integrity protocol)
pub const TREE_HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Smallest accepted part size (1MB)
pub const MIN_PART_SIZE: u64 = MIB;

/// Largest accepted part size (4GB)
pub const MAX_PART_SIZE: u64 = 4 * 1024 * MIB;

/// Default part size (16MB)
pub const DEFAULT_PART_SIZE: u64 = 16 * MIB;

/// Segment size of the staging buffer pool (1MB)
pub const STAGING_SEGMENT_SIZE: usize = 1024 * 1024;

/// Read size used when draining the source into the staging buffer (64KB)
pub const SOURCE_READ_SIZE: usize = 64 * 1024;

// Retry constants
/// Default retry ceiling per part; at ~5 minutes between attempts this spans
/// roughly three and a half days
pub const DEFAULT_MAX_RETRIES: u32 = 1000;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Growth factor applied per failed attempt
pub const RETRY_BACKOFF_FACTOR: f64 = 1.5;

/// Maximum retry delay in milliseconds (5 minutes)
pub const RETRY_MAX_DELAY_MS: u64 = 300_000;

// Rate limiting constants
/// Number of pacing quanta per wall-clock second
pub const QUANTA_PER_SECOND: u32 = 20;

/// Length of one pacing quantum
pub const QUANTUM: Duration = Duration::from_millis(1000 / QUANTA_PER_SECOND as u64);

// Adaptive rate constants
/// Conservative rate used while baselining (16KB/s)
pub const QOS_INITIAL_RATE: f64 = 16384.0;

/// Samples collected to establish the latency baseline
pub const QOS_BASELINE_WINDOW: usize = 40;

/// Samples per window while throttling up
pub const QOS_THROTTLE_UP_WINDOW: usize = 5;

/// Samples per window while throttling down
pub const QOS_THROTTLE_DOWN_WINDOW: usize = 5;

/// Samples per window while holding
pub const QOS_HOLD_WINDOW: usize = 10;

/// Probe cadence for baselining and throttling
pub const QOS_PROBE_INTERVAL: Duration = Duration::from_millis(800);

/// Probe cadence while holding
pub const QOS_HOLD_PROBE_INTERVAL: Duration = Duration::from_millis(5000);

/// Longest time the controller holds before re-baselining (10 minutes)
pub const QOS_MAX_HOLD: Duration = Duration::from_secs(10 * 60);

/// Rate multiplier for a clean throttling-up window
pub const QOS_INCREASE_FACTOR: f64 = 1.1;

/// Rate multiplier when throttling up runs into congestion
pub const QOS_BACKOFF_FACTOR: f64 = 0.9;

/// Rate multiplier for each congested throttling-down window
pub const QOS_DECREASE_FACTOR: f64 = 0.99;

/// Rate multiplier applied when a hold times out
pub const QOS_REBASELINE_FACTOR: f64 = 0.5;

/// Timeout for a single latency probe
pub const QOS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Progress reporting constants
/// Interval of the idle-flush heartbeat for progress observers
pub const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Interval at which the config file is polled when reloading is enabled
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

// Remote service constants
/// Account id placeholder meaning "the account owning the credentials"
pub const DEFAULT_ACCOUNT_ID: &str = "-";

/// Value of the `x-amz-glacier-version` header
pub const GLACIER_API_VERSION: &str = "2012-06-01";

/// Known region aliases accepted in place of an endpoint URL
pub const GLACIER_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-2",
    "ap-northeast-1",
];

// Default file names
pub const DEFAULT_CONFIG_NAME: &str = ".glacier-pipe.yaml";
