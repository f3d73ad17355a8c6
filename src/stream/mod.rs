//! Byte stream plumbing between the source and the network.
//!
//! - [`staging`]: the fixed-capacity buffer that lets one pass over the
//!   unrepeatable source be replayed for every upload attempt
//! - [`throttle`]: an `AsyncRead` adapter pacing reads to a target rate
//! - [`progress`]: byte counting with a heartbeat for progress observers

pub mod progress;
pub mod staging;
pub mod throttle;

pub use progress::{ObservedReader, ProgressMeter};
pub use staging::{StagingBuffer, StagingReader, StagingWriter};
pub use throttle::ThrottledReader;
