//! Utility building blocks shared by the pipeline.
//!
//! ## Components
//!
//! - **Tree hashing**: the hierarchical SHA-256 digest the remote service
//!   uses to verify both individual parts and the whole archive
//! - **Periodic tasks**: owned background timers that stop when dropped
//! - **Formatting**: binary-suffixed size parsing and human-readable output
//!
//! ## Common Use Cases
//!
//! ### Hashing a Stream Incrementally
//!
//! ```
//! use glacier_pipe::utils::tree_hash::{TreeHash, to_hex};
//!
//! let mut hasher = TreeHash::new();
//! for chunk in [&b"part one "[..], &b"part two"[..]] {
//!     hasher.update(chunk);
//! }
//! println!("tree hash: {}", to_hex(&hasher.finalize_reset()));
//! ```
//!
//! ### Parsing a Part Size
//!
//! ```
//! use glacier_pipe::utils::format::parse_size;
//!
//! # fn example() -> anyhow::Result<()> {
//! let part_size = parse_size("64M")?;
//! assert_eq!(part_size, 64 * 1024 * 1024);
//! # Ok(())
//! # }
//! ```

/// SHA-256 tree hash
pub mod tree_hash;

/// Cancellable fixed-delay background tasks
pub mod periodic;

/// Size and rate parsing and formatting
pub mod format;
