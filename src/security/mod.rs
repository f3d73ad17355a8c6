//! Security helpers.
//!
//! Credential scrubbing keeps access keys, secrets, session tokens and
//! request signatures out of logs and error output.

pub mod credential_scrubber;

pub use credential_scrubber::{safe_error_message, scrub_credentials};
