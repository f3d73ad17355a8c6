//! Remote archive storage.
//!
//! The pipeline only sees [`ArchiveTarget`], three operations that open,
//! fill and complete a multipart upload. [`GlacierTarget`] implements them
//! on the Glacier API; tests substitute an in-memory fake.

pub mod client;
pub mod glacier;
pub mod target;

pub use client::{create_glacier_client, region_for_endpoint, CredentialSource, GlacierConnection};
pub use glacier::GlacierTarget;
pub use target::{ArchiveTarget, PartBody, PartRange, PartReader};
