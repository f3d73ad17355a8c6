//! Configuration loading and validation.
//!
//! Settings come from an optional YAML file (`$HOME/.glacier-pipe.yaml` by
//! default) with command-line flags layered on top. [`PipeConfig`] is the
//! validated result; everything that can be rejected is rejected there,
//! before any network activity.

mod pipe_config;

pub use pipe_config::{
    default_config_path,
    probe_url_for,
    resolve_endpoint,
    validate_part_size,
    ConfigFile,
    Credentials,
    PipeConfig,
    ThrottleMode,
    AUTOMATIC_RATE,
};
