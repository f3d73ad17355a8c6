use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigFile;

/// Command-line arguments for glacier-pipe.
///
/// Values given here override the config file.
#[derive(Parser, Debug)]
#[clap(
    name = "glacier-pipe",
    version,
    about = "Stream stdin into a cold-storage archive vault"
)]
pub struct Args {
    /// Verbose logging
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload stdin as a new archive and print its location
    Upload(UploadOpts),

    /// Write a template configuration file
    InitConfig {
        /// Path of the configuration file to create (default: $HOME/.glacier-pipe.yaml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[clap(long)]
        force: bool,
    },
}

/// Options for the upload subcommand.
#[derive(ClapArgs, Debug, Default)]
pub struct UploadOpts {
    /// Region (e.g. us-east-1) or URL of the endpoint where your vault is
    #[clap(short, long)]
    pub endpoint: Option<String>,

    /// Name of your vault
    #[clap(short, long)]
    pub vault: Option<String>,

    /// Size of each part, a power of two between 1M and 4G (default: 16M)
    #[clap(short = 'p', long = "partsize", value_name = "BYTES")]
    pub part_size: Option<String>,

    /// Maximum number of attempts per part (default: 1000)
    #[clap(short = 'r', long, value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Maximum upload rate in bytes per second, or "automatic"
    #[clap(long, value_name = "BPS|automatic")]
    pub max_upload_rate: Option<String>,

    /// URL probed for latency when the upload rate is automatic
    #[clap(long)]
    pub qos_url: Option<String>,

    /// AWS profile to use for credentials
    #[clap(long)]
    pub profile: Option<String>,

    /// Path to the configuration YAML file (default: $HOME/.glacier-pipe.yaml)
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Re-read the config file while uploading and apply throttling changes
    #[clap(long)]
    pub reload_config: bool,

    /// Archive description (default: <hostname>-<UTC timestamp>)
    pub description: Option<String>,
}

impl UploadOpts {
    /// The flags that were given, as config overrides.
    pub fn overrides(&self) -> ConfigFile {
        ConfigFile {
            endpoint: self.endpoint.clone(),
            vault: self.vault.clone(),
            part_size: self.part_size.clone(),
            max_retries: self.max_retries,
            max_upload_rate: self.max_upload_rate.clone(),
            qos_url: self.qos_url.clone(),
            profile: self.profile.clone(),
            reload_config: self.reload_config.then_some(true),
            ..Default::default()
        }
    }
}
