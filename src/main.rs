use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use glacier_pipe::cli::{Args, Commands, UploadOpts};
use glacier_pipe::cloud::{create_glacier_client, GlacierTarget};
use glacier_pipe::config::{default_config_path, ConfigFile, PipeConfig};
use glacier_pipe::pipe::{GlacierPipe, LogObserver, PipeOptions, RetryPolicy};
use glacier_pipe::qos::{rate_source_for, ConfigWatcher, RateSource, SwappableRate};
use glacier_pipe::security::safe_error_message;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    match args.command {
        Commands::InitConfig { path, force } => init_config(path, force),
        Commands::Upload(opts) => {
            let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
            // Errors can carry signed request details; never print them raw
            runtime
                .block_on(upload(opts))
                .map_err(|e| anyhow!(safe_error_message(&e)))
        }
    }
}

/// Log to stderr; stdout carries only the archive location.
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

/// Write a template configuration file
fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("No path given and $HOME is not set"))?;

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    ConfigFile::template().save_to_yaml_file(&path)?;
    info!("Edit {} to set your endpoint, vault and credentials", path.display());
    Ok(())
}

/// `<hostname>-<UTC timestamp>`
fn default_description() -> Result<String> {
    let hostname = hostname::get()
        .map_err(|e| anyhow!("Failed to get hostname: {}", e))?
        .to_string_lossy()
        .to_string();

    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    Ok(format!("{}-{}", hostname, timestamp))
}

/// Load the config file (if any) and layer the command-line flags on top
fn load_config(opts: &UploadOpts) -> Result<PipeConfig> {
    let (file, loaded_from) = match opts.config.clone().or_else(default_config_path) {
        Some(path) if path.exists() => (ConfigFile::from_yaml_file(&path)?, Some(path)),
        Some(path) if opts.config.is_some() => {
            bail!("Config file {} not found", path.display())
        }
        _ => (ConfigFile::default(), None),
    };

    let merged = file.merge(opts.overrides());
    PipeConfig::from_config_file(&merged, loaded_from.as_deref())
}

async fn upload(opts: UploadOpts) -> Result<()> {
    let config = load_config(&opts)?;
    let description = match &opts.description {
        Some(description) => description.clone(),
        None => default_description()?,
    };

    let connection = create_glacier_client(&config.endpoint, &config.credentials).await?;
    let target = Arc::new(GlacierTarget::new(connection));

    info!("Upload rate: {}", config.throttle);
    let rate = Arc::new(SwappableRate::new(rate_source_for(&config.throttle)?));
    let _watcher = config.reload_path.as_ref().map(|path| {
        ConfigWatcher::spawn(
            path,
            opts.overrides(),
            config.endpoint.clone(),
            config.throttle.clone(),
            Arc::clone(&rate),
        )
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning upload");
            interrupt.cancel();
        }
    });

    let options = PipeOptions {
        part_size: config.part_size,
        retry: RetryPolicy::new(config.max_retries),
        rate: Some(rate as Arc<dyn RateSource>),
        cancel,
    };

    let mut pipe = GlacierPipe::new(target, options, Arc::new(LogObserver::new()))?;
    let receipt = pipe
        .upload(tokio::io::stdin(), &config.vault, &description)
        .await?;

    println!("{}", receipt.location);
    Ok(())
}
