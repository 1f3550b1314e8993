use anyhow::{bail, Context, Result};
use clap::Parser;
use drift_sentinel::config::Config;
use drift_sentinel::daemon::SentinelDaemon;
use drift_sentinel::run_state::RunState;
use drift_sentinel::signals::spawn_signal_listener;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Probe local services and keep the knowledge artifacts of a tree in sync.
#[derive(Debug, Parser)]
#[command(name = "drift-sentinel", version, about)]
struct Args {
    /// Directory tree to watch for drift
    watch_root: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Health target as NAME=PORT (repeatable, replaces configured targets)
    #[arg(short, long = "target", value_name = "NAME=PORT")]
    targets: Vec<String>,

    /// Host to probe
    #[arg(long)]
    host: Option<String>,

    /// Seconds between health reports
    #[arg(long, value_name = "SECS")]
    health_interval: Option<u64>,

    /// Seconds between drift/integrity cycles
    #[arg(long, value_name = "SECS")]
    drift_interval: Option<u64>,

    /// Run one health report and one drift cycle, then exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let default_filter = if args.verbose {
        "drift_sentinel=debug,info"
    } else {
        "drift_sentinel=info,info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = load_config(&args)?;

    let watch_root = args
        .watch_root
        .canonicalize()
        .with_context(|| format!("Watched root {:?} is not accessible", args.watch_root))?;
    if !watch_root.is_dir() {
        bail!("Watched root {} is not a directory", watch_root.display());
    }

    let run_state = Arc::new(RunState::new());
    let daemon = SentinelDaemon::from_config(&watch_root, &config, Arc::clone(&run_state))
        .context("Failed to initialize sentinel")?;

    if args.once {
        let report = daemon.run_once().await?;
        info!(
            "Single pass complete: {} stale file(s), regenerated: {}",
            report.stale_files.len(),
            report.regenerated
        );
        for failure in &report.failures {
            warn!("{}", failure);
        }
        if report.single_pass_failed() {
            bail!("Integrity check failed during single pass");
        }
        return Ok(());
    }

    let listener = spawn_signal_listener(Arc::clone(&run_state));

    info!("Drift Sentinel starting: monitoring {}", watch_root.display());
    let outcome = daemon.run().await;
    listener.abort();

    if let Err(e) = outcome {
        error!("Daemon error: {}", e);
        return Err(e.into());
    }

    info!("Sentinel shut down cleanly");
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    config.apply_target_overrides(&args.targets)?;
    if let Some(host) = &args.host {
        config.health.host = host.clone();
    }
    if let Some(secs) = args.health_interval {
        config.health.interval_secs = secs;
    }
    if let Some(secs) = args.drift_interval {
        config.drift.interval_secs = secs;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
