//! seekr entrypoint: config, extensions, API server and seekrd.

use clap::Parser;
use seekr::extensions::{ExtensionCatalog, PLUGINS_ENV_VAR, extension_names_from_env};
use seekr::server::ApiServer;
use seekr::{SeekrConfig, SeekrError};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// seekr: OSINT data collection with a background service daemon.
#[derive(Parser)]
#[command(name = "seekr", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IP to serve the API on (0.0.0.0 or 127.0.0.1 usually).
    #[arg(long)]
    ip: Option<String>,

    /// Port to serve the API on.
    #[arg(long)]
    port: Option<u16>,

    /// Fail instead of falling back to a free port when the port is taken.
    #[arg(long)]
    force_port: bool,

    /// Database file location.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Seconds between seekrd ticks.
    #[arg(long)]
    interval: Option<u64>,

    /// Write the default config file when none exists.
    #[arg(long)]
    write_default_config: bool,

    /// Run every due service once, save the database and exit.
    #[arg(long)]
    once: bool,

    /// Print the extensions compiled into this binary and exit.
    #[arg(long)]
    list_extensions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let catalog = ExtensionCatalog::builtin();
    if cli.list_extensions {
        for (name, description) in catalog.describe() {
            println!("{name:<16} {description}");
        }
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SeekrConfig::default_config_path);

    let (mut settings, config_missing) = match SeekrConfig::from_file(&config_path) {
        Ok(settings) => (settings, false),
        Err(SeekrError::NoConfigFile(_)) => (SeekrConfig::default(), true),
        Err(e) => {
            eprintln!("Failed to load config {}: {e}", config_path.display());
            return Err(e.into());
        }
    };
    apply_overrides(&mut settings, &cli);
    settings.validate()?;

    let _log_guard = init_tracing(&settings.general.log_file);
    tracing::info!("Welcome to seekr v{}", env!("CARGO_PKG_VERSION"));

    if config_missing {
        tracing::warn!("no config at {}, using defaults", config_path.display());
        if cli.write_default_config {
            match SeekrConfig::default().save_to_file(&config_path) {
                Ok(()) => tracing::info!("wrote default config to {}", config_path.display()),
                Err(e) => tracing::error!("cannot write default config: {e}"),
            }
        }
    }

    let extensions = extension_names_from_env();
    if !extensions.is_empty() {
        tracing::info!(?extensions, "loading extensions from {PLUGINS_ENV_VAR}");
    }

    let mut prepared = seekr::startup::prepare(settings, &extensions, &catalog)
        .map_err(|e| {
            tracing::error!(error = %e, "startup failed");
            anyhow::anyhow!("seekr failed to start: {e}")
        })?;

    if cli.once {
        let report = prepared.run_once()?;
        tracing::info!(ran = ?report.ran, failed = ?report.failed, "single tick finished");
        return Ok(());
    }

    let scheduler = prepared.scheduler;
    let registrar = scheduler.registrar();
    let seekrd = if prepared.state.read_settings(|s| s.seekrd.enabled)? {
        Some(scheduler.start()?)
    } else {
        tracing::info!("seekrd disabled by config");
        None
    };

    let server = ApiServer::start(prepared.state.clone(), registrar).await?;
    tracing::info!("seekr ready on http://{}/api/info", server.addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    server.shutdown();
    if let Some(handle) = seekrd {
        let summary = handle.shutdown().await?;
        tracing::info!(ticks = summary.ticks, failures = summary.failures, "seekrd drained");
    }
    seekr::scheduler::tasks::save_database(&prepared.state)?;
    Ok(())
}

fn apply_overrides(settings: &mut SeekrConfig, cli: &Cli) {
    if let Some(ip) = &cli.ip {
        settings.server.ip = ip.clone();
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.force_port {
        settings.server.force_port = true;
    }
    if let Some(db) = &cli.db {
        settings.general.data_file = db.clone();
    }
    if let Some(interval) = cli.interval {
        settings.seekrd.interval_secs = interval;
    }
}

/// Log to stderr and to `log_file`. The returned guard flushes the file on drop.
fn init_tracing(log_file: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seekr=info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file.file_name();

    match file_name {
        Some(name) => {
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
