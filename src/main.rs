use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use tagwatch::checker::UpdateChecker;
use tagwatch::config::{Config, LoggingConfig};
use tagwatch::containers::StaticSource;
use tagwatch::notify::{LogChannel, NotificationHub};
use tagwatch::registry::client::RegistryClient;
use tagwatch::registry::rate_limit::RateLimiter;
use tagwatch::scheduler::{Scheduler, TaskHandler};
use tagwatch::service::UpdateService;

#[derive(Parser)]
#[command(name = "tagwatch")]
#[command(version, about = "Watches container images for newer registry tags")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single check pass and exit
    Check {
        /// Image references to check instead of the configured watch list
        images: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _guard = init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Some(Command::Check { images }) => runtime.block_on(run_check_once(config, images)),
        None => runtime.block_on(run_daemon(config)),
    }
}

/// Set up the global tracing subscriber. The returned guard must outlive the
/// process when file logging is enabled, or buffered lines are lost.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard) = match &config.file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "tagwatch.log".to_string());
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.file.is_none());
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(guard)
}

fn build_service(config: &Config, images: &[String]) -> anyhow::Result<UpdateService> {
    let registry = Arc::new(RegistryClient::new(config.app.registry_timeout()));
    let limiter = Arc::new(RateLimiter::new(
        config.registry.rate_limit.requests_per_minute,
        config.registry.rate_limit.burst,
    ));
    // The per-check ceiling spans rate-limiter wait, token exchange, and the
    // tags fetch, so it is wider than the single-request timeout.
    let check_timeout = config.app.registry_timeout().saturating_mul(3);
    let checker = UpdateChecker::new(
        registry,
        limiter,
        config.containers.version_filters.clone(),
        check_timeout,
    );

    let mut hub = NotificationHub::new();
    for kind in &config.notifications.channels {
        match kind.as_str() {
            "log" => hub.register(Box::new(LogChannel))?,
            other => warn!(kind = other, "unknown notification channel kind, skipping"),
        }
    }

    let source = Arc::new(StaticSource::from_images(images));
    Ok(UpdateService::new(
        source,
        checker,
        hub,
        config.containers.clone(),
        config.app.max_concurrency,
    ))
}

async fn run_check_once(config: Config, images: Vec<String>) -> anyhow::Result<()> {
    let images = if images.is_empty() {
        config.containers.images.clone()
    } else {
        images
    };
    if images.is_empty() {
        anyhow::bail!("no images to check: pass them as arguments or set containers.images");
    }

    let service = build_service(&config, &images)?;
    let summary = service.run_check().await?;
    info!(
        checked = summary.images_checked,
        updates = summary.updates_found,
        failures = summary.failures,
        "check complete"
    );
    Ok(())
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let cadence = config.app.check_cadence();
    let service = Arc::new(build_service(&config, &config.containers.images)?);
    let scheduler = Scheduler::new();

    let handler: TaskHandler = {
        let service = service.clone();
        Arc::new(move || {
            let service = service.clone();
            Box::pin(async move { service.run_check().await.map(|_| ()) })
        })
    };
    scheduler
        .add_task("image-check", "Image update check", &cadence, handler)
        .await?;
    scheduler.start().await;
    info!(cadence = %cadence, "tagwatch running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let health = scheduler.health().await;
    let detail = match &health {
        Ok(()) => "all tasks healthy".to_string(),
        Err(err) => err.to_string(),
    };
    if let Err(err) = service.report_health(health.is_ok(), &detail).await {
        warn!(error = %err, "failed to deliver final health report");
    }

    scheduler.shutdown().await;
    Ok(())
}
