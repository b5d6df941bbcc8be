use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use batchboard::config::Config;
use batchboard::render::DataRenderer;
use batchboard::report::{parse_time_bound, ReportEngine, TimeWindow};
use batchboard::scheduler::{RefreshScheduler, TriggerPolicy};

/// Telemetry dashboard engine for distributed batch campaigns.
#[derive(Parser)]
#[command(name = "batchboard", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Render one dashboard snapshot and exit.
    Report {
        /// Window start: "HH:MM", "YYYY-MM-DD_HH:MM", or "YYYY-MM-DD".
        #[arg(long)]
        xmin: Option<String>,

        /// Window end, same formats as --xmin.
        #[arg(long)]
        xmax: Option<String>,
    },

    /// Keep the dashboard fresh until interrupted.
    Watch,

    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("batchboard {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for everything but the version subcommand.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        id = %cfg.id,
        "starting batchboard",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cli.command, cfg).await })
}

async fn run(command: Option<Command>, cfg: Config) -> Result<()> {
    let renderer = DataRenderer::new(&cfg.outdir()).context("creating dashboard renderer")?;
    let refresh = cfg.refresh.clone();
    let engine = Arc::new(ReportEngine::new(cfg, renderer));

    match command {
        None => {
            engine.run_cycle(TimeWindow::default()).await?;
        }

        Some(Command::Report { xmin, xmax }) => {
            let window = TimeWindow {
                xmin: xmin.as_deref().map(parse_time_bound).transpose()?,
                xmax: xmax.as_deref().map(parse_time_bound).transpose()?,
            };
            engine.run_cycle(window).await?;
        }

        Some(Command::Watch) => watch(engine, refresh).await?,

        // Handled before the runtime starts.
        Some(Command::Version) => {}
    }

    Ok(())
}

/// Run the refresh scheduler until SIGINT/SIGTERM, emitting automatic
/// triggers on the configured period.
async fn watch<R>(
    engine: Arc<ReportEngine<R>>,
    refresh: batchboard::config::RefreshConfig,
) -> Result<()>
where
    R: batchboard::render::Renderer + Send + Sync + 'static,
{
    let mut scheduler = RefreshScheduler::spawn(engine, refresh.min_interval);
    let mut policy = TriggerPolicy::new(refresh.auto_period);

    // First dashboard right away.
    scheduler.trigger(true);

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = ticker.tick() => {
                policy.take(&scheduler, false);
            }
        }
    }

    // Cooperative shutdown: wait for any in-flight render.
    scheduler.stop().await;

    tracing::info!("batchboard stopped");

    Ok(())
}
