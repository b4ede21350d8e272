mod dashboard;
mod handlers;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cronwatch_core::cfg::{self, AppId, Config};
use cronwatch_core::instrument::{Handler, JobRunner};
use cronwatch_core::runtime::Runtime;
use cronwatch_core::sources::ConsoleInjector;
use cronwatch_core::store::{CounterStore, FileCounterStore};
use cronwatch_core::trigger::TriggerEngine;
use cronwatch_core::{catalog, logx};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"),
};

#[derive(Parser)]
#[command(name=env!("CARGO_PKG_NAME"), version, about="Job scheduler and system event monitor")]
struct Cli {
    /// Config file to use instead of the per-user config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not read manual events from stdin.
    #[arg(long)]
    no_console: bool,
    /// Log level when RUST_LOG is unset; overrides the config.
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => cfg::load_from(path)?,
        None => cfg::load_or_init(&APP)?,
    };
    let level = cli.log.clone().unwrap_or_else(|| cfg.log_level.clone());
    let log_dir = cfg.resolve_log_dir(&APP)?;
    let _guard = logx::init_with_job_log(&level, &log_dir)?;

    let rt = build_runtime().context("build tokio runtime")?;
    let res = rt.block_on(run(cfg, !cli.no_console));
    // stdin reads sit on a blocking thread that never returns on its own
    rt.shutdown_timeout(Duration::from_secs(1));
    res
}

#[cfg(feature = "rt-single")]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

#[cfg(not(feature = "rt-single"))]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

async fn run(cfg: Config, console: bool) -> Result<()> {
    let stats_path = cfg.resolve_stats_path(&APP)?;
    let store: Arc<dyn CounterStore> = Arc::new(FileCounterStore::open(&stats_path));
    store
        .initialize(catalog::KNOWN_KEYS)
        .with_context(|| format!("initialize {}", stats_path.display()))?;
    let job_runner = JobRunner::new(Arc::clone(&store));
    info!("{} boot stats={}", APP.application, stats_path.display());

    let mut engine = TriggerEngine::new(Duration::from_millis(cfg.tick_ms));
    for spec in &cfg.jobs {
        let action = Arc::new(spec.action.clone());
        let handler = Handler::new(spec.info(), job_runner.clone(), move |_| {
            let action = Arc::clone(&action);
            async move { runner::execute(&action).await }
        });
        engine
            .add(&spec.id, spec.trigger.clone(), handler)
            .with_context(|| format!("register job {}", spec.id))?;
    }

    if engine.is_empty() {
        warn!("no time-triggered jobs configured");
    } else {
        info!(triggers = engine.len(), "time-triggered jobs registered");
    }

    let mut rt = Runtime::new(job_runner.clone());
    rt.add(engine);
    handlers::install(&mut rt, &job_runner, &cfg.sources);

    #[cfg(feature = "web-api")]
    if let Some(addr) = &cfg.dashboard_addr {
        let addr = addr.parse::<std::net::SocketAddr>().with_context(|| format!("dashboard_addr {addr}"))?;
        rt.add(dashboard::Dashboard::new(addr, Arc::clone(&store)));
    }
    #[cfg(not(feature = "web-api"))]
    if cfg.dashboard_addr.is_some() {
        warn!("dashboard_addr is set but this build has no web-api feature");
    }

    let quit = if console && cfg.sources.console {
        let (click, generic) = handlers::console_handlers(&job_runner);
        let (injector, quit) = ConsoleInjector::new(BufReader::new(tokio::io::stdin()), click, generic);
        rt.add(injector);
        Some(quit)
    } else {
        None
    };

    let running = rt.start();
    info!(modules = ?running.modules(), "running; Ctrl-C to stop");
    wait_for_exit(quit).await?;

    let left = running.shutdown(Duration::from_millis(cfg.shutdown_grace_ms)).await;
    if left > 0 {
        warn!(in_flight = left, "exiting with jobs still running");
    }
    Ok(())
}

/// Ctrl-C or a console `quit`. A console that closes without `quit` leaves Ctrl-C as the only way out.
async fn wait_for_exit(quit: Option<oneshot::Receiver<()>>) -> Result<()> {
    let console_quit = async move {
        if let Some(rx) = quit {
            if rx.await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    };
    tokio::select! {
        r = signal::ctrl_c() => {
            r.context("listen for ctrl-c")?;
            info!("ctrl-c received, shutting down");
        }
        _ = console_quit => info!("console quit, shutting down"),
    }
    Ok(())
}
