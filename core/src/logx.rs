use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Target every job start/finish/error line is emitted under.
pub const JOB_TARGET: &str = "cronwatch::jobs";

/// File name of the job log inside the log directory (rotated daily).
pub const JOB_LOG_FILE: &str = "job_logs.log";

/// Initialize `tracing` once. Respects `RUST_LOG`; falls back to `default_level`.
pub fn init(default_level: &str) {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", default_level);
    }
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Like [`init`], plus a daily-rotated job log in `log_dir` fed by [`JOB_TARGET`].
///
/// Keep the returned guard alive for the life of the process or buffered lines are lost.
pub fn init_with_job_log(default_level: &str, log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, JOB_LOG_FILE));

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);
    let job_file = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(Targets::new().with_target(JOB_TARGET, Level::INFO));

    let _ = tracing_subscriber::registry().with(console).with(job_file).try_init();
    Ok(guard)
}
