use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cronwatch_core::cfg::{self, AppId};
use cronwatch_core::store::{CounterStore, FileCounterStore, Summary};
use cronwatch_core::{catalog, logx};
use tracing::{debug, info};

/// The daemon's config dir; statsctl reads the same `config.toml`.
const DAEMON: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: "cronwatch",
};

#[derive(Parser)]
#[command(name=env!("CARGO_PKG_NAME"), version, about="Inspect and maintain cronwatch job counters")]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Stats file; defaults to `stats_path` from the daemon config.
    #[arg(long, global = true)]
    stats: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the stats file with every known key, if it does not exist.
    Init,
    /// Print counters and derived metrics.
    Show {
        /// Raw snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Zero every counter, keeping the keys.
    Reset,
    /// Keep only the most recently run keys.
    Prune {
        #[arg(long)]
        max: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    logx::init(level);

    let path = match cli.stats {
        Some(p) => p,
        None => cfg::load_or_init(&DAEMON)?.resolve_stats_path(&DAEMON)?,
    };
    debug!(path = %path.display(), "using stats file");
    let store = FileCounterStore::open(&path);

    match cli.cmd {
        Command::Init => {
            store.initialize(catalog::KNOWN_KEYS).with_context(|| format!("initialize {}", path.display()))?;
            println!("initialized {}", path.display());
        }
        Command::Show { json } => {
            let snap = store.snapshot().with_context(|| format!("read {}", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snap)?);
            } else {
                print_summary(&Summary::from_stats(&snap));
            }
        }
        Command::Reset => {
            store.reset().with_context(|| format!("reset {}", path.display()))?;
            info!("counters reset");
            println!("reset {}", path.display());
        }
        Command::Prune { max } => {
            let dropped = store.prune(max).with_context(|| format!("prune {}", path.display()))?;
            println!("pruned {dropped} keys");
        }
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("{:<40} {:>6} {:>6} {:>6} {:>10}", "key", "runs", "ok", "errors", "avg_s");
    for job in &summary.jobs {
        println!(
            "{:<40} {:>6} {:>6} {:>6} {:>10.3}",
            job.key, job.runs, job.successes, job.errors, job.average_duration
        );
    }
    for (label, totals) in [("time_based", summary.time_based), ("event_based", summary.event_based)] {
        println!(
            "{label}: runs={} successes={} failures={}",
            totals.runs, totals.successes, totals.failures
        );
    }
}
