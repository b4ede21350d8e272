use anyhow::{Context, Result};
use chrono::Weekday;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog;
use crate::job::{Action, JobSpec, Trigger};

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"cronwatch"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    pub log_level: String,
    /// Counter store file; `<data_dir>/stats.json` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_path: Option<PathBuf>,
    /// Job log directory; `<data_dir>/logs` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Trigger engine clock resolution (ms).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How long shutdown waits for in-flight jobs (ms).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Bind address for the stats endpoint, e.g. `"127.0.0.1:8787"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_addr: Option<String>,
    /// Event source settings.
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Time-triggered jobs.
    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobSpec>,
}

/// Event sources; each one is disabled when its entry is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Read manual events from stdin.
    #[serde(default = "default_true")]
    pub console: bool,
    /// Keyword the modified-file scan looks for.
    #[serde(default = "default_keyword")]
    pub keyword: String,
    /// Paths whose modification or move raises a config alert / backup.
    #[serde(default)]
    pub critical_files: Vec<PathBuf>,
    /// Root of the push-based filesystem watcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_root: Option<PathBuf>,
    /// Directory listing poller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathPoll>,
    /// File attribute poller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathPoll>,
    /// Disk free-space poller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskPoll>,
    /// Environment variable poller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvPoll>,
}

/// Poller over one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPoll {
    /// Polled path.
    pub path: PathBuf,
    /// Seconds between polls.
    #[serde(default = "default_poll_secs")]
    pub interval_secs: u64,
}

/// Disk free-space poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPoll {
    /// Mount point.
    pub mount: PathBuf,
    /// Alert when free space is below this percentage.
    pub threshold_percent: f64,
    /// Seconds between polls.
    #[serde(default = "default_poll_secs")]
    pub interval_secs: u64,
}

/// Environment variable poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvPoll {
    /// Variable name.
    pub var: String,
    /// Seconds between polls.
    #[serde(default = "default_poll_secs")]
    pub interval_secs: u64,
}

fn default_tick_ms() -> u64 { 250 }
fn default_shutdown_grace_ms() -> u64 { 2_000 }
fn default_poll_secs() -> u64 { 10 }
fn default_true() -> bool { true }
fn default_keyword() -> String { "ERROR".to_string() }

impl Default for SourcesConfig {
    fn default() -> Self {
        let watched = PathBuf::from("watched_directory");
        Self {
            console: true,
            keyword: default_keyword(),
            critical_files: vec![PathBuf::from("/etc/ssh/ssh_config"), PathBuf::from("/etc/fstab")],
            watch_root: Some(watched.clone()),
            directory: Some(PathPoll { path: watched.clone(), interval_secs: 10 }),
            file: Some(PathPoll { path: watched.join("permanent.txt"), interval_secs: 10 }),
            disk: Some(DiskPoll { mount: PathBuf::from("/"), threshold_percent: 10.0, interval_secs: 30 }),
            env: Some(EnvPoll { var: "MY_VAR".to_string(), interval_secs: 10 }),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_path: None,
            log_dir: None,
            tick_ms: default_tick_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            dashboard_addr: None,
            sources: SourcesConfig::default(),
            jobs: default_jobs(),
        }
    }
}

impl Config {
    /// Counter store path, falling back to the app data dir.
    pub fn resolve_stats_path(&self, app: &AppId) -> Result<PathBuf> {
        match &self.stats_path {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir(app)?.join("stats.json")),
        }
    }

    /// Job log directory, falling back to the app data dir.
    pub fn resolve_log_dir(&self, app: &AppId) -> Result<PathBuf> {
        match &self.log_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(data_dir(app)?.join("logs")),
        }
    }
}

fn every(id: &str, key: &str, description: &str, period_secs: u64, action: Action) -> JobSpec {
    JobSpec {
        id: id.to_string(),
        key: key.to_string(),
        description: description.to_string(),
        category: None,
        trigger: Trigger::Interval { period_secs },
        action,
    }
}

fn at(id: &str, key: &str, description: &str, day_of_week: Option<Weekday>, hour: u32, minute: u32) -> JobSpec {
    JobSpec {
        id: id.to_string(),
        key: key.to_string(),
        description: description.to_string(),
        category: None,
        trigger: Trigger::Calendar { day_of_week, hour, minute },
        action: Action::Noop,
    }
}

fn exec(cmd: &str, args: &[&str], timeout_ms: u64) -> Action {
    Action::Exec {
        cmd: cmd.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        timeout_ms: Some(timeout_ms),
    }
}

/// Stock job table written into a fresh `config.toml`.
pub fn default_jobs() -> Vec<JobSpec> {
    vec![
        every("run_system_monitor", catalog::SYSTEM_MONITOR, "Monitor CPU, memory, disk usage, and uptime", 300, exec("uptime", &[], 5_000)),
        at("daily_log_rotation", catalog::LOG_ROTATION, "Rotate and archive logs older than 24 hours", None, 0, 0),
        at("automated_backup", catalog::BACKUP, "Backup a critical directory as a ZIP archive", None, 1, 0),
        at("update_check", catalog::UPDATE_CHECK, "Run system package update check", Some(Weekday::Mon), 2, 0),
        at("security_scan", catalog::SECURITY_SCAN, "Run a security scan", Some(Weekday::Sun), 3, 0),
        every("clean_temp", catalog::CLEAN_TEMP, "Clean temporary files", 3_600, Action::Noop),
        every("send_status_report", catalog::STATUS_REPORT, "Generate and print a status report", 1_800, Action::Noop),
        at("db_cleanup", catalog::DB_CLEANUP, "Perform database maintenance tasks", None, 4, 30),
        every("ping_test", catalog::PING_TEST, "Test network connectivity by pinging critical servers", 300, exec("ping", &["-c", "2", "8.8.8.8"], 10_000)),
        every("log_disk_usage", catalog::LOG_DISK_USAGE, "Log disk usage statistics", 3_600, exec("df", &["-h", "/"], 5_000)),
        every("resource_usage_trend_logger", catalog::RESOURCE_TREND, "Log average CPU and memory usage over a period", 600, Action::Noop),
        every("memory_leak_detector", catalog::MEMORY_LEAK_DETECTOR, "Detect if memory usage exceeds a threshold", 120, Action::Noop),
        at("log_file_analysis", catalog::LOG_FILE_ANALYSIS, "Scan a log file for error patterns", None, 5, 15),
        every("service_health_check", catalog::SERVICE_HEALTH_CHECK, "Check if critical services are running", 240, Action::Noop),
        every("temperature_monitoring", catalog::TEMPERATURE_MONITORING, "Monitor CPU/GPU temperatures via sensors", 900, Action::Noop),
        every("force_error_job", catalog::INTENTIONAL_ERROR, "Fails intentionally", 30, Action::Fail { message: "This is a test error for demo purposes.".to_string() }),
    ]
}

fn project_dirs(app: &AppId) -> Result<ProjectDirs> {
    ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Return the data directory for this app, creating it if needed.
pub fn data_dir(app: &AppId) -> Result<PathBuf> {
    let dir = project_dirs(app)?.data_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let path = config_dir(app)?.join("config.toml");
    if path.exists() {
        load_from(&path)
    } else {
        let cfg = Config::default();
        save_config(&path, &cfg)?;
        Ok(cfg)
    }
}

/// Load an explicit config file.
pub fn load_from(path: &Path) -> Result<Config> {
    let txt = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let cfg: Config = toml::from_str(&txt)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Write `cfg` as pretty TOML.
pub fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
