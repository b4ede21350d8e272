use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog;
use crate::error::Result;

/// Cumulative counters for one job key.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    /// Total invocations observed.
    pub runs: u64,
    /// Sum of per-invocation wall-clock durations (seconds).
    pub total_duration: f64,
    /// Invocations that failed. Never exceeds `runs`.
    pub errors: u64,
    /// Epoch millis of the last update, used for pruning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_ms: Option<u64>,
}

impl JobRecord {
    /// Mean duration per run, `0.0` before the first run.
    pub fn average_duration(&self) -> f64 {
        if self.runs == 0 { 0.0 } else { self.total_duration / self.runs as f64 }
    }

    /// Runs that did not fail.
    pub fn successes(&self) -> u64 {
        self.runs.saturating_sub(self.errors)
    }

    fn record(&mut self, duration: f64, error: bool, now_ms: u64) {
        self.runs = self.runs.saturating_add(1);
        self.total_duration += sanitize(duration);
        if error {
            self.errors = self.errors.saturating_add(1);
        }
        self.last_run_ms = Some(now_ms);
    }
}

/// Full counter map, ordered by key.
pub type Stats = BTreeMap<String, JobRecord>;

/// Process-wide counter store. Every method is one linearizable step.
pub trait CounterStore: Send + Sync + 'static {
    /// Seed a zeroed record per key unless the store already exists.
    fn initialize(&self, catalog: &[&str]) -> Result<()>;
    /// Record one invocation of `key`.
    fn update(&self, key: &str, duration: f64, error: bool) -> Result<()>;
    /// Read the whole map, initializing with the known catalog if absent.
    fn snapshot(&self) -> Result<Stats>;
    /// Zero every counter, keeping the keys.
    fn reset(&self) -> Result<()>;
    /// Keep the `max_entries` most recently updated keys; returns how many were dropped.
    fn prune(&self, max_entries: usize) -> Result<usize>;
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 { duration } else { 0.0 }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn seed<S: AsRef<str>>(catalog: &[S]) -> Stats {
    catalog.iter().map(|k| (k.as_ref().to_string(), JobRecord::default())).collect()
}

fn apply_update(stats: &mut Stats, key: &str, duration: f64, error: bool, now_ms: u64) {
    stats.entry(key.to_string()).or_default().record(duration, error, now_ms);
}

fn reset_counters(stats: &mut Stats) {
    for rec in stats.values_mut() {
        rec.runs = 0;
        rec.total_duration = 0.0;
        rec.errors = 0;
    }
}

fn prune_stats(stats: &mut Stats, max_entries: usize) -> usize {
    if stats.len() <= max_entries {
        return 0;
    }
    let mut by_recency: Vec<(String, Option<u64>)> =
        stats.iter().map(|(k, r)| (k.clone(), r.last_run_ms)).collect();
    // Most recent first; never-updated keys sort last.
    by_recency.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let dropped = by_recency.split_off(max_entries);
    for (key, _) in &dropped {
        stats.remove(key);
    }
    dropped.len()
}

/* --------------------- FileCounterStore --------------------- */

/// JSON-file-backed store. No cache: each call is a full load-modify-store round trip
/// under one mutex.
pub struct FileCounterStore {
    path: PathBuf,
    catalog: Vec<String>,
    lock: Mutex<()>,
}

impl FileCounterStore {
    /// Store at `path` seeded with [`catalog::KNOWN_KEYS`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_catalog(path, catalog::KNOWN_KEYS)
    }

    /// Store at `path` seeded with a custom catalog.
    pub fn with_catalog(path: impl Into<PathBuf>, catalog: &[&str]) -> Self {
        Self {
            path: path.into(),
            catalog: catalog.iter().map(|k| k.to_string()).collect(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Missing, unreadable and corrupt files all load as an empty map.
    fn load(&self) -> Stats {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Stats::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "stats unreadable, starting empty");
                return Stats::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "stats corrupt, starting empty");
                Stats::new()
            }
        }
    }

    /// Write temp then rename so readers never see a torn file.
    fn store(&self, stats: &Stats) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let buf = serde_json::to_vec_pretty(stats)?;
        let tmp = self.path.with_extension("tmp");
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&buf)?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn init_locked<S: AsRef<str>>(&self, catalog: &[S]) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        self.store(&seed(catalog))?;
        debug!(path = %self.path.display(), keys = catalog.len(), "stats initialized");
        Ok(true)
    }
}

impl CounterStore for FileCounterStore {
    fn initialize(&self, catalog: &[&str]) -> Result<()> {
        let _g = self.guard();
        self.init_locked(catalog)?;
        Ok(())
    }

    fn update(&self, key: &str, duration: f64, error: bool) -> Result<()> {
        let _g = self.guard();
        let mut stats = self.load();
        apply_update(&mut stats, key, duration, error, now_ms());
        self.store(&stats)
    }

    fn snapshot(&self) -> Result<Stats> {
        let _g = self.guard();
        self.init_locked(self.catalog.as_slice())?;
        Ok(self.load())
    }

    fn reset(&self) -> Result<()> {
        let _g = self.guard();
        let mut stats = self.load();
        reset_counters(&mut stats);
        self.store(&stats)
    }

    fn prune(&self, max_entries: usize) -> Result<usize> {
        let _g = self.guard();
        let mut stats = self.load();
        let dropped = prune_stats(&mut stats, max_entries);
        if dropped > 0 {
            self.store(&stats)?;
        }
        Ok(dropped)
    }
}

/* --------------------- MemoryCounterStore --------------------- */

/// In-memory store with the same semantics; `None` plays the role of "no backing file".
pub struct MemoryCounterStore {
    catalog: Vec<String>,
    stats: Mutex<Option<Stats>>,
}

impl MemoryCounterStore {
    /// Empty store seeded with [`catalog::KNOWN_KEYS`] on first snapshot.
    pub fn new() -> Self {
        Self::with_catalog(catalog::KNOWN_KEYS)
    }

    /// Empty store seeded with a custom catalog on first snapshot.
    pub fn with_catalog(catalog: &[&str]) -> Self {
        Self {
            catalog: catalog.iter().map(|k| k.to_string()).collect(),
            stats: Mutex::new(None),
        }
    }

    /// Counters for one key, if present.
    pub fn get(&self, key: &str) -> Option<JobRecord> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.as_ref().and_then(|s| s.get(key).copied())
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryCounterStore {
    fn initialize(&self, catalog: &[&str]) -> Result<()> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.get_or_insert_with(|| seed(catalog));
        Ok(())
    }

    fn update(&self, key: &str, duration: f64, error: bool) -> Result<()> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        apply_update(stats.get_or_insert_with(Stats::new), key, duration, error, now_ms());
        Ok(())
    }

    fn snapshot(&self) -> Result<Stats> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stats.get_or_insert_with(|| seed(self.catalog.as_slice())).clone())
    }

    fn reset(&self) -> Result<()> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = stats.as_mut() {
            reset_counters(s);
        }
        Ok(())
    }

    fn prune(&self, max_entries: usize) -> Result<usize> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stats.as_mut().map_or(0, |s| prune_stats(s, max_entries)))
    }
}

/* --------------------- derived metrics --------------------- */

/// Per-job line of a [`Summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    /// Job key.
    pub key: String,
    /// `time_based` or `event_based`.
    pub category: &'static str,
    /// Total runs.
    pub runs: u64,
    /// Runs that did not fail.
    pub successes: u64,
    /// Runs that failed.
    pub errors: u64,
    /// Mean duration (seconds).
    pub average_duration: f64,
}

/// Aggregated counts for one category.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CategoryTotals {
    /// Total runs.
    pub runs: u64,
    /// Runs that did not fail.
    pub successes: u64,
    /// Runs that failed.
    pub failures: u64,
}

/// Dashboard view computed from a snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Summary {
    /// One entry per key, in key order.
    pub jobs: Vec<JobSummary>,
    /// Totals over `time_based*` keys.
    pub time_based: CategoryTotals,
    /// Totals over all other keys.
    pub event_based: CategoryTotals,
}

impl Summary {
    /// Derive averages and category totals.
    pub fn from_stats(stats: &Stats) -> Self {
        let mut out = Summary::default();
        for (key, rec) in stats {
            let category = catalog::category_of(key);
            let totals = if category == catalog::TIME_BASED {
                &mut out.time_based
            } else {
                &mut out.event_based
            };
            totals.runs = totals.runs.saturating_add(rec.runs);
            totals.successes = totals.successes.saturating_add(rec.successes());
            totals.failures = totals.failures.saturating_add(rec.errors);
            out.jobs.push(JobSummary {
                key: key.clone(),
                category,
                runs: rec.runs,
                successes: rec.successes(),
                errors: rec.errors,
                average_duration: rec.average_duration(),
            });
        }
        out
    }
}
