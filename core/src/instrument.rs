//! The single execution path every job body goes through.
//!
//! [`JobRunner::run`] times a body, writes the start/finish/error log lines under
//! [`JOB_TARGET`](crate::logx::JOB_TARGET) and records exactly one counter update per call.
//! [`Handler`] binds a body to its [`JobInfo`] so dispatch loops only see `invoke`/`spawn`.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::job::{Event, JobInfo};
use crate::logx::JOB_TARGET;
use crate::store::CounterStore;

/// Boxed future returned by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased job body.
pub type JobFn = Arc<dyn Fn(Event) -> JobFuture + Send + Sync>;

/// Runs job bodies through the instrumentation path.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn CounterStore>,
    in_flight: Arc<AtomicUsize>,
}

impl JobRunner {
    /// Runner writing through to `store`.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store, in_flight: Arc::new(AtomicUsize::new(0)) }
    }

    /// The store every run records into.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Detached executions started through [`Handler::spawn`] that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Await `body`, log it, record it, and hand back its result untouched.
    pub async fn run<T, E, Fut>(&self, job: &JobInfo, body: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        info!(
            target: JOB_TARGET,
            key = %job.key,
            description = %job.description,
            category = job.category_label(),
            started_at = %Local::now().to_rfc3339(),
            "job started"
        );

        let result = body.await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(_) => {
                info!(
                    target: JOB_TARGET,
                    key = %job.key,
                    description = %job.description,
                    category = job.category_label(),
                    elapsed_secs = elapsed,
                    "job finished"
                );
                self.record(job, elapsed, false);
            }
            Err(e) => {
                error!(
                    target: JOB_TARGET,
                    key = %job.key,
                    description = %job.description,
                    category = job.category_label(),
                    elapsed_secs = elapsed,
                    error = %format!("{e:#}"),
                    "job error"
                );
                self.record(job, elapsed, true);
            }
        }
        result
    }

    fn record(&self, job: &JobInfo, elapsed: f64, error: bool) {
        if let Err(e) = self.store.update(&job.key, elapsed, error) {
            warn!(key = %job.key, error = %e, "counter update failed");
        }
    }
}

/// Decrements the in-flight count when a detached execution ends, however it ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An instrumented job: identity + body + runner.
#[derive(Clone)]
pub struct Handler {
    info: Arc<JobInfo>,
    body: JobFn,
    runner: JobRunner,
}

impl Handler {
    /// Wrap `body` so every invocation goes through `runner`.
    pub fn new<F, Fut>(info: JobInfo, runner: JobRunner, body: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: JobFn = Arc::new(move |event| Box::pin(body(event)));
        Self { info: Arc::new(info), body, runner }
    }

    /// Job identity.
    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    /// Run once and wait; failures come back unchanged.
    pub async fn invoke(&self, event: Event) -> anyhow::Result<()> {
        self.runner.run(&self.info, (self.body)(event)).await
    }

    /// Fire-and-forget execution on its own task. Overlapping runs of the same job are allowed.
    pub fn spawn(&self, event: Event) -> JoinHandle<()> {
        let guard = InFlight::enter(&self.runner.in_flight);
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.invoke(event).await {
                debug!(key = %this.info.key, error = %format!("{e:#}"), "detached job failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result as StoreResult};
    use crate::store::{MemoryCounterStore, Stats};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(String, f64, bool)>>,
    }

    impl CounterStore for RecordingStore {
        fn initialize(&self, _catalog: &[&str]) -> StoreResult<()> {
            Ok(())
        }
        fn update(&self, key: &str, duration: f64, error: bool) -> StoreResult<()> {
            self.calls.lock().unwrap().push((key.to_string(), duration, error));
            Ok(())
        }
        fn snapshot(&self) -> StoreResult<Stats> {
            Ok(Stats::new())
        }
        fn reset(&self) -> StoreResult<()> {
            Ok(())
        }
        fn prune(&self, _max_entries: usize) -> StoreResult<usize> {
            Ok(0)
        }
    }

    fn disk_full() -> Error {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
    }

    struct BrokenStore;

    impl CounterStore for BrokenStore {
        fn initialize(&self, _catalog: &[&str]) -> StoreResult<()> {
            Err(disk_full())
        }
        fn update(&self, _key: &str, _duration: f64, _error: bool) -> StoreResult<()> {
            Err(disk_full())
        }
        fn snapshot(&self) -> StoreResult<Stats> {
            Err(disk_full())
        }
        fn reset(&self) -> StoreResult<()> {
            Err(disk_full())
        }
        fn prune(&self, _max_entries: usize) -> StoreResult<usize> {
            Err(disk_full())
        }
    }

    fn sleeper(runner: JobRunner) -> Handler {
        Handler::new(JobInfo::new("job_a", "sleeps then maybe fails"), runner, |event| async move {
            let Event::Manual { line } = event else { anyhow::bail!("unexpected event") };
            let (secs, fail) = line.split_once(':').unwrap_or((line.as_str(), ""));
            tokio::time::sleep(Duration::from_secs_f64(secs.parse()?)).await;
            if fail == "fail" {
                anyhow::bail!("boom after {secs}s");
            }
            Ok(())
        })
    }

    fn manual(line: &str) -> Event {
        Event::Manual { line: line.to_string() }
    }

    #[tokio::test(start_paused = true)]
    async fn three_runs_one_failure() {
        let store = Arc::new(MemoryCounterStore::new());
        let handler = sleeper(JobRunner::new(store.clone()));

        handler.invoke(manual("1.0")).await.unwrap();
        assert!(handler.invoke(manual("2.0:fail")).await.is_err());
        handler.invoke(manual("0.5")).await.unwrap();

        let rec = store.get("job_a").unwrap();
        assert_eq!(rec.runs, 3);
        assert_eq!(rec.errors, 1);
        assert!((rec.total_duration - 3.5).abs() < 1e-3, "{}", rec.total_duration);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_recorded_once_and_resurfaced() {
        let store = Arc::new(RecordingStore::default());
        let handler = sleeper(JobRunner::new(store.clone()));

        let err = handler.invoke(manual("0.25:fail")).await.unwrap_err();
        assert_eq!(err.to_string(), "boom after 0.25s");

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (key, duration, error) = &calls[0];
        assert_eq!(key, "job_a");
        assert!(*error);
        assert!((duration - 0.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn result_passes_through() {
        let store = Arc::new(RecordingStore::default());
        let runner = JobRunner::new(store.clone());
        let info = JobInfo::new("answer", "returns a value");
        let v: Result<u32, String> = runner.run(&info, async { Ok(42) }).await;
        assert_eq!(v, Ok(42));
        let e: Result<u32, String> = runner.run(&info, async { Err("nope".to_string()) }).await;
        assert_eq!(e, Err("nope".to_string()));
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.iter().map(|c| c.2).collect::<Vec<_>>(), vec![false, true]);
    }

    #[tokio::test]
    async fn store_failure_does_not_leak_into_job() {
        let runner = JobRunner::new(Arc::new(BrokenStore));
        let info = JobInfo::new("k", "d");
        let v: Result<&str, String> = runner.run(&info, async { Ok("fine") }).await;
        assert_eq!(v, Ok("fine"));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_spawns_both_count() {
        let store = Arc::new(MemoryCounterStore::new());
        let runner = JobRunner::new(store.clone());
        let handler = sleeper(runner.clone());

        let a = handler.spawn(manual("2.0"));
        let b = handler.spawn(manual("1.0:fail"));
        assert_eq!(runner.in_flight(), 2);
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(runner.in_flight(), 0);
        let rec = store.get("job_a").unwrap();
        assert_eq!(rec.runs, 2);
        assert_eq!(rec.errors, 1);
        assert!((rec.total_duration - 3.0).abs() < 1e-3);
    }
}
