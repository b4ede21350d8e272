//! Dispatcher: owns the trigger engine and event sources, starts them, stops them.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::instrument::JobRunner;

/// Handed to every module when it starts.
#[derive(Clone)]
pub struct ModuleCtx {
    /// Flips to `true` when the process is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

/// A long-lived background loop.
pub trait Module: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    /// Start the loop; it must return soon after `ctx.shutdown` flips.
    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>>;
}

/// Modules waiting to be started.
pub struct Runtime {
    runner: JobRunner,
    modules: Vec<Box<dyn Module>>,
}

impl Runtime {
    /// Empty runtime; `runner` is consulted for in-flight jobs at shutdown.
    pub fn new(runner: JobRunner) -> Self {
        Self { runner, modules: Vec::new() }
    }

    /// Queue a module.
    pub fn add(&mut self, module: impl Module) {
        self.modules.push(Box::new(module));
    }

    /// Start every queued module.
    pub fn start(self) -> RunningRuntime {
        let (tx, rx) = watch::channel(false);
        let tasks = self
            .modules
            .into_iter()
            .map(|m| {
                let name = m.name();
                info!(module = name, "starting");
                (name, supervise(name, m.spawn(ModuleCtx { shutdown: rx.clone() })))
            })
            .collect();
        RunningRuntime { runner: self.runner, shutdown: tx, tasks }
    }
}

/// Report a module's exit as soon as it happens, not only at shutdown.
fn supervise(name: &'static str, task: JoinHandle<anyhow::Result<()>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => info!(module = name, "stopped"),
            Ok(Err(e)) => error!(module = name, error = %format!("{e:#}"), "module exited with error"),
            Err(e) => error!(module = name, error = %e, "module task failed"),
        }
    })
}

/// Started modules plus the shutdown switch.
pub struct RunningRuntime {
    runner: JobRunner,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl RunningRuntime {
    /// Names of the started modules.
    pub fn modules(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(n, _)| *n).collect()
    }

    /// Modules whose loop has already ended.
    pub fn exited(&self) -> Vec<&'static str> {
        self.tasks.iter().filter(|(_, t)| t.is_finished()).map(|(n, _)| *n).collect()
    }

    /// Stop all loops, then give in-flight jobs up to `grace` to finish.
    /// Jobs still running afterwards are left alone; returns how many there were.
    pub async fn shutdown(self, grace: Duration) -> usize {
        let _ = self.shutdown.send(true);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(module = name, error = %e, "module supervisor failed");
            }
        }

        let deadline = Instant::now() + grace;
        while self.runner.in_flight() > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        let left = self.runner.in_flight();
        if left > 0 {
            warn!(in_flight = left, "shutdown grace elapsed with jobs still running");
        } else {
            info!("shutdown complete");
        }
        left
    }
}
