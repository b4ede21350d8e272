//! Event sources: background loops that turn external state changes into job runs.
//!
//! Pollers share [`PollLoop`]: take a baseline, sleep, observe, diff, dispatch, repeat.
//! Each [`Probe`] only decides how to observe and what counts as a change. Baselines
//! live in memory, so a restart starts from a fresh observation.

mod console;
mod directory;
mod disk;
mod env;
mod file_attr;
mod watch;

pub use console::{ConsoleCommand, ConsoleInjector};
pub use directory::DirectoryProbe;
pub use disk::{free_percent, DiskProbe};
pub use env::EnvProbe;
pub use file_attr::{AttrChange, FileProbe, FileStamp};
pub use watch::{classify, FsEvent, FsRoutes, FsWatcher};

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::instrument::Handler;
use crate::job::Event;
use crate::runtime::{Module, ModuleCtx};

/// Observation and comparison logic for one polled condition.
pub trait Probe: Send + 'static {
    /// Observed state kept as the baseline between polls.
    type State: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read current state. Failures map to a state (e.g. "missing"), never an error.
    fn observe(&mut self) -> Self::State;

    /// Events implied by moving from `prev` to `curr`.
    fn diff(&self, prev: &Self::State, curr: &Self::State) -> Vec<Event>;
}

/// Generic poll loop driving one [`Probe`].
pub struct PollLoop<P: Probe> {
    probe: P,
    interval: Duration,
    handlers: Vec<Handler>,
}

impl<P: Probe> PollLoop<P> {
    /// Poll `probe` every `interval`.
    pub fn new(probe: P, interval: Duration) -> Self {
        Self { probe, interval, handlers: Vec::new() }
    }

    /// Add a handler run for every detected change.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Observe once against `prev`; returns the new baseline and the detected events.
    pub fn poll_once(&mut self, prev: &P::State) -> (P::State, Vec<Event>) {
        let curr = self.probe.observe();
        let events = self.probe.diff(prev, &curr);
        (curr, events)
    }

    fn dispatch(&self, events: Vec<Event>) {
        for event in events {
            debug!(source = self.probe.name(), ?event, "change detected");
            for h in &self.handlers {
                h.spawn(event.clone());
            }
        }
    }
}

impl<P: Probe> Module for PollLoop<P> {
    fn name(&self) -> &'static str { self.probe.name() }

    fn spawn(mut self: Box<Self>, mut ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut baseline = self.probe.observe();
            info!(source = self.probe.name(), interval_ms = self.interval.as_millis() as u64, "poller started");
            loop {
                tokio::select! {
                    _ = sleep(self.interval) => {
                        let (curr, events) = self.poll_once(&baseline);
                        self.dispatch(events);
                        baseline = curr;
                    }
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            info!(source = self.probe.name(), "poller stopping");
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
