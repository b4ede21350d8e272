#![deny(missing_docs)]
//! cronwatch_core: counters, instrumentation, triggers and event sources for the cronwatch daemon.

/// Configuration helpers (AppId, dirs, load_or_init, job table).
pub mod cfg;
/// Known counter keys and their categories.
pub mod catalog;
/// Error type shared by the store and sources.
pub mod error;
/// Timing/logging/counting wrapper every job runs through.
pub mod instrument;
/// Job model: specs, triggers, actions, events.
pub mod job;
/// Tracing/log initialization helpers.
pub mod logx;
/// Module trait and the dispatcher that starts and stops them.
pub mod runtime;
/// Filesystem watcher, pollers and the console injector.
pub mod sources;
/// File-backed job counters.
pub mod store;
/// Interval and calendar triggers.
pub mod trigger;

pub use error::{Error, Result};
