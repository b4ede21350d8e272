use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::sources::{AttrChange, FsEvent};

/// A time-triggered job definition, as listed in `config.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobSpec {
    /// Unique trigger id.
    pub id: String,
    /// Counter key the job records under.
    pub key: String,
    /// Human-readable description used in log lines.
    pub description: String,
    /// Optional category label for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// When the job fires.
    pub trigger: Trigger,
    /// What the job does when it fires.
    #[serde(default)]
    pub action: Action,
}

impl JobSpec {
    /// Identity used by the instrumentation wrapper.
    pub fn info(&self) -> JobInfo {
        JobInfo {
            key: self.key.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
        }
    }
}

/// When a time-based job fires. Every trigger repeats.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires every `period_secs`, first one period after registration.
    Interval {
        /// Period between fires (seconds).
        period_secs: u64,
    },
    /// Fires once whenever local wall-clock time matches.
    Calendar {
        /// Restrict to one weekday (`"mon"`, `"sun"`, ...); daily when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day_of_week: Option<Weekday>,
        /// Hour of day, 0-23.
        hour: u32,
        /// Minute of hour, 0-59.
        #[serde(default)]
        minute: u32,
    },
}

impl Trigger {
    /// Reject definitions that can never fire.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Trigger::Interval { period_secs } if *period_secs == 0 => {
                Err("period_secs must be > 0".to_string())
            }
            Trigger::Interval { period_secs } if i64::try_from(*period_secs).is_err() => {
                Err("period_secs out of range".to_string())
            }
            Trigger::Calendar { hour, .. } if *hour > 23 => Err(format!("hour {hour} out of range")),
            Trigger::Calendar { minute, .. } if *minute > 59 => {
                Err(format!("minute {minute} out of range"))
            }
            _ => Ok(()),
        }
    }
}

/// Actions that a configured job can perform.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Do nothing.
    #[default]
    Noop,
    /// Execute an OS command; a non-zero exit counts as a failure.
    Exec {
        /// Command/executable.
        cmd: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Optional timeout (ms).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Always fail with `message`.
    Fail {
        /// Failure description.
        message: String,
    },
}

/// Identity of a job as seen by logs and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Counter key.
    pub key: String,
    /// Human-readable description.
    pub description: String,
    /// Optional category label.
    pub category: Option<String>,
}

impl JobInfo {
    /// Job without a category label.
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self { key: key.into(), description: description.into(), category: None }
    }

    /// Attach a category label.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Category for log lines, `"n/a"` when unset.
    pub fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or("n/a")
    }
}

/// Payload handed to a job body.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A time trigger became due.
    Tick {
        /// Id of the trigger that fired.
        trigger_id: String,
    },
    /// Push notification from the filesystem watcher.
    File(FsEvent),
    /// Directory listing differs from the previous poll.
    DirectoryChanged {
        /// Polled directory.
        path: PathBuf,
        /// Entries that appeared.
        added: BTreeSet<String>,
        /// Entries that disappeared.
        removed: BTreeSet<String>,
    },
    /// Polled file attributes changed.
    FileAttr {
        /// Polled file.
        path: PathBuf,
        /// Kind of transition.
        change: AttrChange,
    },
    /// Free space dropped below the configured threshold.
    DiskLow {
        /// Polled mount point.
        mount: PathBuf,
        /// Observed free space, percent.
        free_percent: f64,
    },
    /// Environment variable value changed.
    EnvChanged {
        /// Variable name.
        name: String,
        /// Previous value, `None` if unset.
        previous: Option<String>,
        /// Current value, `None` if unset.
        current: Option<String>,
    },
    /// Line typed into the console injector.
    Manual {
        /// Raw line.
        line: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_toml_shapes() {
        let spec: JobSpec = toml::from_str(
            r#"
            id = "update_check"
            key = "time_based_update_check"
            description = "Run system package update check"
            trigger = { type = "calendar", day_of_week = "mon", hour = 2 }
            "#,
        )
        .unwrap();
        assert_eq!(
            spec.trigger,
            Trigger::Calendar { day_of_week: Some(Weekday::Mon), hour: 2, minute: 0 }
        );
        assert_eq!(spec.action, Action::Noop);

        let t: Trigger = toml::from_str(r#"type = "interval"
period_secs = 300"#).unwrap();
        assert_eq!(t, Trigger::Interval { period_secs: 300 });
    }

    #[test]
    fn action_exec_defaults() {
        let a: Action = toml::from_str(r#"type = "exec"
cmd = "uptime""#).unwrap();
        assert_eq!(a, Action::Exec { cmd: "uptime".into(), args: vec![], timeout_ms: None });
    }

    #[test]
    fn validate_rejects_unfireable() {
        assert!(Trigger::Interval { period_secs: 0 }.validate().is_err());
        assert!(Trigger::Calendar { day_of_week: None, hour: 24, minute: 0 }.validate().is_err());
        assert!(Trigger::Calendar { day_of_week: None, hour: 4, minute: 60 }.validate().is_err());
        assert!(Trigger::Calendar { day_of_week: None, hour: 4, minute: 30 }.validate().is_ok());
        assert!(Trigger::Interval { period_secs: 30 }.validate().is_ok());
    }

    #[test]
    fn category_label_defaults() {
        assert_eq!(JobInfo::new("a", "b").category_label(), "n/a");
        assert_eq!(JobInfo::new("a", "b").with_category("Disk").category_label(), "Disk");
    }
}
