use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use tracing::warn;

use super::Probe;
use crate::job::Event;

/// Polls a directory listing; any added or removed entry is one change.
pub struct DirectoryProbe {
    path: PathBuf,
}

impl DirectoryProbe {
    /// Probe over the entries of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Probe for DirectoryProbe {
    type State = BTreeSet<String>;

    fn name(&self) -> &'static str { "directory" }

    /// An unreadable directory lists as empty.
    fn observe(&mut self) -> BTreeSet<String> {
        match fs::read_dir(&self.path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "directory unreadable");
                BTreeSet::new()
            }
        }
    }

    fn diff(&self, prev: &BTreeSet<String>, curr: &BTreeSet<String>) -> Vec<Event> {
        let added: BTreeSet<String> = curr.difference(prev).cloned().collect();
        let removed: BTreeSet<String> = prev.difference(curr).cloned().collect();
        if added.is_empty() && removed.is_empty() {
            return Vec::new();
        }
        vec![Event::DirectoryChanged { path: self.path.clone(), added, removed }]
    }
}
