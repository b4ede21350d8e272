use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use super::Probe;
use crate::job::Event;

/// What moved a polled file's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrChange {
    /// Modification time or size differs.
    Modified,
    /// The file exists now but did not before.
    Appeared,
    /// The file existed before but is gone now.
    Missing,
}

/// Attributes compared between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
    /// Size in bytes.
    pub len: u64,
}

/// Polls one file's modification time and size. A missing file is a valid state.
pub struct FileProbe {
    path: PathBuf,
}

impl FileProbe {
    /// Probe over `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Probe for FileProbe {
    type State = Option<FileStamp>;

    fn name(&self) -> &'static str { "file_attr" }

    fn observe(&mut self) -> Option<FileStamp> {
        let meta = fs::metadata(&self.path).ok()?;
        Some(FileStamp { modified: meta.modified().ok(), len: meta.len() })
    }

    fn diff(&self, prev: &Option<FileStamp>, curr: &Option<FileStamp>) -> Vec<Event> {
        let change = match (prev, curr) {
            (Some(p), Some(c)) if p != c => AttrChange::Modified,
            (None, Some(_)) => AttrChange::Appeared,
            (Some(_), None) => AttrChange::Missing,
            _ => return Vec::new(),
        };
        vec![Event::FileAttr { path: self.path.clone(), change }]
    }
}
