use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::notify::{self, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::instrument::Handler;
use crate::job::Event;
use crate::runtime::{Module, ModuleCtx};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// A filesystem change under the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file or directory was created.
    Created(PathBuf),
    /// Contents or metadata changed.
    Modified(PathBuf),
    /// A file or directory was removed.
    Deleted(PathBuf),
    /// Renamed within the watched tree.
    Moved {
        /// Old path.
        from: PathBuf,
        /// New path.
        to: PathBuf,
    },
}

impl FsEvent {
    /// Path the event is about; the destination for moves.
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Modified(p) | FsEvent::Deleted(p) => p,
            FsEvent::Moved { to, .. } => to,
        }
    }
}

/// Map a raw notification to zero or more changes.
///
/// Half renames become a delete (`From`) or a create (`To`); access and other kinds are dropped.
pub fn classify(event: &notify::Event) -> Vec<FsEvent> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(_) => paths.map(FsEvent::Created).collect(),
        EventKind::Remove(_) => paths.map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![FsEvent::Moved { from: from.clone(), to: to.clone() }],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths.map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths.map(FsEvent::Created).collect(),
        EventKind::Modify(_) => paths.map(FsEvent::Modified).collect(),
        _ => Vec::new(),
    }
}

/// Handlers per change kind. Every handler listed for a kind runs for each matching change.
#[derive(Clone, Default)]
pub struct FsRoutes {
    /// Run on create.
    pub created: Vec<Handler>,
    /// Run on modify.
    pub modified: Vec<Handler>,
    /// Run on delete.
    pub deleted: Vec<Handler>,
    /// Run on move.
    pub moved: Vec<Handler>,
}

impl FsRoutes {
    /// Handlers registered for `event`'s kind.
    pub fn handlers_for(&self, event: &FsEvent) -> &[Handler] {
        match event {
            FsEvent::Created(_) => &self.created,
            FsEvent::Modified(_) => &self.modified,
            FsEvent::Deleted(_) => &self.deleted,
            FsEvent::Moved { .. } => &self.moved,
        }
    }

    fn dispatch(&self, event: FsEvent) {
        debug!(?event, "fs change");
        for h in self.handlers_for(&event) {
            h.spawn(Event::File(event.clone()));
        }
    }
}

/// Push-based watcher over a directory tree, debounced.
pub struct FsWatcher {
    root: PathBuf,
    routes: FsRoutes,
}

type FsDebouncer = Debouncer<RecommendedWatcher, RecommendedCache>;

impl FsWatcher {
    /// Watch `root` recursively; the directory is created if missing.
    pub fn new(root: impl Into<PathBuf>, routes: FsRoutes) -> Self {
        Self { root: root.into(), routes }
    }

    fn start(&self) -> crate::Result<(FsDebouncer, mpsc::UnboundedReceiver<FsEvent>)> {
        fs::create_dir_all(&self.root)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        for change in classify(&event.event) {
                            let _ = tx.send(change);
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "fs watcher error");
                    }
                }
            }
        })?;
        debouncer.watch(&self.root, RecursiveMode::Recursive)?;
        info!(root = %self.root.display(), "fs watcher: watching directory");
        Ok((debouncer, rx))
    }
}

impl Module for FsWatcher {
    fn name(&self) -> &'static str { "fs_watcher" }

    fn spawn(self: Box<Self>, mut ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        let started = self.start();
        tokio::spawn(async move {
            let (_debouncer, mut rx) = started?;
            loop {
                tokio::select! {
                    change = rx.recv() => match change {
                        Some(change) => self.routes.dispatch(change),
                        None => break,
                    },
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(root = %self.root.display(), "fs watcher stopping");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::JobRunner;
    use crate::job::JobInfo;
    use crate::runtime::Runtime;
    use crate::store::MemoryCounterStore;
    use notify_debouncer_full::notify::event::{CreateKind, DataChange, RemoveKind};
    use std::sync::Arc;
    use tokio::sync::watch;

    fn raw(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths.iter().fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn classify_kinds() {
        assert_eq!(
            classify(&raw(EventKind::Create(CreateKind::File), &["/w/a"])),
            vec![FsEvent::Created("/w/a".into())]
        );
        assert_eq!(
            classify(&raw(EventKind::Remove(RemoveKind::File), &["/w/a"])),
            vec![FsEvent::Deleted("/w/a".into())]
        );
        assert_eq!(
            classify(&raw(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/w/a"])),
            vec![FsEvent::Modified("/w/a".into())]
        );
        assert_eq!(
            classify(&raw(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &["/w/a", "/w/b"])),
            vec![FsEvent::Moved { from: "/w/a".into(), to: "/w/b".into() }]
        );
        assert_eq!(
            classify(&raw(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/a"])),
            vec![FsEvent::Deleted("/w/a".into())]
        );
        assert_eq!(
            classify(&raw(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/b"])),
            vec![FsEvent::Created("/w/b".into())]
        );
        assert!(classify(&raw(EventKind::Any, &["/w/a"])).is_empty());
    }

    #[test]
    fn moved_path_is_destination() {
        let ev = FsEvent::Moved { from: "/w/a".into(), to: "/w/b".into() };
        assert_eq!(ev.path(), Path::new("/w/b"));
    }

    #[tokio::test]
    async fn routes_fan_out_per_kind() {
        let store = Arc::new(MemoryCounterStore::new());
        let runner = JobRunner::new(store.clone());
        let h = |key: &str| Handler::new(JobInfo::new(key, key), runner.clone(), |_| async { Ok(()) });
        let routes = FsRoutes {
            modified: vec![h("file_modified"), h("keyword_alert")],
            moved: vec![h("file_moved")],
            ..FsRoutes::default()
        };
        assert_eq!(routes.handlers_for(&FsEvent::Modified("/w/a".into())).len(), 2);
        assert!(routes.handlers_for(&FsEvent::Created("/w/a".into())).is_empty());

        routes.dispatch(FsEvent::Modified("/w/a".into()));
        while runner.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get("file_modified").unwrap().runs, 1);
        assert_eq!(store.get("keyword_alert").unwrap().runs, 1);
        assert!(store.get("file_moved").is_none());
    }

    #[tokio::test]
    async fn watcher_sees_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("watched_directory");
        let store = Arc::new(MemoryCounterStore::new());
        let runner = JobRunner::new(store.clone());
        let routes = FsRoutes {
            created: vec![Handler::new(JobInfo::new("file_created", "created"), runner, |_| async {
                Ok(())
            })],
            ..FsRoutes::default()
        };

        let (tx, rx) = watch::channel(false);
        let task = Box::new(FsWatcher::new(&root, routes)).spawn(ModuleCtx { shutdown: rx });
        // give the watcher time to register before writing
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(root.is_dir());
        std::fs::write(root.join("new.txt"), b"x").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while store.get("file_created").is_none() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(seen.is_ok(), "timed out waiting for watcher event");

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unusable_root_fails_at_startup() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let mut rt = Runtime::new(JobRunner::new(Arc::new(MemoryCounterStore::new())));
        rt.add(FsWatcher::new(file.join("watched"), FsRoutes::default()));
        let running = rt.start();

        let exited = tokio::time::timeout(Duration::from_secs(5), async {
            while running.exited().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(exited.is_ok(), "watcher kept running on a bad root");
        assert_eq!(running.exited(), vec!["fs_watcher"]);
        running.shutdown(Duration::from_millis(50)).await;
    }
}
