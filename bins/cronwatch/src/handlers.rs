//! Event job bodies and the wiring that attaches them to the configured sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cronwatch_core::catalog;
use cronwatch_core::cfg::SourcesConfig;
use cronwatch_core::instrument::{Handler, JobRunner};
use cronwatch_core::job::{Event, JobInfo};
use cronwatch_core::runtime::Runtime;
use cronwatch_core::sources::{
    DirectoryProbe, DiskProbe, EnvProbe, FileProbe, FsEvent, FsRoutes, FsWatcher, PollLoop,
};
use tracing::{info, warn};

const FILESYSTEM: &str = "filesystem";
const POLLER: &str = "poller";
const CONSOLE: &str = "console";

fn job(key: &str, description: &str, category: &str) -> JobInfo {
    JobInfo::new(key, description).with_category(category)
}

fn unexpected(key: &str, event: &Event) -> anyhow::Error {
    anyhow::anyhow!("{key}: unexpected event {event:?}")
}

fn poll_every(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// `<path>.backup` next to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".backup");
    PathBuf::from(s)
}

/// Lines of `text` containing `keyword`.
pub fn count_keyword(text: &str, keyword: &str) -> usize {
    text.lines().filter(|l| l.contains(keyword)).count()
}

/// Keyword hits in the file at `path`; `None` when it is not a regular file.
pub async fn scan_keyword(path: &Path, keyword: &str) -> Result<Option<usize>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Ok(None),
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    Ok(Some(count_keyword(&String::from_utf8_lossy(&bytes), keyword)))
}

/// Copy `to` beside itself when either end of the move is a critical file.
pub async fn backup_moved(from: &Path, to: &Path, critical: &[PathBuf]) -> Result<Option<PathBuf>> {
    if !critical.iter().any(|c| c == from || c == to) {
        return Ok(None);
    }
    let dest = backup_path(to);
    tokio::fs::copy(to, &dest)
        .await
        .with_context(|| format!("backup {} -> {}", to.display(), dest.display()))?;
    Ok(Some(dest))
}

/// Logs a watcher change of one kind.
fn fs_logger(runner: &JobRunner, key: &'static str, description: &str) -> Handler {
    Handler::new(job(key, description, FILESYSTEM), runner.clone(), move |event| async move {
        match event {
            Event::File(FsEvent::Moved { from, to }) => {
                info!(from = %from.display(), to = %to.display(), "file moved");
            }
            Event::File(change) => info!(path = %change.path().display(), key, "file changed"),
            other => return Err(unexpected(key, &other)),
        }
        Ok(())
    })
}

fn config_change(runner: &JobRunner, critical: Arc<Vec<PathBuf>>) -> Handler {
    let info = job(catalog::CONFIG_CHANGE, "Check modified file against critical config files", FILESYSTEM);
    Handler::new(info, runner.clone(), move |event| {
        let critical = Arc::clone(&critical);
        async move {
            let Event::File(change) = &event else {
                return Err(unexpected(catalog::CONFIG_CHANGE, &event));
            };
            if critical.iter().any(|c| c == change.path()) {
                warn!(path = %change.path().display(), "critical config file modified");
            }
            Ok(())
        }
    })
}

fn keyword_scan(runner: &JobRunner, keyword: Arc<str>) -> Handler {
    let info = job(catalog::KEYWORD_ALERT, "Scan modified file for keyword", FILESYSTEM);
    Handler::new(info, runner.clone(), move |event| {
        let keyword = Arc::clone(&keyword);
        async move {
            let Event::File(change) = &event else {
                return Err(unexpected(catalog::KEYWORD_ALERT, &event));
            };
            if let Some(hits) = scan_keyword(change.path(), &keyword).await? {
                if hits > 0 {
                    warn!(path = %change.path().display(), keyword = %keyword, hits, "keyword found");
                }
            }
            Ok(())
        }
    })
}

fn config_backup(runner: &JobRunner, critical: Arc<Vec<PathBuf>>) -> Handler {
    let info = job(catalog::CONFIG_BACKUP, "Back up moved critical file", FILESYSTEM);
    Handler::new(info, runner.clone(), move |event| {
        let critical = Arc::clone(&critical);
        async move {
            let Event::File(FsEvent::Moved { from, to }) = &event else {
                return Err(unexpected(catalog::CONFIG_BACKUP, &event));
            };
            if let Some(dest) = backup_moved(from, to, &critical).await? {
                info!(src = %to.display(), dest = %dest.display(), "critical file backed up");
            }
            Ok(())
        }
    })
}

fn directory_changed(runner: &JobRunner) -> Handler {
    let info = job(catalog::DIRECTORY_CHANGE, "Directory listing changed", POLLER);
    Handler::new(info, runner.clone(), |event| async move {
        let Event::DirectoryChanged { path, added, removed } = &event else {
            return Err(unexpected(catalog::DIRECTORY_CHANGE, &event));
        };
        info!(path = %path.display(), ?added, ?removed, "directory changed");
        Ok(())
    })
}

fn file_attr_changed(runner: &JobRunner) -> Handler {
    let info = job(catalog::FILE_ATTRIBUTE_CHANGE, "File attributes changed", POLLER);
    Handler::new(info, runner.clone(), |event| async move {
        let Event::FileAttr { path, change } = &event else {
            return Err(unexpected(catalog::FILE_ATTRIBUTE_CHANGE, &event));
        };
        info!(path = %path.display(), ?change, "file attributes changed");
        Ok(())
    })
}

fn disk_low(runner: &JobRunner) -> Handler {
    let info = job(catalog::DISK_SPACE, "Free disk space below threshold", POLLER);
    Handler::new(info, runner.clone(), |event| async move {
        let Event::DiskLow { mount, free_percent } = &event else {
            return Err(unexpected(catalog::DISK_SPACE, &event));
        };
        warn!(mount = %mount.display(), free_percent, "low disk space");
        Ok(())
    })
}

fn env_changed(runner: &JobRunner) -> Handler {
    let info = job(catalog::ENV_CHANGE, "Environment variable changed", POLLER);
    Handler::new(info, runner.clone(), |event| async move {
        let Event::EnvChanged { name, previous, current } = &event else {
            return Err(unexpected(catalog::ENV_CHANGE, &event));
        };
        info!(%name, ?previous, ?current, "environment variable changed");
        Ok(())
    })
}

/// Handlers for console `click ...` lines and every other line.
pub fn console_handlers(runner: &JobRunner) -> (Handler, Handler) {
    let body = |key: &'static str| {
        move |event: Event| async move {
            let Event::Manual { line } = &event else {
                return Err(unexpected(key, &event));
            };
            info!(%line, key, "console event");
            Ok(())
        }
    };
    let click = Handler::new(job(catalog::CLICK_EVENT, "Manual click event", CONSOLE), runner.clone(), body(catalog::CLICK_EVENT));
    let generic = Handler::new(job(catalog::GENERIC_EVENT, "Manual generic event", CONSOLE), runner.clone(), body(catalog::GENERIC_EVENT));
    (click, generic)
}

/// Add every configured non-console source to `rt`.
pub fn install(rt: &mut Runtime, runner: &JobRunner, sources: &SourcesConfig) {
    let critical = Arc::new(sources.critical_files.clone());

    if let Some(root) = &sources.watch_root {
        let routes = FsRoutes {
            created: vec![fs_logger(runner, catalog::FILE_CREATED, "File created")],
            modified: vec![
                fs_logger(runner, catalog::FILE_MODIFIED, "File modified"),
                config_change(runner, Arc::clone(&critical)),
                keyword_scan(runner, Arc::from(sources.keyword.as_str())),
            ],
            deleted: vec![fs_logger(runner, catalog::FILE_DELETED, "File deleted")],
            moved: vec![
                fs_logger(runner, catalog::FILE_MOVED, "File moved"),
                config_backup(runner, Arc::clone(&critical)),
            ],
        };
        rt.add(FsWatcher::new(root, routes));
    }
    if let Some(dir) = &sources.directory {
        let probe = DirectoryProbe::new(&dir.path);
        rt.add(PollLoop::new(probe, poll_every(dir.interval_secs)).handler(directory_changed(runner)));
    }
    if let Some(file) = &sources.file {
        let probe = FileProbe::new(&file.path);
        rt.add(PollLoop::new(probe, poll_every(file.interval_secs)).handler(file_attr_changed(runner)));
    }
    if let Some(disk) = &sources.disk {
        let probe = DiskProbe::new(&disk.mount, disk.threshold_percent);
        rt.add(PollLoop::new(probe, poll_every(disk.interval_secs)).handler(disk_low(runner)));
    }
    if let Some(env) = &sources.env {
        let probe = EnvProbe::new(&env.var);
        rt.add(PollLoop::new(probe, poll_every(env.interval_secs)).handler(env_changed(runner)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronwatch_core::store::MemoryCounterStore;

    fn runner() -> (Arc<MemoryCounterStore>, JobRunner) {
        let store = Arc::new(MemoryCounterStore::new());
        let runner = JobRunner::new(store.clone());
        (store, runner)
    }

    #[test]
    fn keyword_counts_lines() {
        assert_eq!(count_keyword("ok\nERROR one\nfine\nan ERROR and ERROR\n", "ERROR"), 2);
        assert_eq!(count_keyword("", "ERROR"), 0);
    }

    #[test]
    fn backup_name_appends_suffix() {
        assert_eq!(backup_path(Path::new("/etc/fstab")), PathBuf::from("/etc/fstab.backup"));
        assert_eq!(backup_path(Path::new("a.conf")), PathBuf::from("a.conf.backup"));
    }

    #[tokio::test]
    async fn keyword_scan_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan_keyword(dir.path(), "ERROR").await.unwrap(), None);
        let f = dir.path().join("app.log");
        std::fs::write(&f, "boot\nERROR disk\n").unwrap();
        assert_eq!(scan_keyword(&f, "ERROR").await.unwrap(), Some(1));
        assert_eq!(scan_keyword(&dir.path().join("gone"), "ERROR").await.unwrap(), None);
    }

    #[tokio::test]
    async fn moved_critical_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("ssh_config");
        let to = dir.path().join("ssh_config.new");
        std::fs::write(&to, "Host *\n").unwrap();

        let (store, runner) = runner();
        let h = config_backup(&runner, Arc::new(vec![from.clone()]));
        h.invoke(Event::File(FsEvent::Moved { from: from.clone(), to: to.clone() })).await.unwrap();
        assert_eq!(std::fs::read_to_string(backup_path(&to)).unwrap(), "Host *\n");

        let other = dir.path().join("notes.txt");
        std::fs::write(&other, "x").unwrap();
        h.invoke(Event::File(FsEvent::Moved { from: other.clone(), to: other.clone() })).await.unwrap();
        assert!(!backup_path(&other).exists());

        assert_eq!(store.get(catalog::CONFIG_BACKUP).unwrap().runs, 2);
    }

    #[tokio::test]
    async fn wrong_event_counts_as_error() {
        let (store, runner) = runner();
        let h = disk_low(&runner);
        assert!(h.invoke(Event::Manual { line: "x".into() }).await.is_err());
        let rec = store.get(catalog::DISK_SPACE).unwrap();
        assert_eq!((rec.runs, rec.errors), (1, 1));
    }

    #[tokio::test]
    async fn console_handlers_record_their_keys() {
        let (store, runner) = runner();
        let (click, generic) = console_handlers(&runner);
        click.invoke(Event::Manual { line: "click a".into() }).await.unwrap();
        generic.invoke(Event::Manual { line: "hello".into() }).await.unwrap();
        generic.invoke(Event::Manual { line: String::new() }).await.unwrap();
        assert_eq!(store.get(catalog::CLICK_EVENT).unwrap().runs, 1);
        assert_eq!(store.get(catalog::GENERIC_EVENT).unwrap().runs, 2);
    }

    #[tokio::test]
    async fn install_adds_one_module_per_source() {
        let (_store, runner) = runner();
        let dir = tempfile::tempdir().unwrap();
        let mut sources = SourcesConfig::default();
        sources.watch_root = Some(dir.path().join("watched"));
        sources.directory.as_mut().unwrap().path = dir.path().join("watched");
        sources.file.as_mut().unwrap().path = dir.path().join("watched/permanent.txt");
        sources.disk.as_mut().unwrap().mount = dir.path().to_path_buf();

        let mut rt = Runtime::new(runner.clone());
        install(&mut rt, &runner, &sources);
        let running = rt.start();
        assert_eq!(running.modules(), vec!["fs_watcher", "directory", "file_attr", "disk", "env"]);
        running.shutdown(Duration::from_millis(100)).await;
    }
}
