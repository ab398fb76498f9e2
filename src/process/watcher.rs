use crate::error::{Result, WardenError};
use crate::process::events::{ChangeEvent, SupervisorEvent};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Directory names that are never watched
pub const DEFAULT_IGNORED: &[&str] = &["node_modules", "__pycache__"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    is_dir: bool,
}

type Snapshot = BTreeMap<PathBuf, FileStamp>;

#[derive(Debug)]
struct IgnoreRules {
    entries: Vec<PathBuf>,
}

impl IgnoreRules {
    fn new(entries: &[String]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|e| e.trim().trim_start_matches("./").trim_end_matches('/'))
                .filter(|e| !e.is_empty())
                .map(PathBuf::from)
                .collect(),
        }
    }

    /// `relative` is the entry's path relative to the watched root
    fn is_ignored(&self, relative: &Path) -> bool {
        let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        if file_name.starts_with('.') || DEFAULT_IGNORED.contains(&file_name) {
            return true;
        }

        self.entries.iter().any(|entry| {
            if entry.components().count() == 1 {
                entry.as_os_str() == file_name
            } else {
                relative.starts_with(entry)
            }
        })
    }
}

/// Polling watcher over one working directory
///
/// Each poll compares a fresh snapshot of the tree against the last one.
/// After the first difference the watcher waits out the debounce interval and
/// takes the settled tree as its new baseline, so a burst of saves yields a
/// single `ChangeEvent`.
#[derive(Debug)]
pub struct Watcher {
    name: String,
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    poll_interval: Duration,
    debounce: Duration,
    snapshot: Snapshot,
}

impl Watcher {
    /// Take the initial snapshot of `root`
    ///
    /// Fails with `WatchFailure` if `root` is missing or not a directory.
    pub async fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        ignore_watch: &[String],
        poll_interval: Duration,
        debounce: Duration,
    ) -> Result<Self> {
        let mut watcher = Self {
            name: name.into(),
            root: root.into(),
            ignore: Arc::new(IgnoreRules::new(ignore_watch)),
            poll_interval,
            debounce,
            snapshot: Snapshot::new(),
        };

        watcher.snapshot = watcher.scan().await?;
        debug!(
            "Watching {} for {} ({} entries)",
            watcher.root.display(),
            watcher.name,
            watcher.snapshot.len()
        );

        Ok(watcher)
    }

    /// Wait for the next (debounced) change in the tree
    pub async fn next_change(&mut self) -> Result<ChangeEvent> {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let current = self.scan().await?;
            let Some(changed_path) = first_difference(&self.snapshot, &current) else {
                continue;
            };

            tokio::time::sleep(self.debounce).await;
            self.snapshot = self.scan().await?;

            return Ok(ChangeEvent {
                spec_name: self.name.clone(),
                changed_path,
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Forward changes to the supervisor until the receiver goes away
    ///
    /// A scan failure (the root was removed, for instance) ends the task and
    /// with it watching for this process.
    pub async fn run(mut self, events: mpsc::UnboundedSender<SupervisorEvent>) {
        loop {
            match self.next_change().await {
                Ok(change) => {
                    info!(
                        "Change detected for {}: {}",
                        self.name,
                        change.changed_path.display()
                    );
                    if events.send(SupervisorEvent::Change(change)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{}; watching disabled for {}", e, self.name);
                    break;
                }
            }
        }
    }

    async fn scan(&self) -> Result<Snapshot> {
        let root = self.root.clone();
        let ignore = Arc::clone(&self.ignore);

        tokio::task::spawn_blocking(move || scan_tree(&root, &ignore))
            .await
            .map_err(|e| WardenError::WatchFailure(self.name.clone(), e.to_string()))?
            .map_err(|e| {
                WardenError::WatchFailure(
                    self.name.clone(),
                    format!("{}: {}", self.root.display(), e),
                )
            })
    }
}

fn scan_tree(root: &Path, ignore: &IgnoreRules) -> std::io::Result<Snapshot> {
    let metadata = std::fs::metadata(root)?;
    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a directory",
        ));
    }

    let mut snapshot = Snapshot::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // The root itself must be readable; subdirectories may vanish mid-scan
            Err(e) if dir == root => return Err(e),
            Err(_) => continue,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if ignore.is_ignored(relative) {
                continue;
            }

            // symlink_metadata keeps link cycles out of the walk
            let Ok(metadata) = std::fs::symlink_metadata(&path) else {
                continue;
            };

            let is_dir = metadata.is_dir();
            snapshot.insert(
                path.clone(),
                FileStamp {
                    modified: metadata.modified().ok(),
                    len: if is_dir { 0 } else { metadata.len() },
                    is_dir,
                },
            );

            if is_dir {
                pending.push(path);
            }
        }
    }

    Ok(snapshot)
}

fn first_difference(old: &Snapshot, new: &Snapshot) -> Option<PathBuf> {
    new.iter()
        .find(|(path, stamp)| old.get(*path) != Some(*stamp))
        .map(|(path, _)| path.clone())
        .or_else(|| old.keys().find(|path| !new.contains_key(*path)).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(50);
    const DEBOUNCE: Duration = Duration::from_millis(150);

    async fn watcher(dir: &TempDir, ignore: &[&str]) -> Watcher {
        let ignore: Vec<String> = ignore.iter().map(|s| s.to_string()).collect();
        Watcher::new("web", dir.path(), &ignore, POLL, DEBOUNCE)
            .await
            .unwrap()
    }

    async fn next(watcher: &mut Watcher) -> Option<ChangeEvent> {
        tokio::time::timeout(Duration::from_secs(2), watcher.next_change())
            .await
            .ok()
            .map(|r| r.unwrap())
    }

    #[test]
    fn test_ignore_rules() {
        let rules = IgnoreRules::new(&["logs".to_string(), "./data/cache/".to_string()]);

        assert!(rules.is_ignored(Path::new(".git")));
        assert!(rules.is_ignored(Path::new("src/.hidden.swp")));
        assert!(rules.is_ignored(Path::new("node_modules")));
        assert!(rules.is_ignored(Path::new("app/__pycache__")));
        assert!(rules.is_ignored(Path::new("logs")));
        assert!(rules.is_ignored(Path::new("nested/logs")));
        assert!(rules.is_ignored(Path::new("data/cache")));
        assert!(rules.is_ignored(Path::new("data/cache/blob")));

        assert!(!rules.is_ignored(Path::new("src/main.py")));
        assert!(!rules.is_ignored(Path::new("data/other")));
        assert!(!rules.is_ignored(Path::new("logs.py")));
    }

    #[test]
    fn test_first_difference() {
        let stamp = FileStamp {
            modified: None,
            len: 1,
            is_dir: false,
        };
        let old = Snapshot::from([(PathBuf::from("a"), stamp)]);

        assert_eq!(first_difference(&old, &old.clone()), None);
        assert_eq!(
            first_difference(&old, &Snapshot::new()),
            Some(PathBuf::from("a"))
        );

        let grown = Snapshot::from([(PathBuf::from("a"), FileStamp { len: 2, ..stamp })]);
        assert_eq!(first_difference(&old, &grown), Some(PathBuf::from("a")));
    }

    #[tokio::test]
    async fn test_detects_create_modify_delete() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.js");
        fs::write(&file, "v1").unwrap();
        let mut watcher = watcher(&dir, &[]).await;

        fs::write(dir.path().join("new.js"), "x").unwrap();
        assert_eq!(next(&mut watcher).await.unwrap().changed_path, dir.path().join("new.js"));

        fs::write(&file, "version two").unwrap();
        let change = next(&mut watcher).await.unwrap();
        assert_eq!(change.spec_name, "web");
        assert_eq!(change.changed_path, file);

        fs::remove_file(&file).unwrap();
        assert_eq!(next(&mut watcher).await.unwrap().changed_path, file);
    }

    #[tokio::test]
    async fn test_detects_nested_changes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        let mut watcher = watcher(&dir, &[]).await;

        fs::write(dir.path().join("src/lib/util.py"), "pass").unwrap();
        assert!(next(&mut watcher).await.is_some());
    }

    #[tokio::test]
    async fn test_ignored_entries_produce_no_events() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        let mut watcher = watcher(&dir, &["logs"]).await;

        fs::write(dir.path().join(".env.swp"), "x").unwrap();
        fs::write(dir.path().join("node_modules/dep.js"), "x").unwrap();
        fs::write(dir.path().join("logs/out.log"), "x").unwrap();

        assert!(next(&mut watcher).await.is_none());
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher(&dir, &[]).await;

        let root = dir.path().to_path_buf();
        let writer = tokio::spawn(async move {
            for i in 0..5 {
                fs::write(root.join(format!("f{}.txt", i)), "x").unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        assert!(next(&mut watcher).await.is_some());
        writer.await.unwrap();
        assert!(next(&mut watcher).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_root_is_watch_failure() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let result = Watcher::new("web", &missing, &[], POLL, DEBOUNCE).await;
        assert!(matches!(result, Err(WardenError::WatchFailure(name, _)) if name == "web"));
    }

    #[tokio::test]
    async fn test_run_ends_when_root_removed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("app");
        fs::create_dir(&root).unwrap();
        let watcher = Watcher::new("web", &root, &[], POLL, DEBOUNCE)
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(watcher.run(tx));
        fs::remove_dir_all(&root).unwrap();

        assert!(tokio::time::timeout(Duration::from_secs(2), task).await.is_ok());
    }
}
