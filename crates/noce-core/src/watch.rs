//! Tree watcher: full walks of the remote tree, re-run after every change
//! notification.
//!
//! A walk is depth-first, driven by an explicit stack of partly consumed
//! listings rather than recursion. Each directory is read in batches until an
//! empty batch. Every entry that is not noise (dotfile or signature sidecar)
//! is sent on the event channel, and a directory's contents follow it
//! immediately, before the rest of its parent's listing.
//!
//! Change detection is a full re-walk: every live entry is emitted again on
//! each cycle, not just what changed.

use std::io::{self, Read};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::connection::ConnectionManager;
use crate::remote::{DirEntry, Mount, RemoteFs, RemoteLayout};
use crate::shutdown::Shutdown;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("cannot open dir {path}: {source}")]
    OpenDir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot read dir {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot wait for notifications on {path}: {source}")]
    Control {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The reactor side of the event channel is gone.
    #[error("event channel closed")]
    EventsClosed,
}

pub struct TreeWatcher {
    layout: RemoteLayout,
    events: mpsc::Sender<DirEntry>,
    poll_interval: Duration,
    shutdown: Shutdown,
}

impl TreeWatcher {
    pub fn new(
        layout: RemoteLayout,
        events: mpsc::Sender<DirEntry>,
        poll_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            layout,
            events,
            poll_interval,
            shutdown,
        }
    }

    /// Walk the whole tree once, emitting every non-noise entry.
    /// Blocks while the event channel is full. Returns the number emitted.
    pub fn walk<C: RemoteFs + ?Sized>(&self, conn: &mut C) -> Result<usize, WatchError> {
        let mut emitted = 0usize;
        let mut stack = vec![list(conn, &self.layout.root)?.into_iter()];
        while let Some(listing) = stack.last_mut() {
            let Some(entry) = listing.next() else {
                stack.pop();
                continue;
            };
            if self.layout.is_noise(&entry.name) {
                continue;
            }
            let descend = entry.is_dir.then(|| entry.path.clone());
            self.events
                .blocking_send(entry)
                .map_err(|_| WatchError::EventsClosed)?;
            emitted += 1;
            if let Some(dir) = descend {
                stack.push(list(conn, &dir)?.into_iter());
            }
        }
        tracing::debug!(emitted, "walk complete");
        Ok(emitted)
    }

    /// Open the control resource and read from it; returns when the service
    /// answers, which is meant to happen on a tree change.
    pub fn wait_for_change<C: RemoteFs + ?Sized>(&self, conn: &mut C) -> Result<(), WatchError> {
        let path = &self.layout.control;
        let err = |source| WatchError::Control {
            path: path.clone(),
            source,
        };
        let mut control = conn.open(path).map_err(err)?;
        let mut buf = [0u8; 512];
        control.read(&mut buf).map_err(err)?;
        Ok(())
    }

    /// Watcher loop: walk, wait for a change, pause for the poll interval,
    /// walk again. Any failure drops the connection; the next cycle starts
    /// from the root on a fresh one. Returns on shutdown or when the event
    /// channel closes.
    pub fn run<M: Mount>(&self, connections: &ConnectionManager<M>) {
        while let Some(mut conn) = connections.acquire() {
            match self.cycle(&mut conn) {
                Ok(()) => break,
                Err(WatchError::EventsClosed) => {
                    tracing::info!("event channel closed, watcher stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!("walk aborted: {}", e);
                    if !self.shutdown.sleep(self.poll_interval) {
                        break;
                    }
                }
            }
        }
        tracing::debug!("watcher stopped");
    }

    /// Runs until an error or shutdown (`Ok`).
    fn cycle<C: RemoteFs>(&self, conn: &mut C) -> Result<(), WatchError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }
            self.walk(conn)?;
            self.wait_for_change(conn)?;
            if !self.shutdown.sleep(self.poll_interval) {
                return Ok(());
            }
        }
    }
}

/// Read every batch of the directory at `dir`.
fn list<C: RemoteFs + ?Sized>(conn: &mut C, dir: &str) -> Result<Vec<DirEntry>, WatchError> {
    let mut stream = conn.open_dir(dir).map_err(|source| WatchError::OpenDir {
        path: dir.to_string(),
        source,
    })?;
    let mut entries = Vec::new();
    loop {
        let batch = stream.next_batch().map_err(|source| WatchError::ReadDir {
            path: dir.to_string(),
            source,
        })?;
        if batch.is_empty() {
            return Ok(entries);
        }
        entries.extend(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DirStream, LocalMount};
    use std::collections::HashSet;

    fn watcher(capacity: usize) -> (TreeWatcher, mpsc::Receiver<DirEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        let w = TreeWatcher::new(
            RemoteLayout::default(),
            tx,
            Duration::from_millis(10),
            Shutdown::new(),
        );
        (w, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<DirEntry>) -> Vec<DirEntry> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("vimini"), b"bin").unwrap();
        std::fs::write(root.join("vimini.sha256"), b"sig").unwrap();
        std::fs::write(root.join(".hidden"), b"").unwrap();
        std::fs::write(root.join(".control"), b"").unwrap();
        std::fs::create_dir_all(root.join("docs/deep")).unwrap();
        std::fs::write(root.join("docs/readme"), b"").unwrap();
        std::fs::write(root.join("docs/deep/notes"), b"").unwrap();
        std::fs::write(root.join("docs/deep/notes.sha256"), b"").unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join(".git/objects/blob"), b"").unwrap();
        dir
    }

    #[test]
    fn walk_emits_non_noise_entries_recursively() {
        let dir = tree();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, mut rx) = watcher(64);

        let n = w.walk(&mut conn).unwrap();
        let paths: Vec<String> = drain(&mut rx).into_iter().map(|e| e.path).collect();
        assert_eq!(n, paths.len());
        assert_eq!(
            paths,
            vec!["/docs", "/docs/deep", "/docs/deep/notes", "/docs/readme", "/vimini"]
        );
    }

    #[test]
    fn subdirectory_contents_follow_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/sub")).unwrap();
        std::fs::write(dir.path().join("a/sub/x"), b"").unwrap();
        std::fs::write(dir.path().join("a/y"), b"").unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, mut rx) = watcher(64);

        w.walk(&mut conn).unwrap();
        let paths: Vec<String> = drain(&mut rx).into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/a", "/a/sub", "/a/sub/x", "/a/y", "/b"]);
    }

    #[test]
    fn directories_are_flagged() {
        let dir = tree();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, mut rx) = watcher(64);
        w.walk(&mut conn).unwrap();
        for e in drain(&mut rx) {
            assert_eq!(e.is_dir, e.name == "docs" || e.name == "deep", "{}", e.path);
        }
    }

    #[test]
    fn repeated_walks_over_unchanged_tree_are_identical() {
        let dir = tree();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, mut rx) = watcher(64);

        w.walk(&mut conn).unwrap();
        let first: HashSet<DirEntry> = drain(&mut rx).into_iter().collect();
        w.walk(&mut conn).unwrap();
        let second: HashSet<DirEntry> = drain(&mut rx).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn closed_event_channel_ends_walk() {
        let dir = tree();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, rx) = watcher(64);
        drop(rx);
        assert!(matches!(w.walk(&mut conn), Err(WatchError::EventsClosed)));
    }

    struct BrokenDir;

    impl DirStream for BrokenDir {
        fn next_batch(&mut self) -> io::Result<Vec<DirEntry>> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "hung up"))
        }
    }

    struct Hangup;

    impl RemoteFs for Hangup {
        fn open(&mut self, _path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "hung up"))
        }
        fn open_dir(&mut self, _path: &str) -> io::Result<Box<dyn DirStream + '_>> {
            Ok(Box::new(BrokenDir))
        }
    }

    #[test]
    fn read_failure_aborts_walk() {
        let (w, _rx) = watcher(4);
        let err = w.walk(&mut Hangup).unwrap_err();
        assert!(matches!(err, WatchError::ReadDir { ref path, .. } if path == "/"));
    }

    #[test]
    fn missing_control_resource_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = LocalMount::new(dir.path()).mount().unwrap();
        let (w, _rx) = watcher(4);
        assert!(matches!(
            w.wait_for_change(&mut conn),
            Err(WatchError::Control { .. })
        ));
        std::fs::write(dir.path().join(".control"), b"changed").unwrap();
        w.wait_for_change(&mut conn).unwrap();
    }

    #[test]
    fn failed_cycle_waits_before_walking_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vimini"), b"bin").unwrap();
        let (tx, mut rx) = mpsc::channel(1024);
        let shutdown = Shutdown::new();
        let w = TreeWatcher::new(
            RemoteLayout::default(),
            tx,
            Duration::from_secs(1),
            shutdown.clone(),
        );
        let conns = ConnectionManager::new(
            std::sync::Arc::new(LocalMount::new(dir.path())),
            Duration::from_millis(500),
            shutdown.clone(),
        );

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            shutdown.trigger();
        });
        w.run(&conns);
        stopper.join().unwrap();

        assert_eq!(drain(&mut rx).len(), 1);
    }
}
