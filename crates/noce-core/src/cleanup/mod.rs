//! Temp-file lifecycle coordinator.
//!
//! A single task owns the set of registered temp files. Producers talk to it
//! only through a bounded queue ([`CleanupHandle`]): `register` when a temp
//! file is created, then exactly one of `commit` (renamed into place, forget
//! it) or `delete_now` (unlink it). On termination the coordinator triggers
//! shutdown, applies whatever is already queued, unlinks every file still
//! registered, closes the queue and reports the exit status.

mod signals;

pub use signals::TerminationSignals;

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::shutdown::Shutdown;

/// Messages accepted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupMsg {
    Register(PathBuf),
    /// The file was renamed away; drop it from the registry without unlinking.
    Commit(PathBuf),
    /// Drop from the registry and unlink now.
    DeleteNow(PathBuf),
}

/// Why the process is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A Unix signal, by number.
    Signal(i32),
    /// Anything without a signal number.
    Other,
}

impl Termination {
    /// The signal number when there is one, else the generic failure status 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Signal(n) => *n,
            Termination::Other => 1,
        }
    }
}

/// The coordinator has swept and closed its queue.
#[derive(Debug, thiserror::Error)]
#[error("cleanup coordinator closed")]
pub struct CoordinatorClosed;

/// Producer side of the coordinator queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    tx: mpsc::Sender<CleanupMsg>,
}

impl CleanupHandle {
    pub async fn register(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send(CleanupMsg::Register(path.into())).await
    }

    pub async fn commit(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send(CleanupMsg::Commit(path.into())).await
    }

    pub async fn delete_now(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send(CleanupMsg::DeleteNow(path.into())).await
    }

    async fn send(&self, msg: CleanupMsg) -> Result<(), CoordinatorClosed> {
        self.tx.send(msg).await.map_err(|_| CoordinatorClosed)
    }

    /// Blocks while the queue is full. Must not be called from an async context.
    pub fn register_blocking(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send_blocking(CleanupMsg::Register(path.into()))
    }

    pub fn commit_blocking(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send_blocking(CleanupMsg::Commit(path.into()))
    }

    pub fn delete_now_blocking(&self, path: impl Into<PathBuf>) -> Result<(), CoordinatorClosed> {
        self.send_blocking(CleanupMsg::DeleteNow(path.into()))
    }

    fn send_blocking(&self, msg: CleanupMsg) -> Result<(), CoordinatorClosed> {
        self.tx.blocking_send(msg).map_err(|_| CoordinatorClosed)
    }
}

/// Consumer side: owns the registry. Run it with [`CleanupCoordinator::run`].
#[derive(Debug)]
pub struct CleanupCoordinator {
    rx: mpsc::Receiver<CleanupMsg>,
    registry: HashSet<PathBuf>,
    shutdown: Shutdown,
}

/// Create a coordinator and its handle with a queue of `capacity` messages.
pub fn channel(capacity: usize, shutdown: Shutdown) -> (CleanupHandle, CleanupCoordinator) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        CleanupHandle { tx },
        CleanupCoordinator {
            rx,
            registry: HashSet::new(),
            shutdown,
        },
    )
}

impl CleanupCoordinator {
    /// Process messages until `termination` resolves, then sweep and return
    /// the exit status derived from it.
    pub async fn run<F>(mut self, termination: F) -> i32
    where
        F: Future<Output = Termination>,
    {
        tokio::pin!(termination);
        let mut senders_gone = false;
        let reason = loop {
            if senders_gone {
                break (&mut termination).await;
            }
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.apply(msg),
                    None => senders_gone = true,
                },
                reason = &mut termination => break reason,
            }
        };
        tracing::info!(?reason, "got termination");
        self.shutdown.trigger();
        // Closed before draining: anything accepted is applied, later sends fail.
        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
        }
        self.sweep();
        reason.exit_code()
    }

    fn apply(&mut self, msg: CleanupMsg) {
        match msg {
            CleanupMsg::Register(path) => {
                tracing::debug!(path = %path.display(), "registered temporary");
                self.registry.insert(path);
            }
            CleanupMsg::Commit(path) => {
                tracing::debug!(path = %path.display(), "temporary committed");
                self.registry.remove(&path);
            }
            CleanupMsg::DeleteNow(path) => {
                tracing::debug!(path = %path.display(), "deleting now");
                self.registry.remove(&path);
                remove_quietly(&path);
            }
        }
    }

    fn sweep(&mut self) {
        for path in self.registry.drain() {
            tracing::info!(path = %path.display(), "deleting temporary");
            remove_quietly(&path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "cannot delete temporary: {}", e),
    }
}
