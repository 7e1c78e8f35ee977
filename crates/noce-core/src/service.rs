//! Wires the components together and runs them until termination.
//!
//! Tasks and their channels:
//! - cleanup coordinator (tokio task) <- register/commit/delete from the downloader
//! - downloader loop (OS thread, own connection manager)
//! - tree watcher loop (OS thread, own connection manager) -> event channel
//! - reactor (tokio task) <- event channel
//!
//! Nothing is shared between them except the channels and the shutdown token.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cleanup::{self, Termination};
use crate::config::NoceConfig;
use crate::connection::ConnectionManager;
use crate::download::{DownloadSettings, Downloader};
use crate::reactor::{run_reactor, Reactor};
use crate::remote::Mount;
use crate::shutdown::Shutdown;
use crate::verify::Verifier;
use crate::watch::TreeWatcher;

/// Handles to the blocking loops, for callers that want to wait on them.
pub struct Workers {
    pub downloader: std::thread::JoinHandle<()>,
    pub watcher: std::thread::JoinHandle<()>,
}

impl Workers {
    /// Wait for both loops to return. They return promptly after shutdown
    /// unless blocked in remote I/O. Returns how many of them panicked.
    pub fn join(self) -> usize {
        self.reap(false)
    }

    /// Like [`Workers::join`], but only for loops that already returned.
    /// A loop still blocked in remote I/O is left running.
    pub fn join_finished(self) -> usize {
        self.reap(true)
    }

    fn reap(self, finished_only: bool) -> usize {
        let mut panicked = 0;
        for (name, handle) in [("downloader", self.downloader), ("watcher", self.watcher)] {
            if finished_only && !handle.is_finished() {
                tracing::debug!(worker = name, "still running at exit");
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(worker = name, "worker thread panicked");
                panicked += 1;
            }
        }
        panicked
    }
}

/// Start every component and wait for `termination`. Returns the process
/// exit status and the worker handles. Must be called within a multi-threaded
/// tokio runtime.
pub async fn run<M, R, F>(
    config: &NoceConfig,
    mount: M,
    verifier: Verifier,
    reactor: R,
    termination: F,
) -> io::Result<(i32, Workers)>
where
    M: Mount,
    R: Reactor + 'static,
    F: Future<Output = Termination>,
{
    let shutdown = Shutdown::new();
    let mount = Arc::new(mount);
    let (cleanup_handle, coordinator) = cleanup::channel(config.channels.cleanup, shutdown.clone());
    let (events_tx, events_rx) = mpsc::channel(config.channels.events.max(1));

    let downloader = Downloader::new(
        DownloadSettings {
            layout: config.remote.clone(),
            destination: config.destination.clone(),
            temp_dir: config.temp_dir.clone(),
            temp_prefix: config.temp_prefix.clone(),
            bad_signature_backoff: config.timing.bad_signature_backoff(),
        },
        Arc::new(verifier),
        cleanup_handle,
        shutdown.clone(),
    );
    let download_conns =
        ConnectionManager::new(Arc::clone(&mount), config.timing.reconnect_delay(), shutdown.clone());
    let downloader = std::thread::Builder::new()
        .name("downloader".into())
        .spawn(move || downloader.run(&download_conns))?;

    let watcher = TreeWatcher::new(
        config.remote.clone(),
        events_tx,
        config.timing.poll_interval(),
        shutdown.clone(),
    );
    let watch_conns =
        ConnectionManager::new(Arc::clone(&mount), config.timing.reconnect_delay(), shutdown.clone());
    let watcher = std::thread::Builder::new()
        .name("watcher".into())
        .spawn(move || watcher.run(&watch_conns))?;

    tokio::spawn(run_reactor(events_rx, reactor));

    tracing::info!(address = %config.address, "service started");
    let code = coordinator.run(termination).await;
    tracing::info!(code, "service stopping");
    Ok((code, Workers { downloader, watcher }))
}
