//! Consumer of tree events.

use tokio::sync::mpsc;

use crate::remote::DirEntry;

/// Pluggable sink for entries emitted by the tree watcher.
pub trait Reactor: Send {
    fn react(&mut self, entry: &DirEntry);
}

/// Logs every entry it sees.
#[derive(Debug, Default)]
pub struct LogReactor;

impl Reactor for LogReactor {
    fn react(&mut self, entry: &DirEntry) {
        tracing::info!(path = %entry.path, mode = entry.mode, "got: '{}' {}", entry.name, entry.is_dir);
    }
}

/// Feed events to `reactor` until every sender is dropped. Returns the count handled.
pub async fn run_reactor<R: Reactor>(mut events: mpsc::Receiver<DirEntry>, mut reactor: R) -> u64 {
    let mut handled = 0u64;
    while let Some(entry) = events.recv().await {
        reactor.react(&entry);
        handled += 1;
    }
    handled
}
