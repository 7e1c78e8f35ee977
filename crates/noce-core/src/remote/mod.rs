//! Boundary to the remote file service.
//!
//! The protocol client itself lives behind these traits. A [`Mount`] produces
//! live connections ([`RemoteFs`]); each connection is owned by the loop that
//! mounted it and dropped on the first I/O error.

mod local;
#[cfg(feature = "ninep")]
mod ninep_fs;

pub use local::{LocalFs, LocalMount};
#[cfg(feature = "ninep")]
pub use ninep_fs::{NinepFs, NinepMount};

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::PathBuf;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// Full remote path (parent joined with `name`).
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// Raw mode bits as reported by the service.
    pub mode: u32,
}

/// A live session with the remote file service.
pub trait RemoteFs: Send {
    /// Open a file read-only and return its byte stream.
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send + '_>>;

    /// Open a directory for batched listing.
    fn open_dir(&mut self, path: &str) -> io::Result<Box<dyn DirStream + '_>>;
}

/// Batched directory reader. An empty batch marks the end of the directory.
pub trait DirStream {
    fn next_batch(&mut self) -> io::Result<Vec<DirEntry>>;
}

/// Establishes sessions with the remote service.
pub trait Mount: Send + Sync + 'static {
    type Conn: RemoteFs + 'static;

    fn mount(&self) -> io::Result<Self::Conn>;
}

/// Fixed remote paths consumed by the downloader and the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLayout {
    pub artifact: String,
    /// Detached signature for `artifact`.
    pub signature: String,
    /// Resource whose read blocks until the tree changes.
    pub control: String,
    pub root: String,
    /// Listings skip names ending in this suffix.
    pub sidecar_suffix: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            artifact: "/vimini".to_string(),
            signature: "/vimini.sha256".to_string(),
            control: "/.control".to_string(),
            root: "/".to_string(),
            sidecar_suffix: ".sha256".to_string(),
        }
    }
}

impl RemoteLayout {
    /// True for entries the watcher never emits: dotfiles and sidecar files.
    pub fn is_noise(&self, name: &str) -> bool {
        name.starts_with('.') || name.ends_with(&self.sidecar_suffix)
    }
}

/// Join a remote directory path and an entry name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Where to mount from, parsed from the `address` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// 9P over TCP, `host:port`.
    Tcp(String),
    /// Local directory exported as the remote namespace (`dir:<path>`).
    Dir(PathBuf),
}

impl Address {
    pub fn parse(s: &str) -> Address {
        match s.strip_prefix("dir:") {
            Some(path) => Address::Dir(PathBuf::from(path)),
            None => Address::Tcp(s.trim_start_matches("tcp:").to_string()),
        }
    }
}
