//! Integrity-verified download and promote pipeline.
//!
//! One attempt: create a temp file next to the destination, register it with
//! the cleanup coordinator, stream the artifact into it while hashing, fetch
//! the detached signature, verify, then either rename over the destination
//! (commit) or unlink (delete now). At most one temp file is in flight.

use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::checksum::{ChecksumRecord, HashingWriter};
use crate::cleanup::CleanupHandle;
use crate::connection::ConnectionManager;
use crate::remote::{Mount, RemoteFs, RemoteLayout};
use crate::shutdown::Shutdown;
use crate::verify::Verifier;

/// rwxrw-rw-, applied after creation.
#[cfg(unix)]
const TEMP_MODE: u32 = 0o766;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("cannot create temp file: {0}")]
    TempFile(#[source] io::Error),
    #[error("cannot register temp file: cleanup coordinator closed")]
    CoordinatorClosed,
    #[error("cannot read remote file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("wrong checksum: {0}")]
    Verification(ChecksumRecord),
    #[error("cannot promote {from} to {to}: {source}")]
    Promote {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    /// Whether the loop must drop the connection and mount a fresh one.
    /// A signature mismatch or a failed rename is local to this side and
    /// keeps the connection.
    pub fn needs_reconnect(&self) -> bool {
        !matches!(
            self,
            DownloadError::Verification(_) | DownloadError::Promote { .. }
        )
    }
}

/// A verified artifact now sits at `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promoted {
    pub destination: PathBuf,
    pub bytes: u64,
    pub digest: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub layout: RemoteLayout,
    pub destination: PathBuf,
    pub temp_dir: PathBuf,
    pub temp_prefix: String,
    pub bad_signature_backoff: Duration,
}

pub struct Downloader {
    settings: DownloadSettings,
    verifier: Arc<Verifier>,
    cleanup: CleanupHandle,
    shutdown: Shutdown,
}

impl Downloader {
    pub fn new(
        settings: DownloadSettings,
        verifier: Arc<Verifier>,
        cleanup: CleanupHandle,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            settings,
            verifier,
            cleanup,
            shutdown,
        }
    }

    /// Run one download attempt over `conn`. Blocking; call from a worker thread.
    ///
    /// Every temp file this creates is resolved before returning: committed
    /// after a successful rename, deleted otherwise. After a failure that
    /// keeps the connection (signature mismatch, failed rename) this sleeps
    /// for the bad-signature backoff before returning.
    pub fn download_once<C: RemoteFs + ?Sized>(
        &self,
        conn: &mut C,
    ) -> Result<Promoted, DownloadError> {
        let temp = self.create_temp()?;
        if self.cleanup.register_blocking(&temp).is_err() {
            remove_local(&temp);
            return Err(DownloadError::CoordinatorClosed);
        }

        let result = self.fetch_and_promote(conn, &temp);
        let resolved = match &result {
            Ok(_) => self.cleanup.commit_blocking(&temp),
            Err(_) => self.cleanup.delete_now_blocking(&temp),
        };
        if resolved.is_err() && result.is_err() {
            // Coordinator already swept and closed; nobody else will unlink it.
            remove_local(&temp);
        }

        match &result {
            Err(DownloadError::Verification(record)) => tracing::warn!(
                digest = %record.digest_hex(),
                signature = %record.signature_hex(),
                "wrong checksum"
            ),
            Err(e @ DownloadError::Promote { .. }) => tracing::warn!("cannot download: {}", e),
            _ => {}
        }
        if matches!(&result, Err(e) if !e.needs_reconnect()) {
            self.shutdown.sleep(self.settings.bad_signature_backoff);
        }
        result
    }

    fn create_temp(&self) -> Result<PathBuf, DownloadError> {
        let named = tempfile::Builder::new()
            .prefix(&self.settings.temp_prefix)
            .tempfile_in(&self.settings.temp_dir)
            .map_err(DownloadError::TempFile)?;
        let (_file, path) = named
            .keep()
            .map_err(|e| DownloadError::TempFile(e.error))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(TEMP_MODE);
            if let Err(e) = std::fs::set_permissions(&path, perms) {
                remove_local(&path);
                return Err(DownloadError::TempFile(e));
            }
        }
        Ok(path)
    }

    fn fetch_and_promote<C: RemoteFs + ?Sized>(
        &self,
        conn: &mut C,
        temp: &Path,
    ) -> Result<Promoted, DownloadError> {
        let layout = &self.settings.layout;

        tracing::info!(remote = %layout.artifact, temp = %temp.display(), "downloading file");
        let (bytes, digest) = stream_into(conn, &layout.artifact, temp)?;

        let mut signature = Vec::new();
        conn.open(&layout.signature)
            .and_then(|mut r| r.read_to_end(&mut signature))
            .map_err(|source| DownloadError::Read {
                path: layout.signature.clone(),
                source,
            })?;

        if !self.verifier.verify(&digest, &signature) {
            return Err(DownloadError::Verification(ChecksumRecord { digest, signature }));
        }

        let destination = &self.settings.destination;
        promote(temp, destination)?;
        tracing::info!(
            destination = %destination.display(),
            bytes,
            digest = %hex::encode(digest),
            "file downloaded"
        );
        Ok(Promoted {
            destination: destination.clone(),
            bytes,
            digest,
        })
    }

    /// Downloader loop: acquire a connection, download repeatedly on it, and
    /// drop it for a fresh one after any failure other than a signature
    /// mismatch or a failed rename. Returns on shutdown.
    pub fn run<M: Mount>(&self, connections: &ConnectionManager<M>) {
        while let Some(mut conn) = connections.acquire() {
            loop {
                if self.shutdown.is_triggered() {
                    return;
                }
                match self.download_once(&mut conn) {
                    Ok(_) => {}
                    Err(DownloadError::CoordinatorClosed) => return,
                    Err(e) if e.needs_reconnect() => {
                        tracing::warn!("cannot download: {}", e);
                        break;
                    }
                    // Logged and throttled by download_once.
                    Err(_) => {}
                }
            }
        }
        tracing::debug!("downloader stopped");
    }
}

/// Copy `remote` into the file at `temp`, hashing as it is written.
fn stream_into<C: RemoteFs + ?Sized>(
    conn: &mut C,
    remote: &str,
    temp: &Path,
) -> Result<(u64, [u8; 32]), DownloadError> {
    let read_err = |source| DownloadError::Read {
        path: remote.to_string(),
        source,
    };
    let file = File::options()
        .write(true)
        .truncate(true)
        .open(temp)
        .map_err(DownloadError::TempFile)?;
    let mut sink = HashingWriter::new(BufWriter::new(file));
    let mut reader = conn.open(remote).map_err(read_err)?;
    io::copy(&mut reader, &mut sink).map_err(read_err)?;
    drop(reader);

    let bytes = sink.written();
    let (writer, digest) = sink.finish();
    let file = writer
        .into_inner()
        .map_err(|e| DownloadError::TempFile(e.into_error()))?;
    file.sync_all().map_err(DownloadError::TempFile)?;
    Ok((bytes, digest))
}

/// Atomically rename `temp` over `destination`, creating its parent if needed.
fn promote(temp: &Path, destination: &Path) -> Result<(), DownloadError> {
    let err = |source| DownloadError::Promote {
        from: temp.to_path_buf(),
        to: destination.to_path_buf(),
        source,
    };
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(err)?;
        }
    }
    std::fs::rename(temp, destination).map_err(err)
}

fn remove_local(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "cannot delete temporary: {}", e);
        }
    }
}
