//! Local directory exported as the remote namespace.
//!
//! Remote path `/a/b` maps to `<root>/a/b`. Listings are sorted by name and
//! handed out in fixed-size batches. Symlinks are reported as plain entries,
//! never as directories, so a walk cannot loop.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use super::{join, DirEntry, DirStream, Mount, RemoteFs};

const BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct LocalMount {
    root: PathBuf,
}

impl LocalMount {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Mount for LocalMount {
    type Conn = LocalFs;

    /// Fails while the exported directory does not exist.
    fn mount(&self) -> io::Result<LocalFs> {
        let meta = fs::metadata(&self.root)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.root.display()),
            ));
        }
        Ok(LocalFs {
            root: self.root.clone(),
        })
    }
}

#[derive(Debug)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes export: {}", path),
            ));
        }
        Ok(self.root.join(rel))
    }
}

impl RemoteFs for LocalFs {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }

    fn open_dir(&mut self, path: &str) -> io::Result<Box<dyn DirStream + '_>> {
        let local = self.resolve(path)?;
        let mut entries = Vec::new();
        for item in fs::read_dir(&local)? {
            let item = item?;
            let meta = item.path().symlink_metadata()?;
            let name = item.file_name().to_string_lossy().into_owned();
            entries.push(DirEntry {
                path: join(path, &name),
                name,
                is_dir: meta.is_dir(),
                mode: mode_bits(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.reverse();
        Ok(Box::new(LocalDirStream { remaining: entries }))
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_bits(_meta: &fs::Metadata) -> u32 {
    0
}

/// Entries are stored in reverse so batches pop off the end.
struct LocalDirStream {
    remaining: Vec<DirEntry>,
}

impl DirStream for LocalDirStream {
    fn next_batch(&mut self) -> io::Result<Vec<DirEntry>> {
        let take = self.remaining.len().min(BATCH_SIZE);
        let split = self.remaining.len() - take;
        let mut batch = self.remaining.split_off(split);
        batch.reverse();
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export() -> (tempfile::TempDir, LocalFs) {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalMount::new(dir.path()).mount().unwrap();
        (dir, fs)
    }

    #[test]
    fn mount_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalMount::new(dir.path().join("absent")).mount().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn open_reads_file_contents() {
        let (dir, mut fs) = export();
        std::fs::write(dir.path().join("vimini"), b"payload").unwrap();
        let mut buf = Vec::new();
        fs.open("/vimini").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn parent_components_are_rejected() {
        let (_dir, mut fs) = export();
        let err = fs.open("/../etc/passwd").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn listing_is_sorted_batched_and_terminated() {
        let (dir, mut fs) = export();
        for i in 0..(BATCH_SIZE + 6) {
            std::fs::write(dir.path().join(format!("f{:03}", i)), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut stream = fs.open_dir("/").unwrap();
        let first = stream.next_batch().unwrap();
        let second = stream.next_batch().unwrap();
        let end = stream.next_batch().unwrap();

        assert_eq!(first.len(), BATCH_SIZE);
        assert_eq!(second.len(), 7);
        assert!(end.is_empty());
        assert_eq!(first[0].name, "f000");
        assert_eq!(first[0].path, "/f000");
        let sub = second.last().unwrap();
        assert_eq!(sub.name, "sub");
        assert!(sub.is_dir);
        assert!(!first[0].is_dir);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_dirs_are_not_directories() {
        let (dir, mut fs) = export();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        let entries = fs.open_dir("/").unwrap().next_batch().unwrap();
        let link = entries.iter().find(|e| e.name == "loop").unwrap();
        assert!(!link.is_dir);
        let real = entries.iter().find(|e| e.name == "real").unwrap();
        assert!(real.is_dir);
    }
}
