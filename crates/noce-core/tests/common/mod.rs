//! Shared helpers: an exported tree on disk, fixture signing, and polling.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use noce_core::config::NoceConfig;
use noce_core::verify::Verifier;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};

pub const ANCHOR_PEM: &[u8] = include_bytes!("../fixtures/anchor.pem");
pub const SIGNER_KEY: &str = include_str!("../fixtures/signer.key");
pub const OTHER_KEY: &str = include_str!("../fixtures/other.key");

pub fn sign_with(key_pem: &str, data: &[u8]) -> Vec<u8> {
    let key = RsaPrivateKey::from_pkcs8_pem(key_pem).unwrap();
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
        .unwrap()
}

pub fn verifier() -> Verifier {
    Verifier::from_certificate(ANCHOR_PEM).unwrap()
}

/// Scratch layout: `export/` is served as the remote tree, `work/` holds
/// temp files and `work/software/vimini` is the destination.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("export")).unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        std::fs::write(dir.path().join("export/.control"), b"").unwrap();
        Sandbox { dir }
    }

    pub fn export(&self) -> PathBuf {
        self.dir.path().join("export")
    }

    pub fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn destination(&self) -> PathBuf {
        self.work().join("software/vimini")
    }

    pub fn publish(&self, artifact: &[u8], signature: &[u8]) {
        std::fs::write(self.export().join("vimini"), artifact).unwrap();
        std::fs::write(self.export().join("vimini.sha256"), signature).unwrap();
    }

    pub fn config(&self) -> NoceConfig {
        let mut cfg = NoceConfig::default();
        cfg.address = format!("dir:{}", self.export().display());
        cfg.destination = self.destination();
        cfg.temp_dir = self.work();
        cfg.timing.reconnect_delay_ms = 10;
        cfg.timing.poll_interval_ms = 20;
        cfg.timing.bad_signature_backoff_ms = 50;
        cfg
    }

    /// Temp files left in the work dir.
    pub fn temp_files(&self) -> Vec<PathBuf> {
        temp_files_in(&self.work(), ".download-")
    }
}

pub fn temp_files_in(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(prefix))
                .unwrap_or(false)
        })
        .collect()
}

/// Poll `cond` every 10ms for up to `timeout`.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
