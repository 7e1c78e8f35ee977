//! SHA-256 computed inline with the download write path.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};

/// Writer that hashes every byte it forwards to `inner`.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes accepted by the inner writer so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Return the inner writer and the digest of everything written.
    pub fn finish(self) -> (W, [u8; 32]) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Digest of one download attempt paired with the signature received for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub digest: [u8; 32],
    pub signature: Vec<u8>,
}

impl ChecksumRecord {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }
}

impl fmt::Display for ChecksumRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.digest_hex(), self.signature_hex())
    }
}
