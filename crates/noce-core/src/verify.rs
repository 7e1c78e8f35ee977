//! Detached-signature verification against a fixed trust anchor.
//!
//! The anchor is an X.509 certificate (DER or PEM) carrying an RSA public key.
//! Signatures are PKCS#1 v1.5 over the SHA-256 digest of the artifact. The
//! certificate is loaded once at startup; a missing or unparsable anchor is a
//! configuration error and the process must not start without it.

use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

/// The trust anchor could not be loaded. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum TrustAnchorError {
    #[error("load certificate {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse certificate: {0}")]
    Parse(String),
    #[error("certificate key is not RSA: {0}")]
    UnsupportedKey(String),
}

#[derive(Debug, Clone)]
pub struct Verifier {
    key: RsaPublicKey,
}

impl Verifier {
    /// Read and parse the trust anchor certificate at `path`.
    pub fn load(path: &Path) -> Result<Self, TrustAnchorError> {
        let data = std::fs::read(path).map_err(|source| TrustAnchorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let verifier = Self::from_certificate(&data)?;
        tracing::debug!(path = %path.display(), "trust anchor loaded");
        Ok(verifier)
    }

    /// Parse a certificate in DER or PEM form. PEM may carry a UTF-8 BOM and
    /// leading whitespace.
    pub fn from_certificate(data: &[u8]) -> Result<Self, TrustAnchorError> {
        let text = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        let text = &text[text.iter().take_while(|b| b.is_ascii_whitespace()).count()..];
        if text.starts_with(b"-----BEGIN") {
            let (_, pem) =
                parse_x509_pem(text).map_err(|e| TrustAnchorError::Parse(e.to_string()))?;
            Self::from_der(&pem.contents)
        } else {
            Self::from_der(data)
        }
    }

    fn from_der(der: &[u8]) -> Result<Self, TrustAnchorError> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| TrustAnchorError::Parse(e.to_string()))?;
        let spki = cert.public_key();
        let key = RsaPublicKey::from_public_key_der(spki.raw)
            .map_err(|e| TrustAnchorError::UnsupportedKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Trust a bare public key instead of a certificate.
    pub fn from_public_key(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// True iff `signature` is the anchor's PKCS#1 v1.5 signature over `digest`.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> bool {
        self.key
            .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
            .is_ok()
    }
}
