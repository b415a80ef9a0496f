//! CA Material Loading
//!
//! Reads the root CA key (`private/ca.key`) and certificate (`ca.crt`) back
//! from a PKI root. Nothing is cached: the CA signs rarely, and reading from
//! disk on every call keeps the files the single source of truth.
//!
//! Failures are reported in three tiers:
//! - [`PkiError::NotFound`] when a file is absent
//! - [`PkiError::Decode`] when the file holds no PEM block with the expected label
//! - [`PkiError::Parse`] when the PEM payload is not a valid key or certificate

use crate::error::{PkiError, Result};
use crate::storage::PkiRoot;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Load the CA certificate and private key of `root`.
pub fn load_ca(root: &PkiRoot) -> Result<(X509, PKey<Private>)> {
    let key_path = root.ca_key_path();
    let key_pem = read_pem(&key_path, RSA_PRIVATE_KEY_LABEL)?;
    let rsa = Rsa::private_key_from_pem(&key_pem).map_err(|source| PkiError::Parse {
        path: key_path.clone(),
        source,
    })?;
    let ca_key = PKey::from_rsa(rsa)?;

    let ca_certificate = load_certificate(root.ca_certificate_path())?;
    debug!(root = %root.path().display(), "loaded CA material");
    Ok((ca_certificate, ca_key))
}

/// Load a PEM encoded certificate from `path`.
pub fn load_certificate(path: impl AsRef<Path>) -> Result<X509> {
    let path = path.as_ref();
    let pem = read_pem(path, CERTIFICATE_LABEL)?;
    X509::from_pem(&pem).map_err(|source| PkiError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_pem(path: &Path, label: &'static str) -> Result<Vec<u8>> {
    let data = fs::read(path).map_err(|e| PkiError::io(path, e))?;
    if !has_pem_block(&data, label) {
        return Err(PkiError::Decode {
            path: path.to_path_buf(),
            label,
        });
    }
    Ok(data)
}

/// True if `data` contains a `BEGIN`/`END` pair for `label`, in that order.
fn has_pem_block(data: &[u8], label: &str) -> bool {
    let Ok(text) = std::str::from_utf8(data) else {
        return false;
    };
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    match text.find(&begin) {
        Some(start) => text[start + begin.len()..].contains(&end),
        None => false,
    }
}
