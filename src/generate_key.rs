//! RSA Key Generation Module
//!
//! Generates RSA-2048 key pairs and persists the private half as a PKCS#1
//! `RSA PRIVATE KEY` PEM file. The public key is always derived from the
//! private key and never stored on its own.
//!
//! # Example
//! ```rust,no_run
//! use pki_ledger::generate_key::generate_key;
//! # fn example() -> pki_ledger::Result<()> {
//! let key = generate_key("pki/private/server.key")?;
//! assert_eq!(key.bits(), 2048);
//! # Ok(())
//! # }
//! ```

use crate::error::{PkiError, Result};
use crate::storage::{create_new_file, KEY_FILE_MODE};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use std::path::Path;
use tracing::info;

pub const RSA_KEY_SIZE: u32 = 2048;

/// Generate an RSA key pair and write its private key to `path`.
///
/// Fails with [`PkiError::AlreadyExists`] if `path` is taken; existing key
/// material is never overwritten. If writing fails after the file was created,
/// the partial file stays on disk for the operator to inspect.
pub fn generate_key(path: impl AsRef<Path>) -> Result<PKey<Private>> {
    let path = path.as_ref();
    if path.exists() {
        return Err(PkiError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }

    let rsa = Rsa::generate(RSA_KEY_SIZE)?;
    // PKCS#1 "RSA PRIVATE KEY" framing, not PKCS#8
    let pem = rsa.private_key_to_pem()?;
    create_new_file(path, &pem, KEY_FILE_MODE)?;

    let private_key = PKey::from_rsa(rsa)?;
    info!(path = %path.display(), bits = RSA_KEY_SIZE, "generated RSA private key");
    Ok(private_key)
}
