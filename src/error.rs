//! Error types for PKI root operations.
//!
//! Every operation in this crate returns [`Result`], and every failure is a hard
//! stop: nothing is retried and nothing already written to disk is rolled back.

use openssl::error::ErrorStack;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkiError {
    /// A key, certificate or layout entry is already present and would be overwritten.
    #[error("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("{} not found", path.display())]
    NotFound { path: PathBuf },

    /// The PKI root is missing one of its layout entries.
    #[error("PKI root is not initialized: {} is missing", path.display())]
    NotInitialized { path: PathBuf },

    /// The file exists but holds no PEM block with the expected label.
    #[error("no PEM encoded {label} found in {}", path.display())]
    Decode { path: PathBuf, label: &'static str },

    /// The PEM block was found but its contents do not parse.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ErrorStack,
    },

    /// A counter file or ledger line does not have the expected format.
    #[error("corrupt state in {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    /// The expiry cannot be written as a two-digit-year ledger timestamp.
    #[error("expiry {expires} is outside the ledger timestamp window (1950 to 2049)")]
    ExpiryOutOfRange { expires: String },

    #[error("certificate with serial {serial} is already revoked")]
    AlreadyRevoked { serial: String },

    #[error("no ledger record with serial {serial}")]
    SerialNotFound { serial: String },

    #[error("invalid certificate name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] ErrorStack),
}

impl PkiError {
    /// Map an I/O error on `path`, folding the `NotFound` and `AlreadyExists`
    /// kinds into their dedicated variants.
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => PkiError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::AlreadyExists => PkiError::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => PkiError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Like [`PkiError::io`], but a missing file means the root was never
    /// bootstrapped.
    pub(crate) fn layout_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => PkiError::NotInitialized {
                path: path.to_path_buf(),
            },
            _ => PkiError::io(path, source),
        }
    }

    pub(crate) fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        PkiError::CorruptState {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PkiError::NotFound { .. }
                | PkiError::NotInitialized { .. }
                | PkiError::SerialNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PkiError>;
