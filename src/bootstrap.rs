//! PKI Root Bootstrap
//!
//! Creates the directory layout and seed files of a new PKI root:
//! `private/`, `issued/`, `serial` and `crlnumber` (both `01`), an empty
//! `index.txt` and an `index.txt.attr` marker.
//!
//! Bootstrap runs once per root. Every entry is created with create-new
//! semantics, so a second run fails with [`PkiError::AlreadyExists`] instead of
//! resetting the serial counter or wiping the ledger.

use crate::error::{PkiError, Result};
use crate::storage::{create_new_file, PkiRoot, PUBLIC_FILE_MODE};
use std::fs::{self, DirBuilder};
use std::path::{Path, PathBuf};
use tracing::info;

/// Initial value of the `serial` and `crlnumber` counters.
pub const INITIAL_COUNTER: &str = "01\n";
pub const INDEX_ATTR_CONTENTS: &str = "unique_subject = no\n";

const PRIVATE_DIR_MODE: u32 = 0o700;
const PUBLIC_DIR_MODE: u32 = 0o755;

/// Create the layout of a new PKI root at `root`.
///
/// The root directory itself is created if missing. Fails if any layout
/// entry already exists; entries created before the failure are left behind.
pub fn initialize(root: impl Into<PathBuf>) -> Result<PkiRoot> {
    let pki_root = PkiRoot::new(root);
    fs::create_dir_all(pki_root.path()).map_err(|e| PkiError::io(pki_root.path(), e))?;

    if let Some(existing) = pki_root
        .layout_entries()
        .into_iter()
        .find(|path| path.exists())
    {
        return Err(PkiError::AlreadyExists { path: existing });
    }

    create_dir(&pki_root.private_dir(), PRIVATE_DIR_MODE)?;
    create_dir(&pki_root.issued_dir(), PUBLIC_DIR_MODE)?;

    create_new_file(
        &pki_root.serial_path(),
        INITIAL_COUNTER.as_bytes(),
        PUBLIC_FILE_MODE,
    )?;
    create_new_file(
        &pki_root.crlnumber_path(),
        INITIAL_COUNTER.as_bytes(),
        PUBLIC_FILE_MODE,
    )?;
    create_new_file(&pki_root.index_path(), b"", PUBLIC_FILE_MODE)?;
    create_new_file(
        &pki_root.index_attr_path(),
        INDEX_ATTR_CONTENTS.as_bytes(),
        PUBLIC_FILE_MODE,
    )?;

    info!(root = %pki_root.path().display(), "initialized PKI root");
    Ok(pki_root)
}

fn create_dir(path: &Path, mode: u32) -> Result<()> {
    let mut builder = DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path).map_err(|e| PkiError::io(path, e))
}
