//! PKI Root Storage Module
//!
//! A PKI root is a plain directory holding all state for one certificate
//! authority. The layout is compatible with OpenSSL-style `ca` tooling:
//!
//! ```text
//! <root>/ca.crt
//! <root>/crlnumber
//! <root>/index.txt
//! <root>/index.txt.attr
//! <root>/serial
//! <root>/issued/<name>.crt
//! <root>/private/ca.key
//! <root>/private/<name>.key
//! ```
//!
//! [`PkiRoot`] only resolves paths and checks the layout; it never creates
//! missing entries. Creating the layout is the job of [`crate::bootstrap`].

use crate::error::{PkiError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Reserved name of the root CA material.
pub const CA_NAME: &str = "ca";

pub const CA_CERTIFICATE_FILE: &str = "ca.crt";
pub const PRIVATE_DIR: &str = "private";
pub const ISSUED_DIR: &str = "issued";
pub const SERIAL_FILE: &str = "serial";
pub const CRLNUMBER_FILE: &str = "crlnumber";
pub const INDEX_FILE: &str = "index.txt";
pub const INDEX_ATTR_FILE: &str = "index.txt.attr";

pub(crate) const KEY_FILE_MODE: u32 = 0o600;
pub(crate) const PUBLIC_FILE_MODE: u32 = 0o644;

/// Handle on a PKI root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiRoot {
    root: PathBuf,
}

impl PkiRoot {
    /// Wrap a path without checking its layout.
    ///
    /// Use [`PkiRoot::open`] for anything other than bootstrapping.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open an already bootstrapped root.
    ///
    /// Fails with [`PkiError::NotInitialized`] naming the first missing entry.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let pki_root = Self::new(root);
        if let Some(path) = pki_root.missing_entry() {
            return Err(PkiError::NotInitialized { path });
        }
        Ok(pki_root)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn ca_certificate_path(&self) -> PathBuf {
        self.root.join(CA_CERTIFICATE_FILE)
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.private_key_path(CA_NAME)
    }

    pub fn private_dir(&self) -> PathBuf {
        self.root.join(PRIVATE_DIR)
    }

    pub fn issued_dir(&self) -> PathBuf {
        self.root.join(ISSUED_DIR)
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.private_dir().join(format!("{name}.key"))
    }

    pub fn issued_certificate_path(&self, name: &str) -> PathBuf {
        self.issued_dir().join(format!("{name}.crt"))
    }

    pub fn serial_path(&self) -> PathBuf {
        self.root.join(SERIAL_FILE)
    }

    pub fn crlnumber_path(&self) -> PathBuf {
        self.root.join(CRLNUMBER_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn index_attr_path(&self) -> PathBuf {
        self.root.join(INDEX_ATTR_FILE)
    }

    /// Entries created by bootstrap. `ca.crt` is not among them: CA material
    /// appears only once the CA certificate is issued.
    pub fn layout_entries(&self) -> [PathBuf; 6] {
        [
            self.private_dir(),
            self.issued_dir(),
            self.serial_path(),
            self.crlnumber_path(),
            self.index_path(),
            self.index_attr_path(),
        ]
    }

    /// First bootstrap entry missing from disk, if any.
    pub fn missing_entry(&self) -> Option<PathBuf> {
        self.layout_entries().into_iter().find(|path| !path.exists())
    }

    pub fn is_initialized(&self) -> bool {
        self.missing_entry().is_none()
    }

    pub fn has_ca(&self) -> bool {
        self.ca_certificate_path().exists() && self.ca_key_path().exists()
    }
}

/// Check that `name` can be used as a file stem inside `private/` and `issued/`.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative path component")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if name.chars().any(char::is_control) {
        Some("name contains control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(PkiError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Create `path` and write `contents`, failing with [`PkiError::AlreadyExists`]
/// if the file is already there.
///
/// On a write failure the partially written file is left in place.
pub(crate) fn create_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path).map_err(|e| PkiError::io(path, e))?;
    // write_all reports a zero-byte write as ErrorKind::WriteZero
    file.write_all(contents)
        .map_err(|e| PkiError::io(path, e))?;
    Ok(())
}

/// Replace `path` with `contents` through a temporary file in the same
/// directory, so readers see either the old or the new file.
pub(crate) fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PkiError::io(dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| PkiError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PkiError::io(tmp.path(), e))?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(PUBLIC_FILE_MODE))
            .map_err(|e| PkiError::io(tmp.path(), e))?;
    }
    tmp.persist(path).map_err(|e| PkiError::io(path, e.error))?;
    Ok(())
}
