//! pki-ledger - File-backed Certificate Authority State
//!
//! The persistent-state engine of a minimal certificate authority. It issues
//! RSA key pairs and X.509 certificates, hands out strictly increasing leaf
//! serials, keeps an OpenSSL-compatible `index.txt` ledger of every issued leaf
//! certificate, and revokes certificates by updating that ledger.
//!
//! # Overview
//!
//! All state for one CA lives in a PKI root directory:
//!
//! ```text
//! <root>/ca.crt                 self-signed CA certificate
//! <root>/private/ca.key         CA private key (PKCS#1 PEM)
//! <root>/private/<name>.key     leaf private keys
//! <root>/issued/<name>.crt      leaf certificates
//! <root>/serial                 next leaf serial, hex
//! <root>/crlnumber              reserved counter
//! <root>/index.txt              ledger of issued leaf certificates
//! <root>/index.txt.attr         `unique_subject = no`
//! ```
//!
//! The hierarchy is two levels deep:
//!
//! ```text
//! Root CA (self-signed, random 128-bit serial, not in the ledger)
//!   └── Leaf certificate (signed by the CA, serial from `serial`, one ledger line)
//! ```
//!
//! # Module Overview
//!
//! - [`bootstrap`]: creates the layout of a new root
//! - [`storage`]: [`PkiRoot`] path resolution and layout checks
//! - [`generate_key`]: RSA-2048 key generation and persistence
//! - [`serial_counter`]: the leaf serial counter
//! - [`ca_store`]: loading CA material and certificates from disk
//! - [`pki_generator`]: certificate issuance for both profiles
//! - [`ledger`]: appending, reading and revoking ledger records
//! - [`configs`]: TOML configuration for the command-line front end
//!
//! # Example
//!
//! ```no_run
//! use pki_ledger::{initialize, issue_certificate, revoke, CertificateData, CA_NAME};
//! use pki_ledger::serial_counter::serial_from_hex;
//!
//! fn run() -> pki_ledger::Result<()> {
//!     let root = initialize("pki")?;
//!     issue_certificate(&root, CA_NAME, &CertificateData::certificate_authority("Example CA", 3650))?;
//!
//!     let issued = issue_certificate(&root, "server", &CertificateData::leaf("server.example", 365))?;
//!     assert_eq!(issued.serial, "01");
//!
//!     let serial = serial_from_hex(&issued.serial).expect("ledger serials are hex");
//!     let record = revoke(&root, &serial)?;
//!     assert!(record.is_revoked());
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! Every operation is a synchronous sequence of filesystem calls. There is no
//! locking: two processes issuing against the same root can allocate the same
//! serial or lose ledger lines. Callers must ensure a single writer per root.
//!
//! # Error Handling
//!
//! Library operations return [`Result`] with a [`PkiError`]. Failures are not
//! rolled back; see [`pki_generator`] for what a failed issuance leaves behind.

pub mod bootstrap;
pub mod ca_store;
pub mod configs;
pub mod error;
pub mod generate_key;
pub mod ledger;
pub mod pki_generator;
pub mod serial_counter;
pub mod storage;

pub use bootstrap::initialize;
pub use ca_store::{load_ca, load_certificate};
pub use error::{PkiError, Result};
pub use generate_key::generate_key;
pub use ledger::{append as append_ledger_record, read_records, revoke, LedgerRecord, RecordStatus};
pub use pki_generator::{
    issue_certificate, CertificateData, CertificateDataType, IssuedCertificate, KeyUsageSet,
};
pub use serial_counter::next_serial;
pub use storage::{PkiRoot, CA_NAME};
