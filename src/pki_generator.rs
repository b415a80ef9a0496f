//! Certificate Issuance Module
//!
//! Builds, signs and persists certificates for a PKI root. Two profiles exist:
//!
//! ```text
//! CA   (self-signed, name "ca")  → <root>/ca.crt,           <root>/private/ca.key
//!   └── Leaf (signed by the CA)  → <root>/issued/<name>.crt, <root>/private/<name>.key
//! ```
//!
//! # Certificate Properties
//! - **Version**: X.509v3
//! - **Key**: RSA 2048-bit, generated per certificate
//! - **Signature Algorithm**: SHA-256 with RSA
//! - **Subject Key Identifier**: SHA-1 of the DER encoded public key
//! - **CA profile**: random 128-bit serial, keyCertSign + cRLSign, CA=true,
//!   issuer = subject, authority key identifier = subject key identifier
//! - **Leaf profile**: serial from the `serial` counter, digitalSignature +
//!   keyEncipherment, CA=false, signed by the CA loaded from disk, recorded in
//!   the ledger
//!
//! # Failure Semantics
//! Steps run in order and the first error is returned as is. Nothing is rolled
//! back: a failure after key generation leaves the private key on disk, and a
//! leaf failure after serial allocation leaves that serial consumed.
//!
//! # Example
//! ```rust,no_run
//! use pki_ledger::pki_generator::{issue_certificate, CertificateData};
//! use pki_ledger::storage::PkiRoot;
//! # fn example() -> pki_ledger::Result<()> {
//! let root = PkiRoot::open("pki")?;
//! issue_certificate(&root, "ca", &CertificateData::certificate_authority("Example Root CA", 3650))?;
//!
//! let leaf = CertificateData::leaf("server.example", 365)
//!     .with_dns_names(["server.example", "www.server.example"]);
//! let issued = issue_certificate(&root, "server", &leaf)?;
//! println!("issued serial {}", issued.serial);
//! # Ok(())
//! # }
//! ```

use crate::ca_store::load_ca;
use crate::error::{PkiError, Result};
use crate::generate_key::generate_key;
use crate::ledger::{self, LedgerRecord};
use crate::serial_counter::{next_serial, serial_to_hex};
use crate::storage::{create_new_file, validate_name, PkiRoot, CA_NAME, PUBLIC_FILE_MODE};
use chrono::{TimeDelta, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Extension, X509Name, X509};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const CA_SERIAL_BITS: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateDataType {
    CertificateAuthority,
    Leaf,
}

impl CertificateDataType {
    pub fn is_ca(self) -> bool {
        self == CertificateDataType::CertificateAuthority
    }

    pub fn key_usage(self) -> KeyUsageSet {
        match self {
            CertificateDataType::CertificateAuthority => KeyUsageSet::CERTIFICATE_AUTHORITY,
            CertificateDataType::Leaf => KeyUsageSet::LEAF,
        }
    }
}

/// Key usage bits emitted as a critical `keyUsage` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsageSet {
    pub digital_signature: bool,
    pub key_encipherment: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
}

impl KeyUsageSet {
    pub const CERTIFICATE_AUTHORITY: Self = Self {
        digital_signature: false,
        key_encipherment: false,
        key_cert_sign: true,
        crl_sign: true,
    };

    pub const LEAF: Self = Self {
        digital_signature: true,
        key_encipherment: true,
        key_cert_sign: false,
        crl_sign: false,
    };

    fn to_extension(self) -> Result<X509Extension> {
        let mut ku = KeyUsage::new();
        ku.critical();
        if self.digital_signature {
            ku.digital_signature();
        }
        if self.key_encipherment {
            ku.key_encipherment();
        }
        if self.key_cert_sign {
            ku.key_cert_sign();
        }
        if self.crl_sign {
            ku.crl_sign();
        }
        Ok(ku.build()?)
    }
}

/// What to put in a certificate. Serial, key identifiers, issuer and
/// signature are filled in by [`issue_certificate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    pub subject_common_name: String,
    /// Lifetime counted from the moment of issuance.
    pub validity_days: u32,
    pub cert_type: CertificateDataType,
    /// DNS subject alternative names. Only emitted for leaf certificates.
    pub dns_names: Vec<String>,
}

impl CertificateData {
    pub fn certificate_authority(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            subject_common_name: common_name.into(),
            validity_days,
            cert_type: CertificateDataType::CertificateAuthority,
            dns_names: Vec::new(),
        }
    }

    pub fn leaf(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            subject_common_name: common_name.into(),
            validity_days,
            cert_type: CertificateDataType::Leaf,
            dns_names: Vec::new(),
        }
    }

    pub fn with_dns_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_ca(&self) -> bool {
        self.cert_type.is_ca()
    }

    pub fn key_usage(&self) -> KeyUsageSet {
        self.cert_type.key_usage()
    }
}

/// Artifacts produced by a successful issuance.
#[derive(Debug)]
pub struct IssuedCertificate {
    pub certificate: X509,
    /// Serial in ledger notation (uppercase, even number of hex digits).
    pub serial: String,
    pub private_key_path: PathBuf,
    pub certificate_path: PathBuf,
    /// `None` for the CA, which is never recorded in the ledger.
    pub ledger_record: Option<LedgerRecord>,
}

/// Issue a certificate named `name` in `root`.
///
/// # Errors
/// - [`PkiError::NotInitialized`] if the root was never bootstrapped
/// - [`PkiError::InvalidName`] for unusable names, a CA not named `ca`, or a
///   leaf named `ca`
/// - [`PkiError::ExpiryOutOfRange`] for a leaf expiring after 2049, which the
///   ledger cannot record
/// - [`PkiError::AlreadyExists`] if a key or certificate for `name` exists
/// - [`PkiError::NotFound`] when issuing a leaf before the CA exists
/// - any error from key generation, serial allocation, CA loading or the ledger
pub fn issue_certificate(
    root: &PkiRoot,
    name: &str,
    cert_data: &CertificateData,
) -> Result<IssuedCertificate> {
    if let Some(path) = root.missing_entry() {
        return Err(PkiError::NotInitialized { path });
    }
    validate_request(name, cert_data)?;

    let private_key_path = root.private_key_path(name);
    let certificate_path = if cert_data.is_ca() {
        root.ca_certificate_path()
    } else {
        root.issued_certificate_path(name)
    };
    for path in [&private_key_path, &certificate_path] {
        if path.exists() {
            return Err(PkiError::AlreadyExists { path: path.clone() });
        }
    }

    let private_key = generate_key(&private_key_path)?;
    let issued = sign_and_store(root, name, cert_data, &private_key, &certificate_path);
    if let Err(e) = &issued {
        warn!(
            name,
            key = %private_key_path.display(),
            error = %e,
            "issuance failed after the private key was written; key left on disk"
        );
    }
    let (certificate, serial, ledger_record) = issued?;

    info!(
        name,
        serial = %serial,
        ca = cert_data.is_ca(),
        certificate = %certificate_path.display(),
        "issued certificate"
    );
    Ok(IssuedCertificate {
        certificate,
        serial,
        private_key_path,
        certificate_path,
        ledger_record,
    })
}

fn validate_request(name: &str, cert_data: &CertificateData) -> Result<()> {
    validate_name(name)?;
    let reason = match (cert_data.is_ca(), name == CA_NAME) {
        (true, false) => Some("CA material must use the reserved name \"ca\""),
        (false, true) => Some("the name \"ca\" is reserved for CA material"),
        _ => None,
    };
    if let Some(reason) = reason {
        return Err(PkiError::InvalidName {
            name: name.to_string(),
            reason,
        });
    }
    let common_name = &cert_data.subject_common_name;
    if common_name.is_empty() || common_name.chars().any(char::is_control) {
        return Err(PkiError::InvalidName {
            name: common_name.clone(),
            reason: "common name must be non-empty and free of control characters",
        });
    }
    if !cert_data.is_ca() {
        check_ledger_expiry(cert_data.validity_days)?;
    }
    Ok(())
}

/// Leaf expiries go into the ledger, which only holds two-digit years.
fn check_ledger_expiry(validity_days: u32) -> Result<()> {
    let expires_at = TimeDelta::try_days(i64::from(validity_days))
        .and_then(|validity| Utc::now().checked_add_signed(validity));
    match expires_at {
        Some(time) if ledger::is_representable(time) => Ok(()),
        Some(time) => Err(PkiError::ExpiryOutOfRange {
            expires: time.to_rfc3339(),
        }),
        None => Err(PkiError::ExpiryOutOfRange {
            expires: format!("{validity_days} days from now"),
        }),
    }
}

fn sign_and_store(
    root: &PkiRoot,
    name: &str,
    cert_data: &CertificateData,
    private_key: &PKey<Private>,
    certificate_path: &Path,
) -> Result<(X509, String, Option<LedgerRecord>)> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let mut name_builder = X509Name::builder()?;
    name_builder.append_entry_by_nid(Nid::COMMONNAME, &cert_data.subject_common_name)?;
    let subject = name_builder.build();
    builder.set_subject_name(&subject)?;
    builder.set_pubkey(private_key)?;

    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(cert_data.validity_days)?;
    builder.set_not_after(&not_after)?;

    // SHA-1 over the PKCS#1 RSAPublicKey
    let subject_key_id =
        SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(subject_key_id)?;
    builder.append_extension(cert_data.key_usage().to_extension()?)?;

    let (serial, signer) = match cert_data.cert_type {
        CertificateDataType::CertificateAuthority => {
            // uniform in [0, 2^128)
            let mut serial = BigNum::new()?;
            serial.rand(CA_SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;

            builder.set_issuer_name(&subject)?;
            builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
            // no issuer given: the context resolves keyid against the certificate itself
            let authority_key_id = AuthorityKeyIdentifier::new()
                .keyid(true)
                .build(&builder.x509v3_context(None, None))?;
            builder.append_extension(authority_key_id)?;
            (serial, None)
        }
        CertificateDataType::Leaf => {
            let serial = next_serial(root)?;
            let (ca_certificate, ca_key) = load_ca(root)?;

            builder.set_issuer_name(ca_certificate.subject_name())?;
            builder.append_extension(BasicConstraints::new().critical().build()?)?;
            if ca_certificate.subject_key_id().is_some() {
                let authority_key_id = AuthorityKeyIdentifier::new()
                    .keyid(true)
                    .build(&builder.x509v3_context(Some(&*ca_certificate), None))?;
                builder.append_extension(authority_key_id)?;
            }
            if !cert_data.dns_names.is_empty() {
                let mut san = SubjectAlternativeName::new();
                for dns_name in &cert_data.dns_names {
                    san.dns(dns_name);
                }
                let extension = san.build(&builder.x509v3_context(Some(&*ca_certificate), None))?;
                builder.append_extension(extension)?;
            }
            (serial, Some(ca_key))
        }
    };
    let serial_number = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial_number)?;

    let signing_key = signer.as_ref().unwrap_or(private_key);
    builder.sign(signing_key, MessageDigest::sha256())?;
    let certificate = builder.build();

    create_new_file(certificate_path, &certificate.to_pem()?, PUBLIC_FILE_MODE)?;

    let ledger_record = if cert_data.is_ca() {
        None
    } else {
        Some(ledger::append(root, &format!("{name}.crt"), &certificate)?)
    };
    Ok((certificate, serial_to_hex(&serial)?, ledger_record))
}
