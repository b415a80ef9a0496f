//! Certificate Ledger Module
//!
//! `index.txt` records every issued leaf certificate in the tab-separated
//! format of OpenSSL's `ca` database, one record per line:
//!
//! ```text
//! V|R|E <TAB> expiry <TAB> [revocation] <TAB> serial <TAB> filename <TAB> subject
//! ```
//!
//! Timestamps are `yymmddHHMMSSZ` in UTC. Serials are uppercase hexadecimal,
//! zero-padded to an even number of digits. The subject is `/CN=<common name>`.
//!
//! The ledger only grows: issuance appends a `V` record, and revocation flips
//! one record to `R` and stamps its revocation time. Lines are never reordered
//! or removed. A revocation rewrites the whole file through a temporary file
//! and an atomic rename, so the ledger on disk is always either the old or the
//! new version.
//!
//! `E` (expired) records are understood but never written here.

use crate::error::{PkiError, Result};
use crate::serial_counter::{serial_from_hex, serial_to_hex};
use crate::storage::{replace_file, PkiRoot};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, BigNumRef};
use openssl::nid::Nid;
use openssl::x509::X509Ref;
use regex::Regex;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// status, expiry, optional revocation, serial, filename, subject
static RECORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(V|R|E)\t([0-9]{12})Z\t(?:([0-9]{12})Z)?\t([0-9a-fA-F]{2,})\t([^\t]+)\t(.+)$")
        .expect("ledger record pattern compiles")
});

const TIMESTAMP_FORMAT: &str = "%y%m%d%H%M%S";
const SUBJECT_PREFIX: &str = "/CN=";
const FIRST_LEDGER_YEAR: i32 = 1950;
const LAST_LEDGER_YEAR: i32 = 2049;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Valid,
    Revoked,
    Expired,
}

impl RecordStatus {
    pub fn as_char(self) -> char {
        match self {
            RecordStatus::Valid => 'V',
            RecordStatus::Revoked => 'R',
            RecordStatus::Expired => 'E',
        }
    }

    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "V" => Some(RecordStatus::Valid),
            "R" => Some(RecordStatus::Revoked),
            "E" => Some(RecordStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordStatus::Valid => "valid",
            RecordStatus::Revoked => "revoked",
            RecordStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// One line of `index.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub status: RecordStatus,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Serial as written in the ledger. Compare through [`LedgerRecord::serial_number`].
    pub serial: String,
    pub filename: String,
    pub subject: String,
}

impl LedgerRecord {
    /// Build the `V` record describing a freshly issued certificate.
    pub fn for_certificate(filename: &str, certificate: &X509Ref) -> Result<Self> {
        let serial = certificate.serial_number().to_bn()?;
        let serial = serial_to_hex(&serial)?;
        let common_name = match certificate
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
        {
            Some(entry) => String::from_utf8(entry.data().as_slice().to_vec()).map_err(|_| {
                PkiError::corrupt(Path::new(filename), "common name is not valid UTF-8")
            })?,
            None => String::new(),
        };

        let not_after = certificate.not_after();
        let expires_at = asn1_to_utc(not_after)
            .filter(|time| is_representable(*time))
            .ok_or_else(|| PkiError::ExpiryOutOfRange {
                expires: not_after.to_string(),
            })?;

        let record = LedgerRecord {
            status: RecordStatus::Valid,
            expires_at,
            revoked_at: None,
            serial,
            filename: filename.to_string(),
            subject: format!("{SUBJECT_PREFIX}{common_name}"),
        };
        if record.filename.is_empty()
            || record.filename.chars().any(char::is_control)
            || record.subject.chars().any(char::is_control)
        {
            return Err(PkiError::corrupt(
                Path::new(filename),
                "ledger fields may not be empty or contain control characters",
            ));
        }
        Ok(record)
    }

    /// Parse one ledger line. Returns `None` if the line does not follow the
    /// record grammar.
    pub fn parse(line: &str) -> Option<Self> {
        let captures = RECORD_PATTERN.captures(line)?;
        let revoked_at = match captures.get(3) {
            Some(stamp) => Some(parse_timestamp(stamp.as_str())?),
            None => None,
        };
        Some(LedgerRecord {
            status: RecordStatus::from_flag(&captures[1])?,
            expires_at: parse_timestamp(&captures[2])?,
            revoked_at,
            serial: captures[4].to_string(),
            filename: captures[5].to_string(),
            subject: captures[6].to_string(),
        })
    }

    /// The serial as an integer, so `0a`, `0A` and `000A` compare equal.
    pub fn serial_number(&self) -> Option<BigNum> {
        serial_from_hex(&self.serial)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.subject.strip_prefix(SUBJECT_PREFIX)
    }

    pub fn is_revoked(&self) -> bool {
        self.status == RecordStatus::Revoked
    }

    fn matches_serial(&self, serial: &BigNumRef) -> bool {
        self.serial_number()
            .map_or(false, |own| &*own == serial)
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revoked_at = self
            .revoked_at
            .map(format_timestamp)
            .unwrap_or_default();
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.status.as_char(),
            format_timestamp(self.expires_at),
            revoked_at,
            self.serial,
            self.filename,
            self.subject
        )
    }
}

/// Append the record for `certificate` to the ledger of `root`.
///
/// The ledger is opened in append mode and must already exist.
pub fn append(root: &PkiRoot, filename: &str, certificate: &X509Ref) -> Result<LedgerRecord> {
    let record = LedgerRecord::for_certificate(filename, certificate)?;
    let path = root.index_path();
    let mut file = OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(|e| PkiError::layout_io(&path, e))?;
    // write_all fails with WriteZero rather than silently writing nothing
    file.write_all(format!("{record}\n").as_bytes())
        .map_err(|e| PkiError::io(&path, e))?;

    info!(
        serial = %record.serial,
        filename = %record.filename,
        subject = %record.subject,
        "appended ledger record"
    );
    Ok(record)
}

/// Parse every record of the ledger, in file order.
pub fn read_records(root: &PkiRoot) -> Result<Vec<LedgerRecord>> {
    let path = root.index_path();
    let contents = fs::read_to_string(&path).map_err(|e| PkiError::layout_io(&path, e))?;
    contents
        .lines()
        .enumerate()
        .map(|(index, line)| parse_line(&path, index + 1, line))
        .collect()
}

/// Look up the first record whose serial equals `serial`.
pub fn find_record(root: &PkiRoot, serial: &BigNumRef) -> Result<LedgerRecord> {
    read_records(root)?
        .into_iter()
        .find(|record| record.matches_serial(serial))
        .ok_or(PkiError::SerialNotFound {
            serial: serial_to_hex(serial)?,
        })
}

/// Mark the certificate with `serial` as revoked.
///
/// Only the first matching record is touched; every other line is written
/// back byte for byte, line terminators included (`\r\n` stays `\r\n`). A
/// last line without a terminator gets `\n`. The ledger is left unchanged when:
/// - any line is malformed ([`PkiError::CorruptState`])
/// - the record is already revoked ([`PkiError::AlreadyRevoked`])
/// - no record carries the serial ([`PkiError::SerialNotFound`])
pub fn revoke(root: &PkiRoot, serial: &BigNumRef) -> Result<LedgerRecord> {
    let path = root.index_path();
    let contents = fs::read_to_string(&path).map_err(|e| PkiError::layout_io(&path, e))?;

    let mut rewritten = String::with_capacity(contents.len() + 16);
    let mut revoked = None;
    for (index, chunk) in contents.split_inclusive('\n').enumerate() {
        let line = chunk.trim_end_matches(['\r', '\n']);
        let record = parse_line(&path, index + 1, line)?;
        if revoked.is_none() && record.matches_serial(serial) {
            if record.is_revoked() {
                return Err(PkiError::AlreadyRevoked {
                    serial: record.serial,
                });
            }
            let updated = LedgerRecord {
                status: RecordStatus::Revoked,
                revoked_at: Some(now_utc()),
                ..record
            };
            rewritten.push_str(&updated.to_string());
            revoked = Some(updated);
        } else {
            rewritten.push_str(line);
        }
        // keep each line's own terminator; an unterminated last line gets one so
        // the next append starts on a fresh line
        match &chunk[line.len()..] {
            "" => rewritten.push('\n'),
            terminator => rewritten.push_str(terminator),
        }
    }

    let Some(record) = revoked else {
        return Err(PkiError::SerialNotFound {
            serial: serial_to_hex(serial)?,
        });
    };

    replace_file(&path, rewritten.as_bytes())?;

    info!(serial = %record.serial, filename = %record.filename, "revoked certificate");
    Ok(record)
}

fn parse_line(path: &Path, number: usize, line: &str) -> Result<LedgerRecord> {
    LedgerRecord::parse(line).ok_or_else(|| {
        PkiError::corrupt(path, format!("line {number} is not a valid ledger record"))
    })
}

/// True if `time` survives a `format_timestamp`/`parse_timestamp` round trip,
/// i.e. its year lies in the two-digit window `1950..=2049`.
pub fn is_representable(time: DateTime<Utc>) -> bool {
    (FIRST_LEDGER_YEAR..=LAST_LEDGER_YEAR).contains(&time.year())
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    format!("{}Z", time.format(TIMESTAMP_FORMAT))
}

/// Parse the 12 digits of a `yymmddHHMMSS` timestamp. Two-digit years follow
/// the X.509 UTCTime window: `50..=99` is 19xx, `00..=49` is 20xx.
pub fn parse_timestamp(digits: &str) -> Option<DateTime<Utc>> {
    if digits.len() != 12 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |at: usize| digits[at..at + 2].parse::<u32>().ok();
    let yy = field(0)? as i32;
    let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
    let naive = NaiveDate::from_ymd_opt(year, field(2)?, field(4)?)?
        .and_hms_opt(field(6)?, field(8)?, field(10)?)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Option<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(time).ok()?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0)
}

fn now_utc() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::initialize;
    use tempfile::TempDir;

    const LEDGER: &str = "V\t260101120000Z\t\t01\tserver.crt\t/CN=server.example\n\
                          R\t260101120000Z\t250601080910Z\t02\tmail.crt\t/CN=mail.example\n\
                          V\t270101120000Z\t\t0A\tapi.crt\t/CN=api.example\n";

    fn root_with_ledger(contents: &str) -> (TempDir, PkiRoot) {
        let dir = TempDir::new().unwrap();
        let root = initialize(dir.path()).unwrap();
        fs::write(root.index_path(), contents).unwrap();
        (dir, root)
    }

    fn serial(hex: &str) -> BigNum {
        serial_from_hex(hex).unwrap()
    }

    #[test]
    fn parses_valid_and_revoked_lines() {
        let mut lines = LEDGER.lines();
        let valid = LedgerRecord::parse(lines.next().unwrap()).unwrap();
        assert_eq!(valid.status, RecordStatus::Valid);
        assert_eq!(format_timestamp(valid.expires_at), "260101120000Z");
        assert_eq!(valid.revoked_at, None);
        assert_eq!(valid.serial, "01");
        assert_eq!(valid.filename, "server.crt");
        assert_eq!(valid.common_name(), Some("server.example"));

        let revoked = LedgerRecord::parse(lines.next().unwrap()).unwrap();
        assert!(revoked.is_revoked());
        assert_eq!(
            revoked.revoked_at.map(format_timestamp).as_deref(),
            Some("250601080910Z")
        );
    }

    #[test]
    fn display_reproduces_the_line() {
        for line in LEDGER.lines() {
            assert_eq!(LedgerRecord::parse(line).unwrap().to_string(), line);
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "",
            "X\t260101120000Z\t\t01\ta.crt\t/CN=a",
            "V\t2601011200Z\t\t01\ta.crt\t/CN=a",
            "V\t260101120000Z\t\t1\ta.crt\t/CN=a",
            "V\t260101120000Z\t\t01\t\t/CN=a",
            "V\t261301120000Z\t\t01\ta.crt\t/CN=a",
            "V 260101120000Z 01 a.crt /CN=a",
        ] {
            assert!(LedgerRecord::parse(line).is_none(), "{line:?}");
        }
    }

    #[test]
    fn two_digit_years_use_utctime_window() {
        assert_eq!(
            parse_timestamp("491231235959").unwrap().to_rfc3339(),
            "2049-12-31T23:59:59+00:00"
        );
        assert_eq!(
            parse_timestamp("500101000000").unwrap().to_rfc3339(),
            "1950-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn representable_years_match_the_parse_window() {
        let last = parse_timestamp("491231235959").unwrap();
        assert!(is_representable(last));
        assert!(is_representable(parse_timestamp("500101000000").unwrap()));
        assert!(!is_representable(last + chrono::TimeDelta::try_seconds(1).unwrap()));
    }

    #[test]
    fn record_for_certificate_rejects_expiry_after_2049() {
        use openssl::pkey::PKey;
        use openssl::rsa::Rsa;
        use openssl::x509::{X509Name, X509};

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "far.example").unwrap();
        let name = name.build();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder
            .set_not_before(&Asn1Time::from_str("20260101000000Z").unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_str("20540306021951Z").unwrap())
            .unwrap();
        builder
            .sign(&key, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let certificate = builder.build();

        let err = LedgerRecord::for_certificate("far.crt", &certificate).unwrap_err();
        assert!(matches!(err, PkiError::ExpiryOutOfRange { .. }), "{err:?}");
    }

    #[test]
    fn revoke_flips_only_the_matching_line() {
        let (_dir, root) = root_with_ledger(LEDGER);
        let record = revoke(&root, &serial("0a")).unwrap();
        assert!(record.is_revoked());
        assert_eq!(record.serial, "0A");

        let after = fs::read_to_string(root.index_path()).unwrap();
        let before_lines: Vec<_> = LEDGER.lines().collect();
        let after_lines: Vec<_> = after.lines().collect();
        assert_eq!(after_lines.len(), 3);
        assert_eq!(after_lines[..2], before_lines[..2]);

        let fields: Vec<_> = after_lines[2].split('\t').collect();
        assert_eq!(fields[0], "R");
        assert_eq!(fields[1], "270101120000Z");
        assert_eq!(fields[2].len(), 13);
        assert_eq!(&fields[3..], ["0A", "api.crt", "/CN=api.example"]);
    }

    #[test]
    fn revoke_matches_serials_numerically() {
        let (_dir, root) = root_with_ledger(LEDGER);
        revoke(&root, &serial("0001")).unwrap();
        let record = find_record(&root, &serial("1")).unwrap();
        assert!(record.is_revoked());
    }

    #[test]
    fn revoking_twice_leaves_ledger_untouched() {
        let (_dir, root) = root_with_ledger(LEDGER);
        let err = revoke(&root, &serial("02")).unwrap_err();
        assert!(matches!(err, PkiError::AlreadyRevoked { .. }));
        assert_eq!(fs::read_to_string(root.index_path()).unwrap(), LEDGER);
    }

    #[test]
    fn unknown_serial_is_not_found() {
        let (_dir, root) = root_with_ledger(LEDGER);
        let err = revoke(&root, &serial("FF")).unwrap_err();
        assert!(matches!(err, PkiError::SerialNotFound { ref serial } if serial == "FF"));
        assert_eq!(fs::read_to_string(root.index_path()).unwrap(), LEDGER);
    }

    #[test]
    fn revoke_keeps_foreign_line_endings() {
        let crlf = LEDGER.replace('\n', "\r\n");
        let (_dir, root) = root_with_ledger(&crlf);
        revoke(&root, &serial("01")).unwrap();

        let after = fs::read_to_string(root.index_path()).unwrap();
        let mut chunks = after.split_inclusive('\n');
        assert!(chunks.next().unwrap().starts_with("R\t260101120000Z\t"));
        let untouched: String = crlf.split_inclusive('\n').skip(1).collect();
        assert_eq!(chunks.collect::<String>(), untouched);
        assert!(after.ends_with("\r\n"));
        assert_eq!(after.matches("\r\n").count(), 3);

        let (_dir, root) = root_with_ledger(LEDGER.trim_end());
        revoke(&root, &serial("0A")).unwrap();
        let after = fs::read_to_string(root.index_path()).unwrap();
        assert!(after.ends_with("\tapi.crt\t/CN=api.example\n"));
    }

    #[test]
    fn malformed_line_aborts_before_writing() {
        let corrupt = format!("{LEDGER}garbage line\n");
        let (_dir, root) = root_with_ledger(&corrupt);
        let err = revoke(&root, &serial("01")).unwrap_err();
        match err {
            PkiError::CorruptState { reason, .. } => assert!(reason.contains("line 4")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fs::read_to_string(root.index_path()).unwrap(), corrupt);
    }

    #[test]
    fn read_records_in_file_order() {
        let (_dir, root) = root_with_ledger(LEDGER);
        let serials: Vec<_> = read_records(&root)
            .unwrap()
            .into_iter()
            .map(|record| record.serial)
            .collect();
        assert_eq!(serials, ["01", "02", "0A"]);
    }

    #[test]
    fn empty_ledger_has_no_records() {
        let (_dir, root) = root_with_ledger("");
        assert!(read_records(&root).unwrap().is_empty());
        assert!(matches!(
            revoke(&root, &serial("01")),
            Err(PkiError::SerialNotFound { .. })
        ));
    }
}
