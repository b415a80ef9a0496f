//! Serial Allocation Module
//!
//! Leaf certificate serials come from the `serial` file of the PKI root: a
//! hexadecimal value followed by a newline, the same format `openssl ca` uses.
//! [`next_serial`] hands out the stored value and writes back its successor,
//! so serials are strictly increasing under a single writer.
//!
//! A counter that cannot be read as hexadecimal is corrupt state and a hard
//! error. The allocator never falls back to a fresh counter, which would hand
//! out serials that are already in the ledger.

use crate::error::{PkiError, Result};
use crate::storage::{replace_file, PkiRoot};
use openssl::bn::{BigNum, BigNumRef};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Return the current counter value and persist its successor.
pub fn next_serial(root: &PkiRoot) -> Result<BigNum> {
    let path = root.serial_path();
    let contents = fs::read_to_string(&path).map_err(|e| PkiError::layout_io(&path, e))?;
    let current = parse_counter(&path, &contents)?;

    let one = BigNum::from_u32(1)?;
    let mut next = BigNum::new()?;
    next.checked_add(&current, &one)?;
    let next_hex = serial_to_hex(&next)?;
    replace_file(&path, format!("{next_hex}\n").as_bytes())?;

    debug!(serial = %serial_to_hex(&current)?, next = %next_hex, "allocated serial");
    Ok(current)
}

/// Parse the contents of a counter file (`serial` or `crlnumber`).
pub fn parse_counter(path: &Path, contents: &str) -> Result<BigNum> {
    let digits = contents.trim();
    if digits.is_empty() {
        return Err(PkiError::corrupt(path, "counter is empty"));
    }
    serial_from_hex(digits)
        .ok_or_else(|| PkiError::corrupt(path, format!("{digits:?} is not a hexadecimal counter")))
}

/// Parse an unsigned hexadecimal serial. Case and leading zeros are ignored.
pub fn serial_from_hex(hex: &str) -> Option<BigNum> {
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    BigNum::from_hex_str(hex).ok()
}

/// Uppercase hexadecimal, zero-padded to an even number of digits.
pub fn serial_to_hex(serial: &BigNumRef) -> Result<String> {
    let hex = serial.to_hex_str()?.to_uppercase();
    if hex.len() % 2 == 1 {
        Ok(format!("0{hex}"))
    } else {
        Ok(hex)
    }
}
