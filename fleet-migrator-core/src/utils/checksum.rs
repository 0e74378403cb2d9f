//! Script checksums.
//!
//! A checksum is the lowercase hex SHA-256 of the raw script text. Line endings
//! are hashed as-is: converting a file from LF to CRLF is drift.

use sha2::{Digest, Sha256};

/// Computes the ledger checksum of a script body.
#[must_use]
pub fn script_checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}
