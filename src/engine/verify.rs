//! Firmware Integrity Verification
//!
//! MD5 checksums as published in `X-Firmware-Checksum`. MD5 is an integrity
//! check against transfer corruption, not a tamper-proof signature.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Verification errors
#[derive(Debug)]
pub enum VerifyError {
    IoError(io::Error),
    ChecksumMismatch { expected: String, actual: String },
}

impl From<io::Error> for VerifyError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "IO error: {}", e),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: expected {}, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Lowercase MD5 hex digest of an in-memory buffer
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Calculate the MD5 checksum of a file
pub fn calculate_md5(path: &Path) -> Result<String, VerifyError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against an expected checksum, ignoring hex case
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = calculate_md5(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(VerifyError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
