//! Checksum utilities for archive verification
//!
//! Downloaded FAERS archives are sealed by a SHA-256 digest over the whole
//! zip file. The digest is recorded in load history; a mismatch against a
//! previously recorded value for the same quarter is reported by the caller
//! as a warning (the upstream source is authoritative).

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 checksum of a file, streaming in fixed-size buffers
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Compute the SHA-256 checksum of any readable source
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
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
