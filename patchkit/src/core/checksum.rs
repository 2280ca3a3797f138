//! Content checksum engine.
//!
//! Digests are used purely for change detection between an installation log
//! and a freshly downloaded archive; a collision costs one unnecessary file
//! rewrite, never cross-file corruption, so a fast non-cryptographic hash
//! (CRC32) is sufficient.

use std::fs;
use std::io::Read;
use std::path::Path;

/// Buffer size for streamed file hashing
const HASH_BUFFER_SIZE: usize = 8192;

/// Format a raw CRC32 value as the digest string stored in the installation log.
pub fn format_crc(crc: u32) -> String {
    format!("{:08x}", crc)
}

/// Digest an in-memory byte slice.
pub fn digest_bytes(data: &[u8]) -> String {
    format_crc(crc32fast::hash(data))
}

/// Digest a file on disk without loading it whole into memory.
pub fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format_crc(hasher.finalize()))
}
