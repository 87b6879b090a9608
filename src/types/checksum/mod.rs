#![forbid(unsafe_code)]
//! CRC32 checksums (`crc32fast`) protecting pages and the root record.

/// Checksum of an encoded page: covers the kind discriminant and the body.
pub fn page_crc32(kind: u32, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&kind.to_be_bytes());
    hasher.update(body);
    hasher.finalize()
}

/// Checksum of a root pointer record.
pub fn record_crc32(record: &[u8]) -> u32 {
    crc32fast::hash(record)
}
