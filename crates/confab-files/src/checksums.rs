//! Content checksums: md5 + sha256 for exact duplicates, a 64-bit SimHash
//! for near-duplicate detection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksums {
    pub md5: String,
    pub sha256: String,
    /// 64-bit SimHash rendered as 16 hex chars.
    pub simhash: String,
}

pub fn compute(content: &[u8]) -> FileChecksums {
    FileChecksums {
        md5: format!("{:x}", md5::compute(content)),
        sha256: hex::encode(Sha256::digest(content)),
        simhash: format!("{:016x}", simhash64(content)),
    }
}

/// Token-wise SimHash: hash every token, let each vote per bit position,
/// keep the majority sign. Similar texts land within a few bits of each
/// other; binary content degrades to a plain content hash, which is fine
/// for the duplicate-flag use case.
pub fn simhash64(content: &[u8]) -> u64 {
    let text = String::from_utf8_lossy(content);
    let mut votes = [0i64; 64];
    let mut any = false;
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        any = true;
        let h = fnv1a64(token.to_lowercase().as_bytes());
        for (bit, vote) in votes.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }
    if !any {
        return fnv1a64(content);
    }
    let mut out = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            out |= 1 << bit;
        }
    }
    out
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
