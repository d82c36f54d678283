//! Safe job names
//!
//! Job names are derived deterministically from `(tag, verification, suffix)`
//! so that repeated reconciliation finds the same object. Names longer than the
//! platform's resource-name limit are truncated and disambiguated with a short
//! hash of the untruncated base.
//!
//! The hash keeps only 4 bytes of SHA-256. Collisions are tolerated: the input
//! space is tiny.

use sha2::{Digest, Sha256};

/// Maximum length of a job resource name
pub const MAX_JOB_NAME_LENGTH: usize = 63;

/// 32-symbol alphabet safe for resource names (no vowels except `i`, no padding)
const NAME_ALPHABET: &[u8; 32] = b"bcdfghijklmnpqrstvwxyz0123456789";

/// Short name-safe hash over the concatenated inputs
#[must_use]
pub fn safe_hash(values: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    encode_name_base32(&digest[..4])
}

/// Unpadded base32 over [`NAME_ALPHABET`]
fn encode_name_base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(NAME_ALPHABET[((buffer >> bits) & 0x1f) as usize]));
        }
    }
    if bits > 0 {
        out.push(char::from(NAME_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]));
    }
    out
}

/// Deterministic, length-bounded job name for `name` and `suffix`
///
/// A non-empty suffix is joined with `-`. When the result exceeds
/// [`MAX_JOB_NAME_LENGTH`], `name` is truncated and followed by
/// `-<hash(name)><suffix>`; a `-` left dangling by truncation is dropped.
#[must_use]
pub fn generate_safe_job_name(name: &str, suffix: &str) -> String {
    let suffix = if suffix.is_empty() || suffix.starts_with('-') {
        suffix.to_string()
    } else {
        format!("-{suffix}")
    };
    let job_name = format!("{name}{suffix}");
    if job_name.len() <= MAX_JOB_NAME_LENGTH {
        return job_name;
    }

    let tail = format!("-{}{suffix}", safe_hash(&[name]));
    let keep = floor_boundary(name, MAX_JOB_NAME_LENGTH.saturating_sub(tail.len()));
    let mut truncated = &name[..keep];
    if let Some(stripped) = truncated.strip_suffix('-') {
        truncated = stripped;
    }
    let mut job_name = format!("{truncated}{tail}");
    if job_name.len() > MAX_JOB_NAME_LENGTH {
        // only reachable with an oversized suffix
        let keep = floor_boundary(&job_name, MAX_JOB_NAME_LENGTH);
        job_name.truncate(keep);
    }
    job_name
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
