//! SHA-1 digest utilities
//!
//! Update metadata identifies every file version by its SHA-1. The
//! digest is a content fingerprint here, not a security boundary.

use sha1::{Digest, Sha1};

/// Size of a SHA-1 digest in bytes
pub const SHA1_DIGEST_SIZE: usize = 20;

/// Compute the SHA-1 digest of data
pub fn sha1_digest(data: &[u8]) -> [u8; SHA1_DIGEST_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Format a digest as a lowercase hex string
pub fn sha1_to_hex(digest: &[u8; SHA1_DIGEST_SIZE]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Parse a 40-digit hex digest.
///
/// The input may carry a trailing tag (`"<digest>:<tag>"`); anything
/// after the 40th digit is ignored. A 41st hex digit is rejected rather
/// than silently truncated.
pub fn parse_sha1(s: &str) -> Option<[u8; SHA1_DIGEST_SIZE]> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 * SHA1_DIGEST_SIZE {
        return None;
    }

    let mut digest = [0u8; SHA1_DIGEST_SIZE];
    for (i, out) in digest.iter_mut().enumerate() {
        let hi = hex_value(bytes[2 * i])?;
        let lo = hex_value(bytes[2 * i + 1])?;
        *out = hi << 4 | lo;
    }

    if let Some(&next) = bytes.get(2 * SHA1_DIGEST_SIZE) {
        if hex_value(next).is_some() {
            return None;
        }
    }

    Some(digest)
}

/// Find the first entry whose digest parses and equals `digest`.
///
/// Entries that fail to parse are skipped, not fatal: a list is allowed
/// to mix plain digests with suffix-tagged ones.
pub fn find_matching_digest<S: AsRef<str>>(
    digest: &[u8; SHA1_DIGEST_SIZE],
    entries: &[S],
) -> Option<usize> {
    entries
        .iter()
        .position(|e| parse_sha1(e.as_ref()).is_some_and(|d| d == *digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(sha1_to_hex(&sha1_digest(b"abc")), ABC_SHA1);
    }

    #[test]
    fn test_sha1_different_input() {
        assert_ne!(sha1_digest(b"hello"), sha1_digest(b"world"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = sha1_digest(b"roundtrip");
        let parsed = parse_sha1(&sha1_to_hex(&digest)).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_parse_mixed_case() {
        let upper = ABC_SHA1.to_uppercase();
        assert_eq!(parse_sha1(&upper), parse_sha1(ABC_SHA1));
    }

    #[test]
    fn test_parse_tolerates_tag() {
        let tagged = format!("{}:system", ABC_SHA1);
        assert_eq!(parse_sha1(&tagged), parse_sha1(ABC_SHA1));
    }

    #[test]
    fn test_parse_rejects_41st_hex_digit() {
        let long = format!("{}a", ABC_SHA1);
        assert!(parse_sha1(&long).is_none());
    }

    #[test]
    fn test_parse_rejects_short_and_junk() {
        assert!(parse_sha1("").is_none());
        assert!(parse_sha1(&ABC_SHA1[..39]).is_none());
        let junk = format!("g{}", &ABC_SHA1[1..]);
        assert!(parse_sha1(&junk).is_none());
    }

    #[test]
    fn test_find_matching_digest() {
        let digest = sha1_digest(b"abc");
        let entries = vec![
            sha1_to_hex(&sha1_digest(b"other")),
            "not-a-digest".to_string(),
            format!("{}:tagged", ABC_SHA1),
        ];
        assert_eq!(find_matching_digest(&digest, &entries), Some(2));
    }

    #[test]
    fn test_find_matching_digest_empty_list() {
        let digest = sha1_digest(b"abc");
        let entries: Vec<String> = Vec::new();
        assert_eq!(find_matching_digest(&digest, &entries), None);
    }
}
