//! Hashing policy for bucket selection and tag derivation.
//!
//! Insert and lookup both go through the same `PrefixHasher`, and the policy
//! id is stamped into the shared header so that a reader attached with a
//! different policy is refused instead of silently missing keys.

use crate::constants::TERMINATOR;
use crate::slot::Tag;
use xxhash_rust::xxh64::xxh64;

pub trait PrefixHasher: Default + Send + Sync {
    /// Written to the shared header; must be unique per policy.
    const ID: u32;

    fn hash64(&self, bytes: &[u8]) -> u64;

    /// Tag of a validated key (at least two bytes, ending in `/`).
    fn tag(&self, key: &[u8]) -> Tag;
}

/// xxh64 bucket hashing with the classic tag: the last component byte, i.e.
/// the byte right before the terminator.
#[derive(Debug, Default, Clone, Copy)]
pub struct XxHasher;

impl PrefixHasher for XxHasher {
    const ID: u32 = 1;

    #[inline]
    fn hash64(&self, bytes: &[u8]) -> u64 {
        xxh64(bytes, 0)
    }

    #[inline]
    fn tag(&self, key: &[u8]) -> Tag {
        debug_assert!(key.len() >= 2 && key[key.len() - 1] == TERMINATOR);
        Tag(key[key.len() - 2] as u16)
    }
}

/// Same bucket hashing, but the tag is the top 16 bits of a seeded xxh64 of
/// the whole key. Fewer false candidates per scan at the cost of one more hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct WideTagHasher;

const WIDE_TAG_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

impl PrefixHasher for WideTagHasher {
    const ID: u32 = 2;

    #[inline]
    fn hash64(&self, bytes: &[u8]) -> u64 {
        xxh64(bytes, 0)
    }

    #[inline]
    fn tag(&self, key: &[u8]) -> Tag {
        Tag((xxh64(key, WIDE_TAG_SEED) >> 48) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_tag_is_byte_before_terminator() {
        assert_eq!(XxHasher.tag(b"a/b/"), Tag(b'b' as u16));
        assert_eq!(XxHasher.tag(b"com/"), Tag(b'm' as u16));
        // same last byte, different keys: tags collide by construction
        assert_eq!(XxHasher.tag(b"x/"), XxHasher.tag(b"yx/"));
    }

    #[test]
    fn wide_tag_separates_keys_sharing_a_last_byte() {
        let tags: std::collections::HashSet<Tag> = (0..32)
            .map(|i| WideTagHasher.tag(format!("n{i}x/").as_bytes()))
            .collect();
        assert!(tags.len() > 1);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(XxHasher.hash64(b"a/b/"), XxHasher.hash64(b"a/b/"));
        assert_eq!(XxHasher.hash64(b"a/"), WideTagHasher.hash64(b"a/"));
    }
}
