//! Helper functions for key handling and region sizing

use crate::constants::{MAX_KEY_LEN, MIN_KEY_LEN, TERMINATOR};
use crate::errors::KeyError;

pub fn fnv1a_64(s: &str) -> u64 {
    use crate::constants::{FNV_OFFSET, FNV_PRIME};
    let mut h = FNV_OFFSET;
    for &b in s.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[inline(always)]
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A prefix is `2..=255` bytes and ends with `/`.
#[inline]
pub fn validate_key(key: &[u8]) -> Result<(), KeyError> {
    if key.len() < MIN_KEY_LEN {
        return Err(KeyError::TooShort);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong);
    }
    if key[key.len() - 1] != TERMINATOR {
        return Err(KeyError::MissingTerminator);
    }
    Ok(())
}

/// Lossy rendering for log lines.
#[inline]
pub fn display_key(key: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(key)
}
