//! Packed 64-bit bucket slot: `tag << 48 | offset`.
//!
//! This is the only place that knows the bit layout. An offset of zero is the
//! empty-slot sentinel, which is why the log never hands out offset 0.

use crate::constants::OFFSET_BITS;
use crate::types::LogOffset;

const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

const _: () = assert!(std::mem::size_of::<Slot>() == 8);
const _: () = assert!(std::mem::size_of::<Tag>() == 2);
const _: () = assert!(OFFSET_BITS + 16 == 64);

/// Short, lossy discriminator used to skip most false candidates before the
/// full key comparison.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Tag(pub u16);

impl Tag {
    /// Bytes fed to the secondary hash.
    #[inline]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Slot(u64);

impl Slot {
    pub const EMPTY: Slot = Slot(0);

    #[inline]
    pub fn new(tag: Tag, offset: LogOffset) -> Self {
        Slot(((tag.0 as u64) << OFFSET_BITS) | (offset.get() & OFFSET_MASK))
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Slot(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 & OFFSET_MASK == 0
    }

    #[inline]
    pub const fn tag(self) -> Tag {
        Tag((self.0 >> OFFSET_BITS) as u16)
    }

    /// `None` for an unoccupied slot.
    #[inline]
    pub fn offset(self) -> Option<LogOffset> {
        LogOffset::new(self.0 & OFFSET_MASK)
    }
}
