//! Bucket table: `num_buckets` cache-line buckets of 8 packed slots.
//!
//! A key has exactly two candidate buckets. The primary comes from the hash
//! of the whole key; the secondary is the primary XOR the hash of the 2-byte
//! tag, so it can be derived from a slot alone without the key.

use crate::constants::{BUCKET_WAYS, CACHE_LINE};
use crate::hasher::PrefixHasher;
use crate::slot::{Slot, Tag};
use crate::types::LogOffset;
use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

#[repr(C, align(64))]
pub struct Bucket {
    pub slots: [AtomicU64; BUCKET_WAYS],
}

const _: () = assert!(std::mem::size_of::<Bucket>() == CACHE_LINE);
const _: () = assert!(std::mem::align_of::<Bucket>() == CACHE_LINE);

impl Bucket {
    #[inline]
    pub fn slot(&self, way: usize) -> Slot {
        Slot::from_raw(self.slots[way].load(Ordering::Acquire))
    }
}

pub struct BucketIndex {
    base: NonNull<Bucket>,
    num_buckets: usize,
}

impl BucketIndex {
    /// # Safety
    /// `base` must point at `num_buckets` zero-initialised or previously
    /// written buckets that outlive the index. `num_buckets` is a power of two.
    pub(crate) unsafe fn from_raw(base: NonNull<Bucket>, num_buckets: usize) -> Self {
        debug_assert!(num_buckets.is_power_of_two());
        Self { base, num_buckets }
    }

    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    #[inline]
    fn mask(&self) -> u64 {
        (self.num_buckets - 1) as u64
    }

    #[inline]
    pub fn bucket(&self, index: usize) -> &Bucket {
        assert!(index < self.num_buckets, "bucket index out of range");
        unsafe { &*self.base.as_ptr().add(index) }
    }

    #[inline]
    pub fn primary_bucket<H: PrefixHasher>(&self, hasher: &H, key: &[u8]) -> usize {
        (hasher.hash64(key) & self.mask()) as usize
    }

    #[inline]
    pub fn secondary_bucket<H: PrefixHasher>(&self, hasher: &H, primary: usize, tag: Tag) -> usize {
        ((primary as u64 ^ hasher.hash64(&tag.to_bytes())) & self.mask()) as usize
    }

    /// Primary first, then secondary. Both entries may be the same bucket.
    #[inline]
    pub fn candidates<H: PrefixHasher>(&self, hasher: &H, key: &[u8], tag: Tag) -> [usize; 2] {
        let primary = self.primary_bucket(hasher, key);
        [primary, self.secondary_bucket(hasher, primary, tag)]
    }

    /// Occupied slots of `bucket` carrying `tag`, in way order.
    pub fn scan(&self, bucket: usize, tag: Tag) -> impl Iterator<Item = LogOffset> + '_ {
        let b = self.bucket(bucket);
        (0..BUCKET_WAYS).filter_map(move |way| {
            let slot = b.slot(way);
            #[cfg(feature = "trace")]
            log::trace!(
                "[SCAN] bucket={} way={} raw={:#018x} want_tag={:#06x}",
                bucket,
                way,
                slot.raw(),
                tag.0
            );
            match slot.offset() {
                Some(off) if slot.tag() == tag => Some(off),
                _ => None,
            }
        })
    }

    pub fn find_empty_slot(&self, bucket: usize) -> Option<usize> {
        let b = self.bucket(bucket);
        (0..BUCKET_WAYS).find(|&way| b.slot(way).is_empty())
    }

    /// Publish an occupied slot. Slots are write-once: returns false and
    /// leaves the slot alone if it is already occupied.
    pub fn write_slot(&mut self, bucket: usize, way: usize, tag: Tag, offset: LogOffset) -> bool {
        let cell = &self.bucket(bucket).slots[way];
        let current = cell.load(Ordering::Acquire);
        if !Slot::from_raw(current).is_empty() {
            return false;
        }
        cell.compare_exchange(
            current,
            Slot::new(tag, offset).raw(),
            Ordering::Release,
            Ordering::Relaxed,
        )
        .is_ok()
    }

    /// Number of occupied slots across the whole table.
    pub fn occupied(&self) -> u64 {
        (0..self.num_buckets)
            .map(|i| {
                let b = self.bucket(i);
                (0..BUCKET_WAYS).filter(|&w| !b.slot(w).is_empty()).count() as u64
            })
            .sum()
    }
}
