//! Data structures for the prefix index

use crate::bucket::BucketIndex;
use crate::constants::{MAX_PORT_ID, OFFSET_BITS};
use crate::errors::Error;
use crate::hasher::{PrefixHasher, XxHasher};
use crate::log_store::LogStore;
use crate::region::MappedRegion;
use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU32, AtomicU64},
};

/// Byte offset of a record inside the log. Never zero: offset 0 is the
/// empty-slot sentinel.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogOffset(u64);

impl LogOffset {
    pub const FIRST: LogOffset = LogOffset(1);

    #[inline]
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 || raw >> OFFSET_BITS != 0 {
            None
        } else {
            Some(LogOffset(raw))
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Forwarding target of a terminal prefix.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PortId(u8);

impl PortId {
    #[inline]
    pub fn new(port: u8) -> Result<Self, Error> {
        if port > MAX_PORT_ID {
            Err(Error::InvalidPort(port))
        } else {
            Ok(PortId(port))
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PortId {
    type Error = Error;
    fn try_from(port: u8) -> Result<Self, Error> {
        PortId::new(port)
    }
}

/// Leading block of every region (aligned to cache line)
#[repr(C, align(64))]
pub struct Header {
    pub magic: u64,             // identifies a valid ndnscan region
    pub version: u16,           // layout version
    pub _reserved: [u8; 2],
    pub hasher_id: u32,         // PrefixHasher::ID used to build the index
    pub num_buckets: u64,
    pub log_capacity: u64,
    pub log_head: AtomicU64,    // next append position in the log
    pub records: AtomicU64,     // records appended so far
    pub ref_count: AtomicU64,   // live handles on this region
    pub init_flag: AtomicU32,   // 0 = un-initialised, 1 = ready
}

/// Metadata view of one stored prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub offset: LogOffset,
    pub key: &'a [u8],
    pub is_terminal: bool,
    /// `Some` only once the record is terminal.
    pub dst_port: Option<PortId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was appended at this offset.
    Inserted(LogOffset),
    /// The key was already present; nothing was appended. `upgraded` is set
    /// when this insert latched a non-terminal record to terminal.
    Existing { offset: LogOffset, upgraded: bool },
}

impl InsertOutcome {
    pub fn offset(self) -> LogOffset {
        match self {
            InsertOutcome::Inserted(off) => off,
            InsertOutcome::Existing { offset, .. } => offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May insert. Heap indexes and creators of a shared region.
    Writer,
    /// Attached to a region some other handle built; lookups only.
    Reader,
}

/// Two-choice, 8-way set-associative prefix index (core handle)
pub struct HashIndex<H: PrefixHasher = XxHasher> {
    pub(crate) region: MappedRegion,   // owns the memory everything below points into
    pub(crate) hdr: NonNull<Header>,
    pub(crate) buckets: BucketIndex,
    pub(crate) log: LogStore,
    pub(crate) hasher: H,
    pub(crate) role: Role,
}

// SAFETY: HashIndex only holds pointers into `region`, which it owns and which
// never moves. Slots, log_head and the terminal latch are atomics; key bytes
// are immutable once their slot is published, and appends need `&mut self`.
unsafe impl<H: PrefixHasher> Send for HashIndex<H> {}
unsafe impl<H: PrefixHasher> Sync for HashIndex<H> {}

impl<H: PrefixHasher> std::panic::RefUnwindSafe for HashIndex<H> {}
impl<H: PrefixHasher> std::panic::UnwindSafe for HashIndex<H> {}
