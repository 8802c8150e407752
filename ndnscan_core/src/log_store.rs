//! Append-only record log.
//!
//! Record layout, byte for byte:
//!
//! ```text
//! +--------+-------------+----------+------------------+
//! | len u8 | terminal u8 | port i8  | key bytes [len]  |
//! +--------+-------------+----------+------------------+
//! ```
//!
//! Offset 0 is never handed out. Key bytes and `len` are immutable once the
//! record is published; `terminal` and `port` only move through the
//! [`LogStore::upgrade_terminal`] latch and are always accessed atomically.

use crate::constants::{
    LOG_HEADROOM, NON_TERMINAL, NO_PORT, RECORD_HEADER_LEN, TERMINAL, UPGRADING,
};
use crate::errors::Error;
use crate::types::{LogOffset, PortId, Record};
use log::error;
use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU64, AtomicU8, Ordering},
};

/// Decoded fixed-size part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub len: u8,
    pub is_terminal: bool,
    pub dst_port: Option<PortId>,
}

pub struct LogStore {
    base: NonNull<u8>,
    capacity: u64,
    head: NonNull<AtomicU64>,
    records: NonNull<AtomicU64>,
}

impl LogStore {
    /// # Safety
    /// `base` must be valid for `capacity` bytes, and `head`/`records` must
    /// point at live atomics, all for as long as the store is used.
    pub(crate) unsafe fn from_raw(
        base: NonNull<u8>,
        capacity: u64,
        head: NonNull<AtomicU64>,
        records: NonNull<AtomicU64>,
    ) -> Self {
        Self { base, capacity, head, records }
    }

    #[inline]
    fn head_atomic(&self) -> &AtomicU64 {
        unsafe { self.head.as_ref() }
    }

    /// Next append position; every byte below it belongs to a record.
    #[inline]
    pub fn head(&self) -> u64 {
        self.head_atomic().load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn record_count(&self) -> u64 {
        unsafe { self.records.as_ref() }.load(Ordering::Acquire)
    }

    #[inline]
    fn byte(&self, pos: u64) -> &AtomicU8 {
        debug_assert!(pos < self.capacity);
        unsafe { &*(self.base.as_ptr().add(pos as usize) as *const AtomicU8) }
    }

    /// Write a new record at the head and return its offset.
    ///
    /// Refuses once fewer than [`LOG_HEADROOM`] bytes remain, whatever the
    /// size of this particular key.
    pub fn append(&mut self, key: &[u8], terminal: Option<PortId>) -> Result<LogOffset, Error> {
        debug_assert!(!key.is_empty() && key.len() <= u8::MAX as usize);
        let head = self.head();
        if head + LOG_HEADROOM as u64 >= self.capacity {
            error!(
                "[LOG] capacity exhausted: head={} headroom={} capacity={}",
                head, LOG_HEADROOM, self.capacity
            );
            return Err(Error::CapacityExhausted { log_head: head, log_capacity: self.capacity });
        }
        let offset = LogOffset::new(head).ok_or(Error::CapacityExhausted {
            log_head: head,
            log_capacity: self.capacity,
        })?;

        let (flag, port) = match terminal {
            Some(p) => (TERMINAL, p.get()),
            None => (NON_TERMINAL, NO_PORT),
        };
        // SAFETY: head + header + key < head + LOG_HEADROOM < capacity, and the
        // bytes above head are not visible to any reader yet.
        unsafe {
            let dst = self.base.as_ptr().add(head as usize);
            dst.write(key.len() as u8);
            dst.add(1).write(flag);
            dst.add(2).write(port);
            std::ptr::copy_nonoverlapping(key.as_ptr(), dst.add(RECORD_HEADER_LEN), key.len());
        }
        let next = head + (RECORD_HEADER_LEN + key.len()) as u64;
        // Count first: a concurrent reader may see `len()` one ahead of
        // `iter()`, never behind it.
        unsafe { self.records.as_ref() }.fetch_add(1, Ordering::AcqRel);
        self.head_atomic().store(next, Ordering::Release);
        Ok(offset)
    }

    /// `None` if `offset` does not point inside the written part of the log.
    pub fn read_header(&self, offset: LogOffset) -> Option<RecordHeader> {
        let pos = offset.get();
        let head = self.head();
        if pos + RECORD_HEADER_LEN as u64 > head {
            return None;
        }
        let len = self.byte(pos).load(Ordering::Relaxed);
        if pos + (RECORD_HEADER_LEN + len as usize) as u64 > head {
            return None;
        }
        // Acquire pairs with the Release in upgrade_terminal, so the port is
        // visible once TERMINAL is.
        let is_terminal = self.byte(pos + 1).load(Ordering::Acquire) == TERMINAL;
        let dst_port = if is_terminal {
            let raw = self.byte(pos + 2).load(Ordering::Relaxed);
            PortId::new(raw).ok()
        } else {
            None
        };
        Some(RecordHeader { len, is_terminal, dst_port })
    }

    pub fn read_key(&self, offset: LogOffset, len: u8) -> Option<&[u8]> {
        let start = offset.get() + RECORD_HEADER_LEN as u64;
        if start + len as u64 > self.head() {
            return None;
        }
        // SAFETY: bounds checked against head; key bytes never change after
        // the record is published.
        Some(unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(start as usize), len as usize)
        })
    }

    pub fn record(&self, offset: LogOffset) -> Option<Record<'_>> {
        let hdr = self.read_header(offset)?;
        let key = self.read_key(offset, hdr.len)?;
        Some(Record {
            offset,
            key,
            is_terminal: hdr.is_terminal,
            dst_port: hdr.dst_port,
        })
    }

    /// True if the stored key at `offset` is exactly `key`.
    #[inline]
    pub fn key_matches(&self, offset: LogOffset, key: &[u8]) -> bool {
        let pos = offset.get();
        if pos + RECORD_HEADER_LEN as u64 > self.head() {
            return false;
        }
        let len = self.byte(pos).load(Ordering::Relaxed);
        len as usize == key.len() && self.read_key(offset, len) == Some(key)
    }

    /// Latch the record terminal with `port`. Returns false, leaving the
    /// record untouched, if it is already terminal or another caller won the
    /// upgrade.
    ///
    /// The latch is `NON_TERMINAL -> UPGRADING -> TERMINAL`. A process that
    /// dies between the two steps leaves the record in `UPGRADING` for good:
    /// it reads as non-terminal and refuses further upgrades. Rebuild the
    /// index to recover such a record.
    pub fn upgrade_terminal(&self, offset: LogOffset, port: PortId) -> bool {
        let pos = offset.get();
        if pos + RECORD_HEADER_LEN as u64 > self.head() {
            return false;
        }
        let flag = self.byte(pos + 1);
        if flag
            .compare_exchange(NON_TERMINAL, UPGRADING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.byte(pos + 2).store(port.get(), Ordering::Relaxed);
        flag.store(TERMINAL, Ordering::Release);
        true
    }

    /// All records in append order.
    pub fn iter(&self) -> LogIter<'_> {
        LogIter { log: self, pos: LogOffset::FIRST.get(), end: self.head() }
    }
}

pub struct LogIter<'a> {
    log: &'a LogStore,
    pos: u64,
    end: u64,
}

impl<'a> Iterator for LogIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let rec = self.log.record(LogOffset::new(self.pos)?)?;
        if rec.key.is_empty() {
            return None;
        }
        self.pos += (RECORD_HEADER_LEN + rec.key.len()) as u64;
        Some(rec)
    }
}
