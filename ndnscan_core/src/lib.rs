pub mod bucket;
pub mod constants;
pub mod errors;
pub mod hasher;
pub mod helpers;
pub mod loader;
pub mod log_store;
pub mod platform;
pub mod region;
pub mod slot;
pub mod telemetry;
pub mod types;

use bucket::{Bucket, BucketIndex};
use constants::*;
use helpers::*;
use log::{debug, info, trace, warn};
use log_store::{LogIter, LogStore};
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use region::MappedRegion;
use std::{
    mem::size_of,
    ptr::{self, NonNull},
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

pub use crate::errors::{Error, KeyError};
pub use crate::hasher::{PrefixHasher, WideTagHasher, XxHasher};
pub use crate::loader::{load_names, verify_names, LoadReport, VerifyReport};
pub use crate::slot::{Slot, Tag};
pub use crate::types::{HashIndex, Header, InsertOutcome, LogOffset, PortId, Record, Role};

// ===== Compile-time assertions for alignment and size =====
const HEADER_PADDED: usize = helpers::align_up(size_of::<Header>(), CACHE_LINE);
const _: () = assert!(HEADER_PADDED == CACHE_LINE);
const _: () = assert!(std::mem::align_of::<Header>() == CACHE_LINE);

/// How long an attaching reader waits for the creator to finish the header.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes needed for a region holding `num_buckets` buckets and a log of
/// `log_capacity` bytes.
pub fn region_size(num_buckets: usize, log_capacity: u64) -> Result<usize, Error> {
    if num_buckets == 0 || !num_buckets.is_power_of_two() {
        return Err(Error::InvalidGeometry("bucket count must be a non-zero power of two"));
    }
    if log_capacity <= LOG_HEADROOM as u64 + 1 {
        return Err(Error::InvalidGeometry("log capacity smaller than one worst-case record"));
    }
    if log_capacity > MAX_LOG_CAPACITY {
        return Err(Error::InvalidGeometry("log capacity exceeds 48-bit offsets"));
    }
    num_buckets
        .checked_mul(size_of::<Bucket>())
        .and_then(|b| b.checked_add(HEADER_PADDED))
        .and_then(|b| b.checked_add(usize::try_from(log_capacity).ok()?))
        .ok_or(Error::InvalidGeometry("region size overflows usize"))
}

impl HashIndex<XxHasher> {
    /// Private, heap-backed index. The handle is the only writer.
    pub fn new(num_buckets: usize, log_capacity: u64) -> Result<Self, Error> {
        Self::with_hasher(num_buckets, log_capacity, XxHasher)
    }

    /// Create or attach to the shared index called `name`.
    ///
    /// The handle that creates the segment becomes its writer; every later
    /// handle attaches as a reader and must agree on the geometry.
    pub fn open(name: &str, num_buckets: usize, log_capacity: u64) -> Result<Self, Error> {
        Self::open_with_hasher(name, num_buckets, log_capacity, XxHasher)
    }

    /// Unlink the shared segment behind `name`. Handles already attached keep
    /// working; new `open` calls create a fresh index.
    pub fn destroy(name: &str) {
        region::force_destroy(name);
    }
}

impl<H: PrefixHasher> HashIndex<H> {
    // ---- logging bootstraper -------------------------------------------------
    fn ensure_logging() {
        static INIT: OnceCell<()> = OnceCell::new();
        INIT.get_or_init(|| {
            // Fallback: simple env_logger with RFC‑3339 ts off.
            let _ = env_logger::builder()
                .format_timestamp(None)
                .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
                .try_init();
        });
        telemetry::init();
    }

    pub fn with_hasher(num_buckets: usize, log_capacity: u64, hasher: H) -> Result<Self, Error> {
        Self::ensure_logging();
        let size = region_size(num_buckets, log_capacity)?;
        let region = MappedRegion::heap(size)?;
        Self::from_region(region, num_buckets, log_capacity, hasher)
    }

    pub fn open_with_hasher(
        name: &str,
        num_buckets: usize,
        log_capacity: u64,
        hasher: H,
    ) -> Result<Self, Error> {
        Self::ensure_logging();
        let size = region_size(num_buckets, log_capacity)?;
        let region = MappedRegion::shared(name, size)?;
        Self::from_region(region, num_buckets, log_capacity, hasher)
    }

    fn from_region(
        region: MappedRegion,
        num_buckets: usize,
        log_capacity: u64,
        hasher: H,
    ) -> Result<Self, Error> {
        let base = region.as_ptr();
        let hdr = base.cast::<Header>();
        let hdr_ptr = hdr.as_ptr();

        let role = if region.is_creator() {
            // Fresh memory: zero the bucket table so every slot starts empty.
            unsafe {
                std::ptr::write_bytes(
                    base.as_ptr().add(HEADER_PADDED),
                    0,
                    num_buckets * size_of::<Bucket>(),
                );
                // Attachers only ever read init_flag before it turns 1, so the
                // rest of the header is written field by field underneath it.
                ptr::addr_of_mut!((*hdr_ptr).magic).write(HEADER_MAGIC);
                ptr::addr_of_mut!((*hdr_ptr).version).write(HEADER_VERSION);
                ptr::addr_of_mut!((*hdr_ptr)._reserved).write([0; 2]);
                ptr::addr_of_mut!((*hdr_ptr).hasher_id).write(H::ID);
                ptr::addr_of_mut!((*hdr_ptr).num_buckets).write(num_buckets as u64);
                ptr::addr_of_mut!((*hdr_ptr).log_capacity).write(log_capacity);
                let hdr_ref = &*hdr_ptr;
                hdr_ref.log_head.store(LogOffset::FIRST.get(), Ordering::Relaxed);
                hdr_ref.records.store(0, Ordering::Relaxed);
                hdr_ref.ref_count.store(1, Ordering::Relaxed);
                (*hdr_ptr).init_flag.store(1, Ordering::Release);
            }
            info!(
                "[OPEN] created index: buckets={}, log_capacity={}, hasher={}",
                num_buckets,
                log_capacity,
                H::ID
            );
            Role::Writer
        } else {
            let hdr_ref = unsafe { &*hdr_ptr };
            let deadline = Instant::now() + ATTACH_TIMEOUT;
            while hdr_ref.init_flag.load(Ordering::Acquire) != 1 {
                if Instant::now() >= deadline {
                    return Err(Error::NotInitialized);
                }
                std::thread::yield_now();
            }
            if hdr_ref.magic != HEADER_MAGIC
                || hdr_ref.version != HEADER_VERSION
                || hdr_ref.hasher_id != H::ID
                || hdr_ref.num_buckets != num_buckets as u64
                || hdr_ref.log_capacity != log_capacity
            {
                warn!(
                    "[OPEN] geometry mismatch: region has buckets={} log_capacity={} hasher={}",
                    hdr_ref.num_buckets, hdr_ref.log_capacity, hdr_ref.hasher_id
                );
                return Err(Error::GeometryMismatch);
            }
            hdr_ref.ref_count.fetch_add(1, Ordering::SeqCst);
            info!(
                "[OPEN] attached reader: records={}, log_head={}",
                hdr_ref.records.load(Ordering::Acquire),
                hdr_ref.log_head.load(Ordering::Acquire)
            );
            Role::Reader
        };

        // SAFETY: region_size() reserved header + buckets + log, the region
        // outlives both views, and the bucket table is cache-line aligned.
        let buckets = unsafe {
            let ptr = base.as_ptr().add(HEADER_PADDED) as *mut Bucket;
            BucketIndex::from_raw(NonNull::new_unchecked(ptr), num_buckets)
        };
        let log = unsafe {
            let log_base = base.as_ptr().add(HEADER_PADDED + num_buckets * size_of::<Bucket>());
            LogStore::from_raw(
                NonNull::new_unchecked(log_base),
                log_capacity,
                NonNull::from(&(*hdr_ptr).log_head),
                NonNull::from(&(*hdr_ptr).records),
            )
        };

        Ok(Self { region, hdr, buckets, log, hasher, role })
    }

    #[inline]
    fn header(&self) -> &Header {
        unsafe { self.hdr.as_ref() }
    }

    /// Probe both candidate buckets for `key`.
    ///
    /// With `upgrade = Some(port)`, a matching non-terminal record is latched
    /// terminal with `port`. The second value reports whether that happened.
    pub fn lookup(&self, key: &[u8], upgrade: Option<PortId>) -> Option<(LogOffset, bool)> {
        validate_key(key).ok()?;
        let tag = self.hasher.tag(key);
        for bucket in self.buckets.candidates(&self.hasher, key, tag) {
            for offset in self.buckets.scan(bucket, tag) {
                if !self.log.key_matches(offset, key) {
                    continue;
                }
                let upgraded = match upgrade {
                    Some(port) => self.log.upgrade_terminal(offset, port),
                    None => false,
                };
                if upgraded {
                    counter!("ndnscan_upgrades_total").increment(1);
                    debug!(
                        "[LOOKUP] upgraded {} at offset={} to port={}",
                        display_key(key),
                        offset.get(),
                        port_of(upgrade)
                    );
                }
                return Some((offset, upgraded));
            }
        }
        None
    }

    /// Existence test; never mutates.
    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.lookup(key, None).is_some()
    }

    /// Existence test that also latches a non-terminal match to terminal with
    /// `port`. A record that is already terminal keeps its original port.
    #[inline]
    pub fn contains_and_upgrade(&self, key: &[u8], port: PortId) -> bool {
        self.lookup(key, Some(port)).is_some()
    }

    /// Current metadata of `key`, without mutating it.
    pub fn get(&self, key: &[u8]) -> Option<Record<'_>> {
        let (offset, _) = self.lookup(key, None)?;
        self.log.record(offset)
    }

    /// Insert `key` unless an equal key is already stored.
    ///
    /// Inserting an existing key never appends; if the insert asks for a
    /// terminal record and the stored one is not yet terminal, it is
    /// upgraded in place.
    pub fn insert(
        &mut self,
        key: &[u8],
        is_terminal: bool,
        dst_port: Option<PortId>,
    ) -> Result<InsertOutcome, Error> {
        if self.role == Role::Reader {
            return Err(Error::ReadOnly);
        }
        validate_key(key)?;
        let terminal = if is_terminal {
            Some(dst_port.ok_or(Error::MissingPort)?)
        } else {
            None
        };
        counter!("ndnscan_inserts_total").increment(1);

        if let Some((offset, upgraded)) = self.lookup(key, terminal) {
            trace!("[INSERT] {} already present at offset={}", display_key(key), offset.get());
            return Ok(InsertOutcome::Existing { offset, upgraded });
        }

        let tag = self.hasher.tag(key);
        for bucket in self.buckets.candidates(&self.hasher, key, tag) {
            let Some(way) = self.buckets.find_empty_slot(bucket) else {
                continue;
            };
            let offset = self.log.append(key, terminal).map_err(|e| {
                counter!("ndnscan_insert_failures_total").increment(1);
                e
            })?;
            if !self.buckets.write_slot(bucket, way, tag, offset) {
                // Only possible if another process writes the same region.
                warn!("[INSERT] slot {}:{} taken concurrently", bucket, way);
                counter!("ndnscan_insert_failures_total").increment(1);
                return Err(Error::BucketFull);
            }
            debug!(
                "[INSERT] {} -> bucket={} way={} offset={} terminal={}",
                display_key(key),
                bucket,
                way,
                offset.get(),
                is_terminal
            );
            return Ok(InsertOutcome::Inserted(offset));
        }

        counter!("ndnscan_insert_failures_total").increment(1);
        warn!("[INSERT] unable to insert {}: both buckets full", display_key(key));
        Err(Error::BucketFull)
    }

    /// Every stored record in insertion order.
    pub fn iter(&self) -> LogIter<'_> {
        self.log.iter()
    }

    /// Number of stored prefixes.
    pub fn len(&self) -> usize {
        self.log.record_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of the log in use, including the reserved byte at offset 0.
    pub fn log_used(&self) -> u64 {
        self.log.head()
    }

    pub fn log_capacity(&self) -> u64 {
        self.log.capacity()
    }

    /// Bytes that can still be appended before the headroom check refuses.
    pub fn log_available(&self) -> u64 {
        self.log
            .capacity()
            .saturating_sub(self.log.head() + LOG_HEADROOM as u64)
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.num_buckets()
    }

    pub fn occupied_slots(&self) -> u64 {
        self.buckets.occupied()
    }

    pub fn load_factor(&self) -> f64 {
        self.occupied_slots() as f64 / (self.num_buckets() * BUCKET_WAYS) as f64
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// OS name of the shared segment, `None` for heap indexes.
    pub fn os_id(&self) -> Option<&str> {
        self.region.os_id()
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Emit gauges (caller decides cadence).
    pub fn report_metrics(&self) {
        gauge!("ndnscan_log_bytes_used").set(self.log_used() as f64);
        gauge!("ndnscan_records").set(self.len() as f64);
        gauge!("ndnscan_slots_occupied").set(self.occupied_slots() as f64);
    }
}

#[inline]
fn port_of(p: Option<PortId>) -> i16 {
    p.map_or(-1, |p| p.get() as i16)
}

// Public module for C API functions
pub mod public_api;

// Re-export all public API functions at the crate root
pub use public_api::*;
pub use errors::{ndn_last_error, ndn_strerror};

impl<H: PrefixHasher> Drop for HashIndex<H> {
    fn drop(&mut self) {
        let prev = self.header().ref_count.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.region.unlink();
        }
        // The mapping itself is released by MappedRegion's Drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    fn port(p: u8) -> PortId {
        PortId::new(p).unwrap()
    }

    #[test]
    fn header_layout_is_fixed() {
        assert_eq!(offset_of!(Header, magic), 0);
        assert_eq!(offset_of!(Header, version), 8);
        assert_eq!(offset_of!(Header, hasher_id), 12);
        assert_eq!(offset_of!(Header, num_buckets), 16);
        assert_eq!(offset_of!(Header, log_capacity), 24);
        assert_eq!(offset_of!(Header, log_head), 32);
        assert_eq!(offset_of!(Header, records), 40);
        assert_eq!(offset_of!(Header, ref_count), 48);
        assert_eq!(offset_of!(Header, init_flag), 56);
        assert_eq!(size_of::<Header>(), 64);
    }

    #[test]
    fn geometry_is_validated() {
        assert!(matches!(HashIndex::new(0, 4096), Err(Error::InvalidGeometry(_))));
        assert!(matches!(HashIndex::new(12, 4096), Err(Error::InvalidGeometry(_))));
        assert!(matches!(HashIndex::new(16, 100), Err(Error::InvalidGeometry(_))));
        assert!(matches!(
            HashIndex::new(16, MAX_LOG_CAPACITY + 1),
            Err(Error::InvalidGeometry(_))
        ));
        assert_eq!(region_size(16, 4096).unwrap(), 64 + 16 * 64 + 4096);
    }

    #[test]
    fn new_index_is_empty_with_head_at_one() {
        let idx = HashIndex::new(16, 4096).unwrap();
        assert!(idx.is_empty());
        assert_eq!(idx.log_used(), 1);
        assert_eq!(idx.occupied_slots(), 0);
        assert_eq!(idx.role(), Role::Writer);
        assert!(idx.os_id().is_none());
    }

    #[test]
    fn insert_requires_port_for_terminal() {
        let mut idx = HashIndex::new(16, 4096).unwrap();
        assert_eq!(idx.insert(b"a/", true, None), Err(Error::MissingPort));
        assert_eq!(idx.log_used(), 1);
    }

    #[test]
    fn invalid_keys_are_rejected_before_mutation() {
        let mut idx = HashIndex::new(16, 4096).unwrap();
        assert_eq!(idx.insert(b"/", false, None), Err(Error::InvalidKey(KeyError::TooShort)));
        assert_eq!(
            idx.insert(b"abc", false, None),
            Err(Error::InvalidKey(KeyError::MissingTerminator))
        );
        assert_eq!(
            idx.insert(&[b'a'; 300], false, None),
            Err(Error::InvalidKey(KeyError::TooLong))
        );
        assert_eq!(idx.log_used(), 1);
        assert!(!idx.contains(b"abc"));
    }

    #[test]
    fn non_terminal_insert_ignores_port() {
        let mut idx = HashIndex::new(16, 4096).unwrap();
        idx.insert(b"a/", false, Some(port(4))).unwrap();
        let rec = idx.get(b"a/").unwrap();
        assert!(!rec.is_terminal);
        assert_eq!(rec.dst_port, None);
    }

    #[test]
    fn duplicate_insert_upgrades_but_never_appends() {
        let mut idx = HashIndex::new(16, 4096).unwrap();
        let first = idx.insert(b"a/b/", false, None).unwrap();
        let used = idx.log_used();

        let again = idx.insert(b"a/b/", false, None).unwrap();
        assert_eq!(again, InsertOutcome::Existing { offset: first.offset(), upgraded: false });

        let upgraded = idx.insert(b"a/b/", true, Some(port(7))).unwrap();
        assert_eq!(upgraded, InsertOutcome::Existing { offset: first.offset(), upgraded: true });

        let latched = idx.insert(b"a/b/", true, Some(port(8))).unwrap();
        assert_eq!(latched, InsertOutcome::Existing { offset: first.offset(), upgraded: false });

        assert_eq!(idx.log_used(), used);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get(b"a/b/").unwrap().dst_port, Some(port(7)));
    }

    #[test]
    fn stats_and_metrics_follow_inserts() {
        use crate::telemetry::test_sink;
        test_sink::install();
        let upgrades = test_sink::total("ndnscan_upgrades_total");
        let failures = test_sink::total("ndnscan_insert_failures_total");

        // one bucket: both candidates coincide, so eight keys fill the table
        let mut idx = HashIndex::new(1, 4096).unwrap();
        for i in 0..8 {
            idx.insert(format!("k{i}/").as_bytes(), false, None).unwrap();
        }
        assert!(idx.contains_and_upgrade(b"k0/", port(1)));
        assert_eq!(idx.insert(b"zz/", false, None), Err(Error::BucketFull));

        assert!(test_sink::total("ndnscan_upgrades_total") >= upgrades + 1);
        assert!(test_sink::total("ndnscan_insert_failures_total") >= failures + 1);
        assert_eq!(idx.load_factor(), 1.0);

        idx.report_metrics();
        assert_eq!(test_sink::last("ndnscan_records"), Some(8));
        assert_eq!(test_sink::last("ndnscan_slots_occupied"), Some(8));
        assert_eq!(test_sink::last("ndnscan_log_bytes_used"), Some(idx.log_used()));
        assert_eq!(idx.log_used(), 1 + 8 * 6);
    }

    #[test]
    fn creator_publishes_header_fields() {
        let idx = HashIndex::new(32, 8192).unwrap();
        let hdr = idx.header();
        assert_eq!(hdr.magic, HEADER_MAGIC);
        assert_eq!(hdr.version, HEADER_VERSION);
        assert_eq!(hdr.hasher_id, XxHasher::ID);
        assert_eq!(hdr.num_buckets, 32);
        assert_eq!(hdr.log_capacity, 8192);
        assert_eq!(hdr.log_head.load(Ordering::Acquire), 1);
        assert_eq!(hdr.records.load(Ordering::Acquire), 0);
        assert_eq!(hdr.ref_count.load(Ordering::Acquire), 1);
        assert_eq!(hdr.init_flag.load(Ordering::Acquire), 1);
    }

    #[test]
    fn log_available_tracks_headroom() {
        let mut idx = HashIndex::new(16, 4096).unwrap();
        assert_eq!(idx.log_available(), 4096 - 1 - LOG_HEADROOM as u64);
        idx.insert(b"abc/", false, None).unwrap();
        assert_eq!(idx.log_available(), 4096 - 8 - LOG_HEADROOM as u64);
    }
}
