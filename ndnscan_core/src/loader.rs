//! Bulk construction from hierarchical names.
//!
//! A name `a/b/c` (or `a/b/c/`) contributes one entry per component:
//! `a/` and `a/b/` as non-terminal prefixes and `a/b/c/` as a terminal
//! prefix carrying the name's destination port. Shorter prefixes go in
//! first, so a later name can upgrade an earlier intermediate prefix.

use crate::constants::{LOAD_PROGRESS_MASK, TERMINATOR};
use crate::errors::Error;
use crate::hasher::PrefixHasher;
use crate::helpers::display_key;
use crate::types::{HashIndex, InsertOutcome, PortId};
use log::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Names consumed from the source.
    pub names: u64,
    /// Prefix inserts attempted.
    pub prefixes: u64,
    /// New records appended.
    pub inserted: u64,
    /// Prefixes that were already stored.
    pub duplicates: u64,
    /// Prefixes dropped because both candidate buckets were full.
    pub bucket_full: u64,
    /// Prefixes refused as malformed.
    pub rejected: u64,
}

impl LoadReport {
    /// Prefixes that did not make it into the index.
    pub fn failures(&self) -> u64 {
        self.bucket_full + self.rejected
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub names: u64,
    pub prefixes: u64,
    pub missing: u64,
}

/// Yields every prefix of `name` that ends right after a `/`, in
/// increasing length. The final component is yielded only if `name` already
/// ends with the terminator; callers append it otherwise.
fn slash_prefixes(name: &[u8]) -> impl Iterator<Item = &[u8]> {
    name.iter()
        .enumerate()
        .filter(|&(_, &b)| b == TERMINATOR)
        .map(move |(i, _)| &name[..=i])
}

/// Every prefix of `name` paired with whether it is the full name. `buf`
/// holds the terminated full name and is reused across calls.
fn name_prefixes<'a>(
    name: &'a [u8],
    buf: &'a mut Vec<u8>,
) -> impl Iterator<Item = (&'a [u8], bool)> {
    let body = name.strip_suffix(&[TERMINATOR]).unwrap_or(name);
    buf.clear();
    buf.extend_from_slice(body);
    buf.push(TERMINATOR);
    let full: &'a [u8] = &buf[..];
    slash_prefixes(body)
        .map(|p| (p, false))
        .chain(std::iter::once((full, true)))
}

impl<H: PrefixHasher> HashIndex<H> {
    /// Insert all prefixes of one name. Bucket-full and malformed prefixes are
    /// counted in `report`; only log exhaustion is returned as an error.
    pub fn insert_name(
        &mut self,
        name: &[u8],
        port: PortId,
        buf: &mut Vec<u8>,
        report: &mut LoadReport,
    ) -> Result<(), Error> {
        for (prefix, is_last) in name_prefixes(name, buf) {
            report.prefixes += 1;
            let dst = if is_last { Some(port) } else { None };
            match self.insert(prefix, is_last, dst) {
                Ok(InsertOutcome::Inserted(_)) => report.inserted += 1,
                Ok(InsertOutcome::Existing { .. }) => report.duplicates += 1,
                Err(Error::BucketFull) => report.bucket_full += 1,
                Err(Error::InvalidKey(e)) => {
                    warn!("[LOAD] rejected prefix {}: {}", display_key(prefix), e);
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Build the index from a stream of names. `port_for` picks the forwarding
/// target of each name's terminal prefix.
///
/// Stops at the first fatal error (log exhaustion); everything else is
/// tallied in the returned report.
pub fn load_names<H, I, N, P>(
    index: &mut HashIndex<H>,
    names: I,
    mut port_for: P,
) -> Result<LoadReport, Error>
where
    H: PrefixHasher,
    I: IntoIterator<Item = N>,
    N: AsRef<[u8]>,
    P: FnMut(&[u8]) -> PortId,
{
    let mut report = LoadReport::default();
    let mut buf = Vec::with_capacity(crate::constants::MAX_KEY_LEN + 1);
    for name in names {
        let name = name.as_ref();
        if name.is_empty() {
            continue;
        }
        let port = port_for(name);
        index.insert_name(name, port, &mut buf, &mut report)?;
        report.names += 1;
        if report.names & LOAD_PROGRESS_MASK == 0 {
            info!("[LOAD] total names = {}. fails = {}", report.names, report.failures());
        }
    }
    info!(
        "[LOAD] total names = {}. fails = {}. log bytes used = {}",
        report.names,
        report.failures(),
        index.log_used()
    );
    Ok(report)
}

/// Check that every prefix of every name is present. Lookups never upgrade.
pub fn verify_names<H, I, N>(index: &HashIndex<H>, names: I) -> VerifyReport
where
    H: PrefixHasher,
    I: IntoIterator<Item = N>,
    N: AsRef<[u8]>,
{
    let mut report = VerifyReport::default();
    let mut buf = Vec::with_capacity(crate::constants::MAX_KEY_LEN + 1);
    for name in names {
        let name = name.as_ref();
        if name.is_empty() {
            continue;
        }
        for (prefix, _) in name_prefixes(name, &mut buf) {
            report.prefixes += 1;
            if !index.contains(prefix) {
                warn!("[VERIFY] prefix {} absent", display_key(prefix));
                report.missing += 1;
            }
        }
        report.names += 1;
    }
    report
}
