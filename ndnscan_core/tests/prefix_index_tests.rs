use proptest::collection::vec as pvec;
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;

use ndnscan_core::{
    load_names, verify_names, Error, HashIndex, InsertOutcome, PortId, PrefixHasher, Tag,
    WideTagHasher,
};

fn port(p: u8) -> PortId {
    PortId::new(p).unwrap()
}

/// Every key lands in bucket 0 (primary) or bucket 1 (secondary) with the
/// same tag. Only tag bytes are two bytes long, keys used here never are.
#[derive(Debug, Default)]
struct SplitHasher;

impl PrefixHasher for SplitHasher {
    const ID: u32 = 0x5117;

    fn hash64(&self, bytes: &[u8]) -> u64 {
        if bytes.len() == 2 { 1 } else { 0 }
    }

    fn tag(&self, _key: &[u8]) -> Tag {
        Tag(7)
    }
}

/// Both candidates are bucket 0.
#[derive(Debug, Default)]
struct SameBucketHasher;

impl PrefixHasher for SameBucketHasher {
    const ID: u32 = 0x5118;

    fn hash64(&self, _bytes: &[u8]) -> u64 {
        0
    }

    fn tag(&self, _key: &[u8]) -> Tag {
        Tag(7)
    }
}

fn keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("k{i:02}/").into_bytes()).collect()
}

#[test]
fn colliding_tags_resolve_by_full_key() {
    let mut index = HashIndex::with_hasher(16, 4096, SplitHasher).unwrap();
    index.insert(b"ab/", false, None).unwrap();
    index.insert(b"aab/", true, Some(port(3))).unwrap();
    assert!(index.contains(b"ab/"));
    assert!(index.contains(b"aab/"));
    assert!(!index.contains(b"b/b/"));
    assert!(!index.get(b"ab/").unwrap().is_terminal);
    assert_eq!(index.get(b"aab/").unwrap().dst_port, Some(port(3)));
    assert_ne!(
        index.get(b"ab/").unwrap().offset,
        index.get(b"aab/").unwrap().offset
    );
}

#[test]
fn secondary_bucket_absorbs_overflow() {
    let mut index = HashIndex::with_hasher(16, 8192, SplitHasher).unwrap();
    let all = keys(17);
    for k in &all[..16] {
        assert!(matches!(index.insert(k, false, None), Ok(InsertOutcome::Inserted(_))));
    }
    assert_eq!(index.occupied_slots(), 16);
    for k in &all[..16] {
        assert!(index.contains(k));
    }

    let used = index.log_used();
    assert_eq!(index.insert(&all[16], false, None), Err(Error::BucketFull));
    assert!(!index.contains(&all[16]));
    assert_eq!(index.log_used(), used);
    assert_eq!(index.len(), 16);

    // a stored key is still a duplicate, not a failure
    assert!(matches!(
        index.insert(&all[3], true, Some(port(1))),
        Ok(InsertOutcome::Existing { upgraded: true, .. })
    ));
}

#[test]
fn shared_candidate_bucket_holds_eight() {
    let mut index = HashIndex::with_hasher(16, 8192, SameBucketHasher).unwrap();
    let all = keys(9);
    for k in &all[..8] {
        index.insert(k, false, None).unwrap();
    }
    assert_eq!(index.insert(&all[8], false, None), Err(Error::BucketFull));
    assert_eq!(index.occupied_slots(), 8);
    assert!(all[..8].iter().all(|k| index.contains(k)));
}

#[test]
fn bucket_full_is_counted_by_the_loader() {
    let mut index = HashIndex::with_hasher(16, 8192, SameBucketHasher).unwrap();
    let names: Vec<String> = (0..12).map(|i| format!("n{i:02}")).collect();
    let report = load_names(&mut index, &names, |_| port(2)).unwrap();
    assert_eq!(report.inserted, 8);
    assert_eq!(report.bucket_full, 4);
    assert_eq!(report.failures(), 4);
    assert_eq!(verify_names(&index, &names).missing, 4);
}

#[test]
fn wide_tag_index_round_trip() {
    let mut index = HashIndex::with_hasher(64, 16 * 1024, WideTagHasher).unwrap();
    let all: Vec<Vec<u8>> = (0..300).map(|i| format!("x/{i}/").into_bytes()).collect();
    for k in &all {
        index.insert(k, false, None).unwrap();
    }
    assert!(all.iter().all(|k| index.contains(k)));
    assert!(!index.contains(b"x/300/"));
    assert_eq!(index.len(), all.len());
}

#[test]
fn random_name_table_loads_and_verifies() {
    let mut rng = StdRng::seed_from_u64(0x6e646e);
    let names: Vec<Vec<u8>> = (0..5_000)
        .map(|_| {
            let components = rng.random_range(1..=4);
            let mut name = Vec::new();
            for c in 0..components {
                if c > 0 {
                    name.push(b'/');
                }
                for _ in 0..rng.random_range(1..=8) {
                    name.push(rng.random_range(b'a'..=b'z'));
                }
            }
            name
        })
        .collect();

    let mut index = HashIndex::new(8192, 1 << 20).unwrap();
    let report = load_names(&mut index, &names, |n| port(n[0] % 16)).unwrap();
    assert_eq!(report.names, names.len() as u64);
    assert_eq!(report.failures(), 0);
    assert_eq!(report.inserted + report.duplicates, report.prefixes);
    assert_eq!(index.len() as u64, report.inserted);

    let verify = verify_names(&index, &names);
    assert_eq!(verify.missing, 0);
    assert_eq!(verify.prefixes, report.prefixes);
    for name in &names {
        let mut full = name.clone();
        full.push(b'/');
        assert!(index.get(&full).unwrap().is_terminal);
    }
}

fn prefixes_of(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut acc = String::new();
    for component in name.split('/') {
        acc.push_str(component);
        acc.push('/');
        out.push(acc.clone());
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn loaded_prefixes_are_found(names in pvec("[a-z]{1,6}(/[a-z]{1,6}){0,3}", 1..40)) {
        let mut index = HashIndex::new(1024, 64 * 1024).unwrap();
        let report = load_names(&mut index, &names, |_| port(9)).unwrap();
        prop_assert_eq!(report.failures(), 0);

        let distinct: HashSet<String> = names.iter().flat_map(|n| prefixes_of(n)).collect();
        prop_assert_eq!(index.len(), distinct.len());
        for p in &distinct {
            prop_assert!(index.contains(p.as_bytes()));
        }
        for n in &names {
            let full = format!("{n}/");
            prop_assert!(index.get(full.as_bytes()).unwrap().is_terminal);
        }
        // digits never occur in generated names
        prop_assert!(!index.contains(b"0/"));
        let extended = format!("{}0/", names[0]);
        prop_assert!(!index.contains(extended.as_bytes()));
    }

    #[test]
    fn reloading_never_appends(names in pvec("[a-z]{1,6}(/[a-z]{1,6}){0,3}", 1..40)) {
        let mut index = HashIndex::new(1024, 64 * 1024).unwrap();
        load_names(&mut index, &names, |_| port(1)).unwrap();
        let used = index.log_used();
        let len = index.len();

        let again = load_names(&mut index, &names, |_| port(2)).unwrap();
        prop_assert_eq!(again.inserted, 0);
        prop_assert_eq!(index.log_used(), used);
        prop_assert_eq!(index.len(), len);
        // terminal records keep the port of the first load
        for n in &names {
            let full = format!("{n}/");
            prop_assert_eq!(index.get(full.as_bytes()).unwrap().dst_port, Some(port(1)));
        }
    }

    #[test]
    fn records_read_back_in_insertion_order(keys in pvec("[a-z]{1,10}/", 1..60)) {
        let mut index = HashIndex::new(512, 32 * 1024).unwrap();
        let mut expected = Vec::new();
        let mut seen = HashSet::new();
        for k in &keys {
            index.insert(k.as_bytes(), false, None).unwrap();
            if seen.insert(k.clone()) {
                expected.push(k.clone().into_bytes());
            }
        }
        let stored: Vec<Vec<u8>> = index.iter().map(|r| r.key.to_vec()).collect();
        prop_assert_eq!(stored, expected);
    }
}
