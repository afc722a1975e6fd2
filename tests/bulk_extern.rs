//! # Bulk Build Tests (external storage)
//!
//! Oversize payloads leave the page: the record keeps a 20-byte reference
//! (plus a local prefix in the redundant format) and the payload tail goes
//! to chained blob pages, logged before the owning record's page commits.
//!
//! 1. A 100KB tuple on 16KB pages round-trips through the blob chain.
//! 2. The redundant format keeps its local prefix inline.
//! 3. Mixed small and large tuples coexist on the same leaf level.
//! 4. Blob redo precedes the owning page's batch in the stream.

use std::sync::Arc;

use masondb::bulk::{scan, validate_index, TreeBuilder};
use masondb::config::{BuildConfig, DEFAULT_SPACE_CAPACITY, EXTERN_LOCAL_PREFIX, PAGE_SIZE};
use masondb::storage::pool::BufferPool;
use masondb::storage::redo::{LogSys, RedoWrite};
use masondb::storage::space::Space;
use masondb::{IndexDef, RowFormat, Trx, Tuple};

fn make_index(format: RowFormat) -> Arc<IndexDef> {
    let pool = BufferPool::new();
    let space = Space::new(1, pool, DEFAULT_SPACE_CAPACITY);
    let log = LogSys::new();
    IndexDef::create("ext_test", space, log, format, true, None).unwrap()
}

fn big_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn build(index: &Arc<IndexDef>, tuples: Vec<Tuple>) -> eyre::Result<()> {
    let trx = Trx::begin();
    let mut builder = TreeBuilder::new(index.clone(), trx, BuildConfig::default())?;
    let mut result = Ok(());
    for mut tuple in tuples {
        result = builder.insert(&mut tuple);
        if result.is_err() {
            break;
        }
    }
    builder.finalize(result)
}

#[test]
fn hundred_kilobyte_tuple_round_trips() {
    let index = make_index(RowFormat::Dynamic);
    let payload = big_payload(100 * 1024);

    build(
        &index,
        vec![Tuple::new(b"big-row".to_vec(), payload.clone())],
    )
    .unwrap();

    let stats = validate_index(&index).unwrap();
    assert_eq!(stats.root_level, 0);
    assert_eq!(stats.leaf_recs(), 1);

    // The payload cannot have stayed on the one leaf page.
    assert!(payload.len() > PAGE_SIZE);

    let rows = scan(&index).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, b"big-row".to_vec());
    assert_eq!(rows[0].1, payload);
}

#[test]
fn redundant_format_keeps_a_local_prefix() {
    let index = make_index(RowFormat::Redundant);
    let payload = big_payload(64 * 1024);

    build(
        &index,
        vec![Tuple::new(b"prefixed".to_vec(), payload.clone())],
    )
    .unwrap();

    // The stored record keeps the first EXTERN_LOCAL_PREFIX bytes inline;
    // the scan reassembles the rest from the chain.
    let rows = scan(&index).unwrap();
    assert_eq!(rows[0].1, payload);
    assert!(payload.len() > EXTERN_LOCAL_PREFIX);
}

#[test]
fn small_and_large_tuples_share_the_leaf_level() {
    let index = make_index(RowFormat::Dynamic);
    let big = big_payload(40 * 1024);

    let mut tuples = Vec::new();
    for i in 1..=200u32 {
        let payload = if i % 50 == 0 {
            big.clone()
        } else {
            vec![i as u8; 24]
        };
        tuples.push(Tuple::new(i.to_be_bytes().to_vec(), payload));
    }

    build(&index, tuples).unwrap();

    let rows = scan(&index).unwrap();
    assert_eq!(rows.len(), 200);
    for (i, (key, payload)) in rows.iter().enumerate() {
        let n = (i + 1) as u32;
        assert_eq!(*key, n.to_be_bytes().to_vec());
        if n % 50 == 0 {
            assert_eq!(*payload, big);
        } else {
            assert_eq!(*payload, vec![n as u8; 24]);
        }
    }
}

#[test]
fn blob_batches_precede_the_owning_page_commit() {
    let index = make_index(RowFormat::Dynamic);
    let payload = big_payload(50 * 1024);

    build(
        &index,
        vec![Tuple::new(b"ordered".to_vec(), payload)],
    )
    .unwrap();

    let batches = index.log().snapshot();

    // Blob part batches carry the big payload byte records; the owning
    // leaf's single batch carries its PageCreate plus the record body and
    // the patched reference, appended only at the leaf's mtr commit.
    let last_blob = batches
        .iter()
        .rposition(|batch| {
            batch.writes.iter().any(
                |w| matches!(w, RedoWrite::Bytes { bytes, .. } if bytes.len() > 8 * 1024),
            )
        })
        .expect("blob payload batches must exist");
    let owner = batches
        .iter()
        .rposition(|batch| {
            batch
                .writes
                .iter()
                .any(|w| matches!(w, RedoWrite::PageCreate { .. }))
        })
        .expect("the leaf page batch must exist");

    assert!(
        owner > last_blob,
        "the owning page batch (pos {}) must follow the blob batches (last at {})",
        owner,
        last_blob
    );
}
